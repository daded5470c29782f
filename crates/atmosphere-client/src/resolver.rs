//! Actor resolution: identifier -> DID + PDS host.
//!
//! `IdentityResolver` is the seam to the actual lookup; `HttpResolver`
//! performs the plain HTTP lookups (handle resolution via an AppView,
//! DID documents via plc.directory or did:web), and `CachedResolver`
//! memoizes any resolver behind a strict-expiry TTL cache.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::cache::TtlCache;
use crate::error::{ClientError, Result};
use crate::identifier::{ActorIdentifier, Did, Handle};

/// Default TTL for actor-resolution results.
pub const ACTOR_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

const DEFAULT_APPVIEW: &str = "https://public.api.bsky.app";
const DEFAULT_PLC_DIRECTORY: &str = "https://plc.directory";

/// The outcome of resolving an actor identifier.
///
/// Immutable once produced; on cache miss or expiry the actor is re-resolved,
/// never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedActor {
    pub did: Did,
    pub handle: Handle,
    pub pds: Url,
}

/// External resolution capability: maps an identifier to the DID and the
/// PDS currently serving that account.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, identifier: &ActorIdentifier) -> Result<ResolvedActor>;
}

fn resolution_error(identifier: &ActorIdentifier, reason: impl ToString) -> ClientError {
    ClientError::Resolution {
        identifier: identifier.to_string(),
        reason: reason.to_string(),
    }
}

// --- HTTP resolver ---

#[derive(Debug, Deserialize)]
struct ResolveHandleOutput {
    did: Did,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DidDocument {
    #[serde(default)]
    also_known_as: Vec<String>,
    #[serde(default)]
    service: Vec<DidService>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DidService {
    id: String,
    #[serde(rename = "type")]
    service_type: String,
    service_endpoint: String,
}

impl DidDocument {
    /// The account handle, taken from the first `at://` alias.
    fn handle(&self) -> Option<Handle> {
        self.also_known_as
            .iter()
            .filter_map(|aka| aka.strip_prefix("at://"))
            .find_map(|h| h.parse().ok())
    }

    /// The PDS service endpoint (`#atproto_pds`).
    fn pds(&self) -> Option<Url> {
        self.service
            .iter()
            .find(|s| s.id.ends_with("#atproto_pds") || s.service_type == "AtprotoPersonalDataServer")
            .and_then(|s| s.service_endpoint.parse().ok())
    }
}

/// Resolver that performs the network lookups directly.
pub struct HttpResolver {
    http: reqwest::Client,
    appview: Url,
    plc_directory: Url,
}

impl HttpResolver {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self {
            http,
            // Statically known URLs
            appview: Url::parse(DEFAULT_APPVIEW).unwrap(),
            plc_directory: Url::parse(DEFAULT_PLC_DIRECTORY).unwrap(),
        }
    }

    pub fn with_appview(mut self, appview: Url) -> Self {
        self.appview = appview;
        self
    }

    pub fn with_plc_directory(mut self, plc_directory: Url) -> Self {
        self.plc_directory = plc_directory;
        self
    }

    async fn resolve_handle(&self, identifier: &ActorIdentifier, handle: &Handle) -> Result<Did> {
        let mut url = self
            .appview
            .join("/xrpc/com.atproto.identity.resolveHandle")
            .map_err(|e| resolution_error(identifier, e))?;
        url.query_pairs_mut().append_pair("handle", handle.as_str());

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| resolution_error(identifier, e))?;
        if !response.status().is_success() {
            return Err(resolution_error(
                identifier,
                format!("handle resolution returned {}", response.status()),
            ));
        }
        let output: ResolveHandleOutput = response
            .json()
            .await
            .map_err(|e| resolution_error(identifier, e))?;
        Ok(output.did)
    }

    async fn fetch_did_document(&self, identifier: &ActorIdentifier, did: &Did) -> Result<DidDocument> {
        let url = match did.method() {
            "plc" => self
                .plc_directory
                .join(&format!("/{did}"))
                .map_err(|e| resolution_error(identifier, e))?,
            "web" => {
                let domain = did.as_str().trim_start_matches("did:web:");
                Url::parse(&format!("https://{domain}/.well-known/did.json"))
                    .map_err(|e| resolution_error(identifier, e))?
            }
            method => {
                return Err(resolution_error(
                    identifier,
                    format!("unsupported DID method {method:?}"),
                ));
            }
        };

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| resolution_error(identifier, e))?;
        if !response.status().is_success() {
            return Err(resolution_error(
                identifier,
                format!("DID document fetch returned {}", response.status()),
            ));
        }
        response.json().await.map_err(|e| resolution_error(identifier, e))
    }
}

impl Default for HttpResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityResolver for HttpResolver {
    async fn resolve(&self, identifier: &ActorIdentifier) -> Result<ResolvedActor> {
        let did = match identifier {
            ActorIdentifier::Did(did) => did.clone(),
            ActorIdentifier::Handle(handle) => self.resolve_handle(identifier, handle).await?,
        };

        let document = self.fetch_did_document(identifier, &did).await?;
        let handle = document
            .handle()
            .ok_or_else(|| resolution_error(identifier, "DID document has no handle alias"))?;
        let pds = document
            .pds()
            .ok_or_else(|| resolution_error(identifier, "DID document has no PDS endpoint"))?;

        debug!("Resolved {identifier} -> {did} at {pds}");
        Ok(ResolvedActor { did, handle, pds })
    }
}

// --- Cached resolver ---

/// Caching wrapper around any `IdentityResolver`.
///
/// Successful resolutions are written under `actor:<identifier>` before they
/// are returned, so repeated calls within the TTL window are cache hits and
/// issue no network traffic. Two concurrent misses for the same identifier
/// may both hit the network; there is no single-flight deduplication.
pub struct CachedResolver<R> {
    inner: R,
    cache: TtlCache<ResolvedActor>,
}

impl<R: IdentityResolver> CachedResolver<R> {
    pub fn new(inner: R) -> Self {
        Self::with_ttl(inner, ACTOR_CACHE_TTL)
    }

    pub fn with_ttl(inner: R, ttl: Duration) -> Self {
        Self {
            inner,
            cache: TtlCache::new(ttl),
        }
    }

    /// Parse and resolve a raw identifier string.
    ///
    /// Malformed identifiers fail fast without reaching the cache or the
    /// network.
    pub async fn resolve_str(&self, identifier: &str) -> Result<ResolvedActor> {
        let identifier: ActorIdentifier = identifier.parse()?;
        self.resolve(&identifier).await
    }
}

#[async_trait]
impl<R: IdentityResolver> IdentityResolver for CachedResolver<R> {
    async fn resolve(&self, identifier: &ActorIdentifier) -> Result<ResolvedActor> {
        let key = format!("actor:{identifier}");
        if let Some(hit) = self.cache.get(&key) {
            debug!("Actor cache hit for {identifier}");
            return Ok(hit);
        }

        let resolved = self.inner.resolve(identifier).await?;
        self.cache.set(key, resolved.clone());
        Ok(resolved)
    }
}

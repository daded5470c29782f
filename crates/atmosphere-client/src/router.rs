//! Authenticated request router.
//!
//! `RoutedHandler` sits in front of the session's own transport and decides,
//! per request, which network host actually owns the target repo:
//! - no `repo` parameter, or `repo` equal to the session DID: the request
//!   goes through the default (authorized) session transport
//! - any other `repo`: the actor is resolved and the request is issued
//!   directly to that account's PDS, without authorization headers
//!
//! Successful GET responses are memoized under `<METHOD>:<path>`. Writes are
//! never cached and never invalidate cached reads; callers needing fresher
//! state after a write must bypass or re-key the read themselves.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::Method;
use tracing::debug;
use url::Url;

use crate::cache::TtlCache;
use crate::error::Result;
use crate::identifier::Did;
use crate::resolver::{ACTOR_CACHE_TTL, CachedResolver, IdentityResolver};
use crate::xrpc::{FetchHandler, ServiceTransport, XrpcRequest, XrpcResponse};

/// Transport used when a request is redirected to a specific PDS.
#[async_trait]
pub trait PdsTransport: Send + Sync {
    async fn handle(&self, service: &Url, request: &XrpcRequest) -> Result<XrpcResponse>;
}

/// Default `PdsTransport`: plain unauthenticated HTTP against the host.
pub struct HttpPdsTransport {
    http: reqwest::Client,
}

impl HttpPdsTransport {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for HttpPdsTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PdsTransport for HttpPdsTransport {
    async fn handle(&self, service: &Url, request: &XrpcRequest) -> Result<XrpcResponse> {
        ServiceTransport::with_client(self.http.clone(), service.clone())
            .handle(request)
            .await
    }
}

/// The routing fetch handler. Implements `FetchHandler` so it can stand in
/// wherever the session transport would.
pub struct RoutedHandler<R> {
    session_did: Did,
    default: Arc<dyn FetchHandler>,
    resolver: CachedResolver<R>,
    direct: Arc<dyn PdsTransport>,
    responses: TtlCache<XrpcResponse>,
}

impl<R: IdentityResolver> RoutedHandler<R> {
    /// Build a router for a session.
    ///
    /// `default` is the session's own authorized transport; `resolver` maps
    /// foreign repos to their PDS hosts.
    pub fn new(session_did: Did, default: Arc<dyn FetchHandler>, resolver: R) -> Self {
        Self::with_ttl(session_did, default, resolver, ACTOR_CACHE_TTL)
    }

    pub fn with_ttl(
        session_did: Did,
        default: Arc<dyn FetchHandler>,
        resolver: R,
        ttl: Duration,
    ) -> Self {
        Self {
            session_did,
            default,
            resolver: CachedResolver::with_ttl(resolver, ttl),
            direct: Arc::new(HttpPdsTransport::new()),
            responses: TtlCache::new(ttl),
        }
    }

    /// Replace the direct-to-PDS transport (tests substitute a recorder here).
    pub fn with_pds_transport(mut self, direct: Arc<dyn PdsTransport>) -> Self {
        self.direct = direct;
        self
    }

    /// Decide whether a request targets a foreign repo, and if so, whose PDS.
    ///
    /// A malformed `repo` value is a caller error and surfaces as
    /// `InvalidIdentifier`; a failed lookup surfaces as `Resolution`. Neither
    /// falls back to the default transport.
    async fn target_pds(&self, request: &XrpcRequest) -> Result<Option<Url>> {
        let Some(repo) = request.query_param("repo") else {
            return Ok(None);
        };
        if repo == self.session_did.as_str() {
            return Ok(None);
        }
        let actor = self.resolver.resolve_str(&repo).await?;
        Ok(Some(actor.pds))
    }
}

#[async_trait]
impl<R: IdentityResolver> FetchHandler for RoutedHandler<R> {
    async fn handle(&self, request: &XrpcRequest) -> Result<XrpcResponse> {
        let cacheable = request.method == Method::GET;
        let cache_key = format!("{}:{}", request.method, request.path);

        if cacheable {
            if let Some(hit) = self.responses.get(&cache_key) {
                debug!("Response cache hit for {cache_key}");
                return Ok(hit);
            }
        }

        let response = match self.target_pds(request).await? {
            Some(pds) => {
                debug!("Routing {} to {pds}", request.path);
                self.direct.handle(&pds, request).await?
            }
            None => self.default.handle(request).await?,
        };

        if cacheable && response.ok() {
            self.responses.set(cache_key, response.clone());
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use crate::identifier::ActorIdentifier;
    use crate::resolver::ResolvedActor;
    use bytes::Bytes;
    use http::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::advance;

    fn response(body: &'static str) -> XrpcResponse {
        XrpcResponse {
            status: StatusCode::OK,
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    /// Default transport that counts requests.
    struct CountingHandler {
        calls: AtomicUsize,
    }

    impl CountingHandler {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FetchHandler for CountingHandler {
        async fn handle(&self, _request: &XrpcRequest) -> Result<XrpcResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(response(r#"{"from":"default"}"#))
        }
    }

    /// PDS transport that records the host it was asked to hit.
    struct RecordingPdsTransport {
        hosts: std::sync::Mutex<Vec<String>>,
    }

    impl RecordingPdsTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                hosts: std::sync::Mutex::new(Vec::new()),
            })
        }

        fn hosts(&self) -> Vec<String> {
            self.hosts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PdsTransport for RecordingPdsTransport {
        async fn handle(&self, service: &Url, _request: &XrpcRequest) -> Result<XrpcResponse> {
            self.hosts.lock().unwrap().push(service.to_string());
            Ok(response(r#"{"from":"pds"}"#))
        }
    }

    struct StaticResolver;

    #[async_trait]
    impl IdentityResolver for StaticResolver {
        async fn resolve(&self, identifier: &ActorIdentifier) -> Result<ResolvedActor> {
            match identifier.as_str() {
                "alice.example" | "did:plc:alice" => Ok(ResolvedActor {
                    did: "did:plc:alice".parse().unwrap(),
                    handle: "alice.example".parse().unwrap(),
                    pds: "https://pds1.example".parse().unwrap(),
                }),
                other => Err(ClientError::Resolution {
                    identifier: other.to_string(),
                    reason: "unknown".to_string(),
                }),
            }
        }
    }

    fn router(
        default: Arc<CountingHandler>,
        direct: Arc<RecordingPdsTransport>,
    ) -> RoutedHandler<StaticResolver> {
        let did: Did = "did:plc:self".parse().unwrap();
        RoutedHandler::new(did, default, StaticResolver).with_pds_transport(direct)
    }

    #[tokio::test]
    async fn test_own_repo_uses_default_transport() {
        let default = CountingHandler::new();
        let direct = RecordingPdsTransport::new();
        let handler = router(default.clone(), direct.clone());

        let request = XrpcRequest::get(XrpcRequest::xrpc_path(
            "com.atproto.repo.getRecord",
            &[("repo", "did:plc:self"), ("collection", "c"), ("rkey", "r")],
        ));
        handler.handle(&request).await.unwrap();

        assert_eq!(default.calls(), 1);
        assert!(direct.hosts().is_empty());
    }

    #[tokio::test]
    async fn test_missing_repo_uses_default_transport() {
        let default = CountingHandler::new();
        let direct = RecordingPdsTransport::new();
        let handler = router(default.clone(), direct.clone());

        handler
            .handle(&XrpcRequest::get("/xrpc/com.atproto.server.getSession"))
            .await
            .unwrap();

        assert_eq!(default.calls(), 1);
        assert!(direct.hosts().is_empty());
    }

    #[tokio::test]
    async fn test_foreign_repo_routes_to_resolved_pds() {
        let default = CountingHandler::new();
        let direct = RecordingPdsTransport::new();
        let handler = router(default.clone(), direct.clone());

        let request = XrpcRequest::get(XrpcRequest::xrpc_path(
            "com.atproto.repo.getRecord",
            &[("repo", "alice.example"), ("collection", "c"), ("rkey", "r")],
        ));
        handler.handle(&request).await.unwrap();

        // Sent to alice's PDS, never to the session's host.
        assert_eq!(default.calls(), 0);
        assert_eq!(direct.hosts(), vec!["https://pds1.example/".to_string()]);
    }

    #[tokio::test]
    async fn test_resolution_failure_is_an_error_not_a_fallback() {
        let default = CountingHandler::new();
        let direct = RecordingPdsTransport::new();
        let handler = router(default.clone(), direct.clone());

        let request = XrpcRequest::get(XrpcRequest::xrpc_path(
            "com.atproto.repo.getRecord",
            &[("repo", "unknown.example")],
        ));
        let err = handler.handle(&request).await.unwrap_err();

        assert!(matches!(err, ClientError::Resolution { .. }));
        assert_eq!(default.calls(), 0);
        assert!(direct.hosts().is_empty());
    }

    #[tokio::test]
    async fn test_get_responses_are_cached() {
        let default = CountingHandler::new();
        let direct = RecordingPdsTransport::new();
        let handler = router(default.clone(), direct.clone());

        let request = XrpcRequest::get("/xrpc/com.atproto.server.getSession");
        let first = handler.handle(&request).await.unwrap();
        let second = handler.handle(&request).await.unwrap();

        assert_eq!(first.body, second.body);
        assert_eq!(default.calls(), 1);
    }

    #[tokio::test]
    async fn test_non_get_is_never_cached() {
        let default = CountingHandler::new();
        let direct = RecordingPdsTransport::new();
        let handler = router(default.clone(), direct.clone());

        let request =
            XrpcRequest::post_json("/xrpc/com.atproto.repo.putRecord", &serde_json::json!({}))
                .unwrap();
        handler.handle(&request).await.unwrap();
        handler.handle(&request).await.unwrap();

        assert_eq!(default.calls(), 2);

        // A POST must not be served from a GET entry for the same path either.
        let get = XrpcRequest::get("/xrpc/com.atproto.repo.putRecord");
        handler.handle(&get).await.unwrap();
        handler.handle(&request).await.unwrap();
        assert_eq!(default.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_response_expires() {
        let default = CountingHandler::new();
        let direct = RecordingPdsTransport::new();
        let handler = router(default.clone(), direct.clone());

        let request = XrpcRequest::get("/xrpc/com.atproto.server.getSession");
        handler.handle(&request).await.unwrap();

        advance(Duration::from_secs(6 * 60)).await;
        handler.handle(&request).await.unwrap();

        assert_eq!(default.calls(), 2);
    }

    #[tokio::test]
    async fn test_failed_responses_are_not_cached() {
        struct FailingHandler;

        #[async_trait]
        impl FetchHandler for FailingHandler {
            async fn handle(&self, _request: &XrpcRequest) -> Result<XrpcResponse> {
                Ok(XrpcResponse {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    body: Bytes::new(),
                })
            }
        }

        let did: Did = "did:plc:self".parse().unwrap();
        let handler = RoutedHandler::new(did, Arc::new(FailingHandler), StaticResolver);

        let request = XrpcRequest::get("/xrpc/com.atproto.server.getSession");
        let response = handler.handle(&request).await.unwrap();

        // Non-success statuses pass through as-is and are never memoized.
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(handler.responses.is_empty());
    }
}

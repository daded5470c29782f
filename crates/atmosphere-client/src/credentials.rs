//! App-password authentication.
//!
//! The legacy alternative to the OAuth flow: trade an identifier + app
//! password for access tokens via `com.atproto.server.createSession` and get
//! back a bearer-authorized transport.

use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

use crate::error::{ClientError, Result};
use crate::identifier::{Did, Handle};
use crate::xrpc::{FetchHandler, ServiceTransport, XrpcRequest};

pub const DEFAULT_SERVICE: &str = "https://bsky.social";

#[derive(Debug, Clone)]
pub struct Credentials {
    pub identifier: String,
    pub password: String,
    /// Entryway/PDS to log in against; defaults to `https://bsky.social`.
    pub service: Option<Url>,
}

#[derive(Serialize)]
struct CreateSessionInput<'a> {
    identifier: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionOutput {
    did: Did,
    handle: Handle,
    access_jwt: String,
    #[serde(default)]
    refresh_jwt: Option<String>,
}

/// A logged-in app-password session.
pub struct CredentialSession {
    pub did: Did,
    pub handle: Handle,
    pub refresh_jwt: Option<String>,
    transport: ServiceTransport,
}

impl CredentialSession {
    /// Log in with an app password.
    pub async fn login(credentials: &Credentials) -> Result<Self> {
        let service = match &credentials.service {
            Some(service) => service.clone(),
            None => Url::parse(DEFAULT_SERVICE).map_err(|e| ClientError::BadRequest(e.to_string()))?,
        };

        let transport = ServiceTransport::new(service.clone());
        let request = XrpcRequest::post_json(
            "/xrpc/com.atproto.server.createSession",
            &CreateSessionInput {
                identifier: &credentials.identifier,
                password: &credentials.password,
            },
        )?;
        let response = transport.handle(&request).await?;
        if !response.ok() {
            return Err(ClientError::BadResponse {
                status: response.status.as_u16(),
                message: response.error_message(),
            });
        }
        let output: CreateSessionOutput = response.json()?;

        info!("Logged in as {} ({})", output.handle, output.did);
        Ok(Self {
            did: output.did,
            handle: output.handle,
            refresh_jwt: output.refresh_jwt,
            transport: transport.with_bearer(output.access_jwt),
        })
    }

    /// The bearer-authorized transport for this session.
    pub fn transport(&self) -> ServiceTransport {
        self.transport.clone()
    }
}

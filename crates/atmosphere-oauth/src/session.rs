//! Session record and the external capability seams.
//!
//! `AuthorizationProvider` is the boundary to the actual OAuth protocol
//! implementation (PAR, PKCE, DPoP, token refresh). This crate orchestrates
//! around it and never looks inside `Session::data`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use atmosphere_client::{ActorIdentifier, Did, Handle};

use crate::error::{AuthError, Result};
use crate::listener::CallbackParams;

/// An authorized session for a DID.
///
/// `data` is the opaque credential bundle (tokens, expiry, DPoP keys)
/// owned by the `AuthorizationProvider`; it round-trips through the
/// `SessionStore` untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub did: Did,
    #[serde(default)]
    pub handle: Option<Handle>,
    pub pds: Url,
    pub data: Value,
}

/// A constructed authorization request: the URL to open in the user agent
/// and the state nonce that will come back on the redirect.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    pub url: Url,
    pub state: String,
}

/// External OAuth protocol capability.
#[async_trait]
pub trait AuthorizationProvider: Send + Sync {
    /// Build an authorization request for an account, scoped to `scope`,
    /// redirecting to `redirect_uri`.
    async fn begin(
        &self,
        identifier: &ActorIdentifier,
        redirect_uri: &Url,
        scope: &str,
    ) -> Result<AuthRequest>;

    /// Exchange callback parameters for a session.
    async fn exchange(&self, params: &CallbackParams, redirect_uri: &Url) -> Result<Session>;

    /// Refresh a stored session's credentials.
    ///
    /// Fails with `SessionExpired` when the credentials can no longer be
    /// refreshed.
    async fn refresh(&self, session: &Session) -> Result<Session>;

    /// Invalidate the session's grants server-side.
    async fn revoke(&self, session: &Session) -> Result<()>;
}

/// Hands the authorization URL to an external user agent.
pub trait UserAgent: Send + Sync {
    fn open(&self, url: &Url) -> Result<()>;
}

/// Opens the URL in the system default browser.
pub struct SystemBrowser;

impl UserAgent for SystemBrowser {
    fn open(&self, url: &Url) -> Result<()> {
        let result = {
            #[cfg(target_os = "macos")]
            {
                std::process::Command::new("open").arg(url.as_str()).spawn()
            }
            #[cfg(target_os = "windows")]
            {
                std::process::Command::new("cmd")
                    .args(["/C", "start", url.as_str()])
                    .spawn()
            }
            #[cfg(not(any(target_os = "macos", target_os = "windows")))]
            {
                std::process::Command::new("xdg-open").arg(url.as_str()).spawn()
            }
        };
        result.map(|_| ()).map_err(|e| AuthError::Browser(e.to_string()))
    }
}

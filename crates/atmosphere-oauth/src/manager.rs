//! Session manager: authorize, restore, revoke.
//!
//! Orchestrates the authorization-code flow across the callback transport,
//! the external `AuthorizationProvider`, and the `SessionStore`. One
//! long-lived listener instance is owned here and reused across calls.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};
use url::Url;

use atmosphere_client::{ActorIdentifier, Did};

use crate::error::{AuthError, Result};
use crate::listener::{CALLBACK_TIMEOUT, CallbackTransport, LoopbackListener};
use crate::session::{AuthorizationProvider, Session, SystemBrowser, UserAgent};
use crate::state::StateStore;
use crate::store::SessionStore;

/// Resource capabilities requested on every authorize call. Fixed, not
/// configurable per call: account identity plus the record collections the
/// app reads and writes.
pub const AUTH_SCOPE: &str = "atproto include:at.margin.authFull \
     repo:site.standard.document \
     repo:network.cosmik.card \
     repo:network.cosmik.collection \
     repo:network.cosmik.collectionLink";

pub struct SessionManager {
    provider: Arc<dyn AuthorizationProvider>,
    store: Arc<dyn SessionStore>,
    transport: Arc<dyn CallbackTransport>,
    user_agent: Arc<dyn UserAgent>,
    states: StateStore<ActorIdentifier>,
    callback_timeout: Duration,
}

impl SessionManager {
    /// Manager with the default loopback listener and system browser.
    pub fn new(provider: Arc<dyn AuthorizationProvider>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            provider,
            store,
            transport: Arc::new(LoopbackListener::new()),
            user_agent: Arc::new(SystemBrowser),
            states: StateStore::new(),
            callback_timeout: CALLBACK_TIMEOUT,
        }
    }

    /// Substitute the callback transport (e.g. a hosted redirect endpoint).
    pub fn with_transport(mut self, transport: Arc<dyn CallbackTransport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_user_agent(mut self, user_agent: Arc<dyn UserAgent>) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    /// Run the authorization-code flow for an account.
    ///
    /// Validates the identifier before any network activity, opens the
    /// authorization URL in the user agent, then suspends until the redirect
    /// arrives. The callback timeout counts from the start of this call, so
    /// time spent building the authorization request eats into the deadline.
    /// The exchanged session is persisted before it is returned.
    pub async fn authorize(&self, identifier: &str) -> Result<Session> {
        let started = Instant::now();
        let identifier: ActorIdentifier = identifier.parse()?;

        let wait = self.transport.start().await?;
        let redirect_uri = wait.redirect_uri().clone();

        let request = self
            .provider
            .begin(&identifier, &redirect_uri, AUTH_SCOPE)
            .await?;
        self.states.insert(request.state.clone(), identifier.clone());

        info!("Opening authorization prompt for {identifier}");
        self.user_agent.open(&request.url)?;

        let remaining = self.callback_timeout.saturating_sub(started.elapsed());
        let params = wait.wait_for(remaining).await?;
        if let Some(error) = params.error() {
            return Err(AuthError::TokenExchange(format!(
                "authorization server returned {error:?}"
            )));
        }
        let state = params
            .state()
            .ok_or_else(|| AuthError::TokenExchange("callback carried no state".to_string()))?;
        if self.states.take(state).is_none() {
            return Err(AuthError::TokenExchange(
                "unknown or expired authorization state".to_string(),
            ));
        }

        let session = self.provider.exchange(&params, &redirect_uri).await?;
        self.store.set(&session.did, session.clone()).await?;
        info!("Authorized {} on {}", session.did, session.pds);
        Ok(session)
    }

    /// Restore a persisted session, refreshing its credentials.
    pub async fn restore(&self, did: &str) -> Result<Session> {
        let did: Did = did.parse()?;
        let stored = self
            .store
            .get(&did)
            .await?
            .ok_or_else(|| AuthError::SessionNotFound(did.clone()))?;

        let refreshed = self.provider.refresh(&stored).await?;
        self.store.set(&did, refreshed.clone()).await?;
        Ok(refreshed)
    }

    /// Revoke a session's grants and forget it locally.
    ///
    /// Remote revocation is best-effort: a network failure still removes the
    /// local entry so the user is never stuck logged in with dead remote
    /// credentials.
    pub async fn revoke(&self, did: &str) -> Result<()> {
        let did: Did = did.parse()?;

        if let Some(session) = self.store.get(&did).await? {
            if let Err(e) = self.provider.revoke(&session).await {
                warn!("Remote revocation for {did} failed ({e}); removing local session");
            }
        }
        self.store.delete(&did).await?;
        info!("Revoked session for {did}");
        Ok(())
    }

    /// Abandon an in-flight authorize call; its waiter rejects with
    /// `AuthorizationCancelled`.
    pub async fn cancel(&self) {
        self.transport.cancel().await;
    }

    /// The store sessions are persisted through.
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }
}

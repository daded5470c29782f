//! End-to-end authorization flow tests.
//!
//! Runs the real loopback listener and plays the authorization server's
//! part with an HTTP client: the "browser" fetches the redirect URI with
//! the callback parameters, exactly as a real redirect would.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use atmosphere_client::ActorIdentifier;
use atmosphere_oauth::{
    AuthError, AuthRequest, AuthorizationProvider, CallbackParams, CallbackTransport,
    LoopbackListener, MemorySessionStore, Result, Session, SessionManager, SessionStore,
    UserAgent,
};

/// Provider stub: records the redirect URI it was asked to use and accepts
/// one fixed code.
struct StubProvider {
    redirect_uris: Mutex<Vec<Url>>,
}

impl StubProvider {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            redirect_uris: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl AuthorizationProvider for StubProvider {
    async fn begin(
        &self,
        _identifier: &ActorIdentifier,
        redirect_uri: &Url,
        _scope: &str,
    ) -> Result<AuthRequest> {
        self.redirect_uris.lock().unwrap().push(redirect_uri.clone());
        Ok(AuthRequest {
            url: "https://pds1.example/oauth/authorize?request_uri=abc"
                .parse()
                .unwrap(),
            state: "state-e2e".to_string(),
        })
    }

    async fn exchange(&self, params: &CallbackParams, _redirect_uri: &Url) -> Result<Session> {
        if params.code() != Some("code-e2e") {
            return Err(AuthError::TokenExchange("wrong code".to_string()));
        }
        Ok(Session {
            did: "did:plc:e2e".parse().unwrap(),
            handle: Some("alice.example".parse().unwrap()),
            pds: "https://pds1.example".parse().unwrap(),
            data: serde_json::json!({"opaque": true}),
        })
    }

    async fn refresh(&self, session: &Session) -> Result<Session> {
        Ok(session.clone())
    }

    async fn revoke(&self, _session: &Session) -> Result<()> {
        Ok(())
    }
}

/// "Browser" that immediately completes the flow by fetching the callback.
struct AutoCompletingBrowser {
    redirect_uri: Mutex<Option<Url>>,
    query: &'static str,
}

impl AutoCompletingBrowser {
    fn new(query: &'static str) -> Arc<Self> {
        Arc::new(Self {
            redirect_uri: Mutex::new(None),
            query,
        })
    }

    fn arm(&self, redirect_uri: Url) {
        *self.redirect_uri.lock().unwrap() = Some(redirect_uri);
    }
}

impl UserAgent for AutoCompletingBrowser {
    fn open(&self, _url: &Url) -> Result<()> {
        let redirect_uri = self.redirect_uri.lock().unwrap().clone().unwrap();
        let callback = format!("{redirect_uri}?{}", self.query);
        tokio::spawn(async move {
            let response = reqwest::get(callback).await.unwrap();
            assert_eq!(response.status(), 200);
            let page = response.text().await.unwrap();
            assert!(page.contains("Authenticated"));
        });
        Ok(())
    }
}

#[tokio::test]
async fn full_authorize_flow_against_live_listener() {
    let provider = StubProvider::new();
    let store = Arc::new(MemorySessionStore::new());
    let listener = Arc::new(LoopbackListener::new());
    let browser = AutoCompletingBrowser::new("code=code-e2e&state=state-e2e");

    // Learn the redirect URI the listener picked so the browser can hit it.
    // Kept alive: dropping it would settle the wait and release the port.
    // The manager's own start() supersedes it and reuses the listener.
    let probe = listener.start().await.unwrap();
    browser.arm(probe.redirect_uri().clone());

    let manager = SessionManager::new(provider.clone(), store.clone())
        .with_transport(listener.clone())
        .with_user_agent(browser);

    let session = manager.authorize("alice.example").await.unwrap();
    assert_eq!(session.did.as_str(), "did:plc:e2e");

    // The provider saw the listener's loopback redirect URI.
    let seen = provider.redirect_uris.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].as_str().starts_with("http://127.0.0.1:"));
    assert!(seen[0].as_str().ends_with("/callback"));

    // And the session was persisted.
    let did = "did:plc:e2e".parse().unwrap();
    assert!(store.get(&did).await.unwrap().is_some());
}

#[tokio::test]
async fn unknown_paths_return_404_without_disturbing_the_wait() {
    let listener = LoopbackListener::new();
    let wait = listener.start().await.unwrap();
    let redirect_uri = wait.redirect_uri().clone();

    let base = redirect_uri.as_str().trim_end_matches("/callback").to_string();
    let response = reqwest::get(format!("{base}/favicon.ico")).await.unwrap();
    assert_eq!(response.status(), 404);

    // The pending wait is still live: deliver the real callback afterwards.
    let deliver = reqwest::get(format!("{redirect_uri}?code=abc&state=s"));
    let (delivered, params) = tokio::join!(deliver, wait.wait_for(Duration::from_secs(5)));
    assert_eq!(delivered.unwrap().status(), 200);
    assert_eq!(params.unwrap().code(), Some("abc"));
}

#[tokio::test]
async fn second_wait_supersedes_first_and_exactly_one_resolves() {
    let listener = LoopbackListener::new();

    let first = listener.start().await.unwrap();
    let second = listener.start().await.unwrap();
    assert_eq!(first.redirect_uri(), second.redirect_uri());
    let redirect_uri = second.redirect_uri().clone();

    // The superseded waiter rejects; it must not be resolvable anymore.
    let err = first.wait_for(Duration::from_secs(5)).await.unwrap_err();
    assert!(matches!(err, AuthError::AuthorizationCancelled));

    // Delivering one callback resolves exactly the live waiter.
    let deliver = reqwest::get(format!("{redirect_uri}?code=only-once&state=s"));
    let (_, params) = tokio::join!(deliver, second.wait_for(Duration::from_secs(5)));
    assert_eq!(params.unwrap().code(), Some("only-once"));
}

#[tokio::test]
async fn timeout_leaves_no_stuck_state_and_next_authorize_succeeds() {
    let provider = StubProvider::new();
    let store = Arc::new(MemorySessionStore::new());
    let listener = Arc::new(LoopbackListener::new());

    /// Browser that never completes the flow.
    struct InertBrowser;
    impl UserAgent for InertBrowser {
        fn open(&self, _url: &Url) -> Result<()> {
            Ok(())
        }
    }

    let manager = SessionManager::new(provider.clone(), store.clone())
        .with_transport(listener.clone())
        .with_user_agent(Arc::new(InertBrowser))
        .with_callback_timeout(Duration::from_millis(100));

    let err = manager.authorize("alice.example").await.unwrap_err();
    assert!(matches!(err, AuthError::CallbackTimeout));

    // A fresh authorize starts cleanly: new listener, working callback.
    let browser = AutoCompletingBrowser::new("code=code-e2e&state=state-e2e");
    let probe = listener.start().await.unwrap();
    browser.arm(probe.redirect_uri().clone());

    let manager = SessionManager::new(provider, store)
        .with_transport(listener)
        .with_user_agent(browser);
    let session = manager.authorize("alice.example").await.unwrap();
    assert_eq!(session.did.as_str(), "did:plc:e2e");
}

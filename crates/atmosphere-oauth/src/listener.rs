//! Loopback callback listener.
//!
//! An ephemeral HTTP endpoint on an OS-assigned `127.0.0.1` port that
//! receives the authorization redirect and hands its query parameters to
//! exactly one waiting caller. Lifecycle:
//! Idle -> Starting -> Listening -> (Delivered | TimedOut | Cancelled) -> Idle.
//!
//! At most one pending waiter exists at a time. A second concurrent
//! `start()` reuses the running listener and *supersedes* the pending
//! waiter: the superseded wait rejects with `AuthorizationCancelled` and
//! only the newest wait can be fulfilled.
//!
//! `LoopbackListener` sits behind the `CallbackTransport` trait so a
//! different redirect strategy (e.g. a statically hosted redirect page
//! relaying parameters) can be substituted without touching the session
//! manager.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::{AuthError, Result};

/// How long a pending wait survives without a callback.
pub const CALLBACK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Confirmation page returned to the inbound redirect. Cosmetic only; the
/// protocol outcome is decided by the session manager from the parameters.
const CONFIRMATION_HTML: &str = r#"<!doctype html>
<html>
<head>
	<meta charset="UTF-8">
	<title>Authentication Successful</title>
	<style>
		body {
			font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif;
			display: flex;
			align-items: center;
			justify-content: center;
			min-height: 100vh;
			margin: 0;
			background: #f0f9ff;
		}
		.container {
			text-align: center;
			padding: 2rem;
			background: white;
			border-radius: 8px;
			box-shadow: 0 2px 8px rgba(0,0,0,0.1);
		}
		h1 { color: #0ea5e9; margin: 0 0 1rem 0; }
		p { color: #6b7280; margin: 0; }
	</style>
</head>
<body>
	<div class="container">
		<h1>&#9989; Authenticated!</h1>
		<p>You can close this window and return to the app.</p>
	</div>
</body>
</html>"#;

/// The query parameters delivered by the authorization redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackParams {
    params: Vec<(String, String)>,
}

impl CallbackParams {
    pub fn from_query(query: &str) -> Self {
        Self {
            params: url::form_urlencoded::parse(query.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn code(&self) -> Option<&str> {
        self.get("code")
    }

    pub fn state(&self) -> Option<&str> {
        self.get("state")
    }

    /// The authorization server's error code, if the user denied consent.
    pub fn error(&self) -> Option<&str> {
        self.get("error")
    }
}

/// Inbound endpoint that delivers the redirect to a waiting caller.
#[async_trait]
pub trait CallbackTransport: Send + Sync {
    /// Start (or reuse) the listener and register a pending wait.
    async fn start(&self) -> Result<CallbackWait>;

    /// Abandon the flow: the pending waiter rejects with
    /// `AuthorizationCancelled` and the endpoint is released.
    async fn cancel(&self);
}

struct RunningServer {
    redirect_uri: Url,
    shutdown_tx: oneshot::Sender<()>,
}

/// State shared between the axum handler, waits, and the listener itself.
struct Shared {
    /// The single pending waiter, tagged with its generation.
    pending: Mutex<Option<(u64, oneshot::Sender<CallbackParams>)>>,
    generation: AtomicU64,
    server: Mutex<Option<RunningServer>>,
}

impl Shared {
    /// Settle a wait: clear pending state and release the port.
    ///
    /// A superseded wait (a newer generation took the pending slot) must not
    /// tear the listener down under the active waiter's feet.
    fn release(&self, generation: u64) {
        {
            let mut pending = self.pending.lock().unwrap();
            match pending.as_ref() {
                Some((current, _)) if *current != generation => return,
                _ => {
                    pending.take();
                }
            }
        }
        self.shutdown_server();
    }

    fn shutdown_server(&self) {
        if let Some(server) = self.server.lock().unwrap().take() {
            let _ = server.shutdown_tx.send(());
            debug!("Callback listener at {} shut down", server.redirect_uri);
        }
    }
}

/// A registered pending wait: the redirect URI to hand to the authorization
/// server and the receive side of the single-use callback slot.
pub struct CallbackWait {
    redirect_uri: Url,
    receiver: oneshot::Receiver<CallbackParams>,
    generation: u64,
    shared: Option<Arc<Shared>>,
    settled: bool,
}

impl CallbackWait {
    /// Build a wait for a non-loopback transport (nothing to release on
    /// settle).
    pub fn new(redirect_uri: Url, receiver: oneshot::Receiver<CallbackParams>) -> Self {
        Self {
            redirect_uri,
            receiver,
            generation: 0,
            shared: None,
            settled: false,
        }
    }

    pub fn redirect_uri(&self) -> &Url {
        &self.redirect_uri
    }

    /// Await the callback under the default 5-minute deadline.
    pub async fn wait(self) -> Result<CallbackParams> {
        self.wait_for(CALLBACK_TIMEOUT).await
    }

    /// Await the callback under an explicit deadline.
    ///
    /// Whatever the outcome, this wait's pending state is cleared and the
    /// listener port released (unless a newer wait superseded this one), so
    /// a fresh `authorize` can start cleanly afterwards.
    pub async fn wait_for(mut self, deadline: Duration) -> Result<CallbackParams> {
        let outcome = match tokio::time::timeout(deadline, &mut self.receiver).await {
            Ok(Ok(params)) => Ok(params),
            // Sender dropped: cancelled, or superseded by a newer wait.
            Ok(Err(_)) => Err(AuthError::AuthorizationCancelled),
            Err(_) => Err(AuthError::CallbackTimeout),
        };
        self.settle();
        outcome
    }

    fn settle(&mut self) {
        if !self.settled {
            self.settled = true;
            if let Some(shared) = &self.shared {
                shared.release(self.generation);
            }
        }
    }
}

impl Drop for CallbackWait {
    // An abandoned wait (e.g. the flow errored before waiting) must not
    // leave a stuck pending slot or a bound port behind.
    fn drop(&mut self) {
        self.settle();
    }
}

/// Single-use-at-a-time HTTP listener on `127.0.0.1:<ephemeral-port>`.
pub struct LoopbackListener {
    shared: Arc<Shared>,
}

impl LoopbackListener {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                pending: Mutex::new(None),
                generation: AtomicU64::new(0),
                server: Mutex::new(None),
            }),
        }
    }

    async fn ensure_server(&self) -> Result<Url> {
        if let Some(running) = self.shared.server.lock().unwrap().as_ref() {
            return Ok(running.redirect_uri.clone());
        }

        // Bind before taking the lock again; if another task won the race in
        // the meantime, the extra socket is simply dropped.
        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(|e| AuthError::ListenerBind(e.to_string()))?;
        let port = listener
            .local_addr()
            .map_err(|e| AuthError::ListenerBind(e.to_string()))?
            .port();
        let redirect_uri: Url = format!("http://127.0.0.1:{port}/callback")
            .parse()
            .map_err(|e| AuthError::ListenerBind(format!("{e}")))?;

        let mut server = self.shared.server.lock().unwrap();
        if let Some(running) = server.as_ref() {
            return Ok(running.redirect_uri.clone());
        }

        let app = Router::new()
            .route("/callback", get(handle_callback))
            .fallback(not_found)
            .with_state(self.shared.clone());
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = serve.await {
                error!("Callback listener failed: {e}");
            }
        });

        info!("Callback listener on {redirect_uri}");
        *server = Some(RunningServer {
            redirect_uri: redirect_uri.clone(),
            shutdown_tx,
        });
        Ok(redirect_uri)
    }
}

impl Default for LoopbackListener {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CallbackTransport for LoopbackListener {
    async fn start(&self) -> Result<CallbackWait> {
        let redirect_uri = self.ensure_server().await?;

        let (tx, rx) = oneshot::channel();
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let superseded = self
            .shared
            .pending
            .lock()
            .unwrap()
            .replace((generation, tx));
        if superseded.is_some() {
            warn!("New authorization wait supersedes an in-flight one");
        }

        Ok(CallbackWait {
            redirect_uri,
            receiver: rx,
            generation,
            shared: Some(self.shared.clone()),
            settled: false,
        })
    }

    async fn cancel(&self) {
        self.shared.pending.lock().unwrap().take();
        self.shared.shutdown_server();
    }
}

async fn handle_callback(
    State(shared): State<Arc<Shared>>,
    RawQuery(query): RawQuery,
) -> Html<&'static str> {
    let params = CallbackParams::from_query(query.as_deref().unwrap_or(""));
    match shared.pending.lock().unwrap().take() {
        Some((_, tx)) => {
            if tx.send(params).is_err() {
                warn!("Callback arrived but the waiter was already gone");
            }
        }
        None => warn!("Callback arrived with no pending waiter"),
    }
    Html(CONFIRMATION_HTML)
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not Found")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_params_parsing() {
        let params = CallbackParams::from_query("code=abc&state=xyz&iss=https%3A%2F%2Fpds");
        assert_eq!(params.code(), Some("abc"));
        assert_eq!(params.state(), Some("xyz"));
        assert_eq!(params.get("iss"), Some("https://pds"));
        assert_eq!(params.error(), None);

        let denied = CallbackParams::from_query("error=access_denied&state=xyz");
        assert_eq!(denied.error(), Some("access_denied"));
        assert_eq!(denied.code(), None);
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let listener = LoopbackListener::new();
        let wait = listener.start().await.unwrap();

        let err = wait.wait_for(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, AuthError::CallbackTimeout));

        // Pending state is gone; a fresh wait can be registered.
        assert!(listener.shared.pending.lock().unwrap().is_none());
        let wait = listener.start().await.unwrap();
        assert!(wait.redirect_uri().as_str().starts_with("http://127.0.0.1:"));
    }

    #[tokio::test]
    async fn test_cancel_rejects_pending_waiter() {
        let listener = LoopbackListener::new();
        let wait = listener.start().await.unwrap();

        listener.cancel().await;
        let err = wait.wait_for(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, AuthError::AuthorizationCancelled));
    }

    #[tokio::test]
    async fn test_dropped_wait_releases_listener() {
        let listener = LoopbackListener::new();
        let wait = listener.start().await.unwrap();
        drop(wait);

        assert!(listener.shared.pending.lock().unwrap().is_none());
        assert!(listener.shared.server.lock().unwrap().is_none());
    }
}

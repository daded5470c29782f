//! atmosphere-oauth: OAuth session lifecycle for the AT Protocol.
//!
//! Drives the authorization-code flow through an external user-agent:
//! a loopback callback listener receives the redirect, the pending wait is
//! bounded by a timeout and cancellable, and the exchanged session is
//! persisted through a caller-supplied `SessionStore`.
//!
//! The cryptographic token-exchange protocol itself (PKCE, DPoP, PAR) is the
//! concern of an `AuthorizationProvider` implementation, not of this crate.

pub mod error;
pub mod listener;
pub mod manager;
pub mod session;
pub mod state;
pub mod store;

pub use error::{AuthError, Result};
pub use listener::{
    CallbackParams, CallbackTransport, CallbackWait, LoopbackListener, CALLBACK_TIMEOUT,
};
pub use manager::{SessionManager, AUTH_SCOPE};
pub use session::{AuthRequest, AuthorizationProvider, Session, SystemBrowser, UserAgent};
pub use state::StateStore;
pub use store::{FileSessionStore, MemorySessionStore, SessionStore};

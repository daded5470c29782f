//! atmosphere-client: Routed XRPC client for the AT Protocol.
//!
//! This crate provides the request-side half of the Atmosphere stack:
//! - Syntax types for DIDs, handles, and actor identifiers
//! - A strict-expiry TTL cache
//! - Actor resolution (identifier -> DID + PDS host) with caching
//! - A routed fetch handler that sends each request to the PDS that
//!   actually owns the target repo
//! - Thin record helpers over any fetch handler
//!
//! The OAuth session lifecycle lives in the `atmosphere-oauth` crate.

pub mod cache;
pub mod client;
pub mod credentials;
pub mod error;
pub mod identifier;
pub mod resolver;
pub mod router;
pub mod xrpc;

pub use cache::TtlCache;
pub use client::{Client, RecordEnvelope};
pub use credentials::{CredentialSession, Credentials};
pub use error::{ClientError, Result};
pub use identifier::{ActorIdentifier, Did, Handle, IdentifierError};
pub use resolver::{CachedResolver, HttpResolver, IdentityResolver, ResolvedActor};
pub use router::{HttpPdsTransport, PdsTransport, RoutedHandler};
pub use xrpc::{FetchHandler, ServiceTransport, XrpcRequest, XrpcResponse};

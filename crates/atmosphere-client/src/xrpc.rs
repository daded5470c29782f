//! XRPC request/response model and the `FetchHandler` seam.
//!
//! Every outbound call in this crate goes through a `FetchHandler`.
//! Implementations:
//! - `ServiceTransport` - plain HTTP against a fixed service base URL
//! - `RoutedHandler` (in `router`) - per-repo PDS routing with caching
//! - the session transport provided by `atmosphere-oauth`

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::{ClientError, Result};

/// An XRPC request addressed by path, e.g.
/// `/xrpc/com.atproto.repo.getRecord?repo=...&collection=...&rkey=...`.
///
/// The path carries the query string exactly as the protocol's endpoints
/// encode it; handlers never alter the body.
#[derive(Debug, Clone)]
pub struct XrpcRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Bytes>,
    pub content_type: Option<String>,
}

impl XrpcRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            body: None,
            content_type: None,
        }
    }

    pub fn post_json<T: Serialize>(path: impl Into<String>, input: &T) -> Result<Self> {
        let body = serde_json::to_vec(input)
            .map_err(|e| ClientError::BadRequest(format!("failed to encode input: {e}")))?;
        Ok(Self {
            method: Method::POST,
            path: path.into(),
            body: Some(Bytes::from(body)),
            content_type: Some("application/json".to_string()),
        })
    }

    /// Build a path from an XRPC method NSID and query parameters.
    pub fn xrpc_path(nsid: &str, params: &[(&str, &str)]) -> String {
        if params.is_empty() {
            return format!("/xrpc/{nsid}");
        }
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        for (name, value) in params {
            query.append_pair(name, value);
        }
        format!("/xrpc/{nsid}?{}", query.finish())
    }

    /// Extract a query parameter from the request path.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let (_, query) = self.path.split_once('?')?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }
}

/// A buffered XRPC response.
///
/// Bodies are held as `Bytes` so responses are cheap to clone, which the
/// GET-response cache relies on: a cache hit hands out a fresh copy, never
/// the object another caller already consumed.
#[derive(Debug, Clone)]
pub struct XrpcResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl XrpcResponse {
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| ClientError::Transport(format!("failed to decode response body: {e}")))
    }

    /// Best-effort extraction of the server's error message from an XRPC
    /// error body (`{"error": ..., "message": ...}`).
    pub fn error_message(&self) -> Option<String> {
        let value: serde_json::Value = serde_json::from_slice(&self.body).ok()?;
        value
            .get("message")
            .or_else(|| value.get("error"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }
}

/// The single entry point all outbound calls pass through.
#[async_trait]
pub trait FetchHandler: Send + Sync {
    async fn handle(&self, request: &XrpcRequest) -> Result<XrpcResponse>;
}

/// Unauthenticated transport bound to a service base URL.
///
/// Repo-scoped reads on this protocol are served without authorization, so
/// this is also what the router uses when it redirects a request to another
/// account's PDS.
#[derive(Clone)]
pub struct ServiceTransport {
    service: Url,
    http: reqwest::Client,
    authorization: Option<String>,
}

impl ServiceTransport {
    pub fn new(service: Url) -> Self {
        Self::with_client(reqwest::Client::new(), service)
    }

    pub fn with_client(http: reqwest::Client, service: Url) -> Self {
        Self {
            service,
            http,
            authorization: None,
        }
    }

    /// Attach a bearer token to every request issued by this transport.
    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.authorization = Some(format!("Bearer {}", token.into()));
        self
    }

    pub fn service(&self) -> &Url {
        &self.service
    }
}

#[async_trait]
impl FetchHandler for ServiceTransport {
    async fn handle(&self, request: &XrpcRequest) -> Result<XrpcResponse> {
        let url = self
            .service
            .join(&request.path)
            .map_err(|e| ClientError::BadRequest(format!("invalid request path: {e}")))?;

        let mut builder = self.http.request(request.method.clone(), url);
        if let Some(authorization) = &self.authorization {
            builder = builder.header(http::header::AUTHORIZATION, authorization);
        }
        if let Some(content_type) = &request.content_type {
            builder = builder.header(http::header::CONTENT_TYPE, content_type);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        Ok(XrpcResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xrpc_path_encodes_params() {
        let path = XrpcRequest::xrpc_path(
            "com.atproto.repo.getRecord",
            &[("repo", "did:plc:abc"), ("collection", "app.bsky.feed.post"), ("rkey", "3k")],
        );
        assert_eq!(
            path,
            "/xrpc/com.atproto.repo.getRecord?repo=did%3Aplc%3Aabc&collection=app.bsky.feed.post&rkey=3k"
        );

        assert_eq!(
            XrpcRequest::xrpc_path("com.atproto.server.createSession", &[]),
            "/xrpc/com.atproto.server.createSession"
        );
    }

    #[test]
    fn test_query_param_extraction() {
        let request =
            XrpcRequest::get("/xrpc/com.atproto.repo.getRecord?repo=did%3Aplc%3Aabc&rkey=3k");
        assert_eq!(request.query_param("repo").as_deref(), Some("did:plc:abc"));
        assert_eq!(request.query_param("rkey").as_deref(), Some("3k"));
        assert_eq!(request.query_param("collection"), None);

        let no_query = XrpcRequest::get("/xrpc/com.atproto.server.getSession");
        assert_eq!(no_query.query_param("repo"), None);
    }

    #[test]
    fn test_post_json_sets_content_type() {
        let request =
            XrpcRequest::post_json("/xrpc/x.y.z", &serde_json::json!({"a": 1})).unwrap();
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.content_type.as_deref(), Some("application/json"));
        assert_eq!(request.body.as_deref(), Some(br#"{"a":1}"# as &[u8]));
    }

    #[test]
    fn test_error_message_extraction() {
        let response = XrpcResponse {
            status: StatusCode::BAD_REQUEST,
            body: Bytes::from_static(br#"{"error":"InvalidRequest","message":"no such record"}"#),
        };
        assert!(!response.ok());
        assert_eq!(response.error_message().as_deref(), Some("no such record"));

        let opaque = XrpcResponse {
            status: StatusCode::BAD_GATEWAY,
            body: Bytes::from_static(b"<html>"),
        };
        assert_eq!(opaque.error_message(), None);
    }
}

//! High-level client: record helpers over any fetch handler.
//!
//! Each helper serializes exactly one XRPC call and maps non-success
//! statuses to `ClientError::BadResponse` with the server's message.

use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::error::{ClientError, Result};
use crate::xrpc::{FetchHandler, XrpcRequest, XrpcResponse};

/// A repo record as returned by `com.atproto.repo.getRecord`.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordEnvelope {
    pub uri: String,
    #[serde(default)]
    pub cid: Option<String>,
    pub value: Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PutRecordInput<'a, T> {
    repo: &'a str,
    collection: &'a str,
    rkey: &'a str,
    record: &'a T,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteRecordInput<'a> {
    repo: &'a str,
    collection: &'a str,
    rkey: &'a str,
}

/// Client over a fetch handler. Hand it a `RoutedHandler` to get per-repo
/// PDS routing on every call.
pub struct Client {
    handler: Arc<dyn FetchHandler>,
}

impl Client {
    pub fn new(handler: Arc<dyn FetchHandler>) -> Self {
        Self { handler }
    }

    /// Issue a GET query against an XRPC method.
    pub async fn get(&self, nsid: &str, params: &[(&str, &str)]) -> Result<XrpcResponse> {
        let request = XrpcRequest::get(XrpcRequest::xrpc_path(nsid, params));
        self.handler.handle(&request).await
    }

    /// Issue a JSON procedure call against an XRPC method.
    pub async fn post<T: Serialize>(&self, nsid: &str, input: &T) -> Result<XrpcResponse> {
        let request = XrpcRequest::post_json(XrpcRequest::xrpc_path(nsid, &[]), input)?;
        self.handler.handle(&request).await
    }

    /// Fetch a single record from a repo.
    pub async fn get_record(
        &self,
        repo: &str,
        collection: &str,
        rkey: &str,
    ) -> Result<RecordEnvelope> {
        let response = self
            .get(
                "com.atproto.repo.getRecord",
                &[("repo", repo), ("collection", collection), ("rkey", rkey)],
            )
            .await?;
        expect_success(&response)?;
        response.json()
    }

    /// Write a record at a known rkey, creating or replacing it.
    pub async fn put_record<T: Serialize>(
        &self,
        repo: &str,
        collection: &str,
        rkey: &str,
        record: &T,
    ) -> Result<()> {
        let response = self
            .post(
                "com.atproto.repo.putRecord",
                &PutRecordInput {
                    repo,
                    collection,
                    rkey,
                    record,
                },
            )
            .await?;
        expect_success(&response)
    }

    /// Delete a record.
    pub async fn delete_record(&self, repo: &str, collection: &str, rkey: &str) -> Result<()> {
        let response = self
            .post(
                "com.atproto.repo.deleteRecord",
                &DeleteRecordInput {
                    repo,
                    collection,
                    rkey,
                },
            )
            .await?;
        expect_success(&response)
    }

    /// Fetch an actor's profile view from the AppView.
    pub async fn get_profile(&self, actor: &str) -> Result<Value> {
        let response = self
            .get("app.bsky.actor.getProfile", &[("actor", actor)])
            .await?;
        expect_success(&response)?;
        response.json()
    }
}

fn expect_success(response: &XrpcResponse) -> Result<()> {
    if response.ok() {
        return Ok(());
    }
    Err(ClientError::BadResponse {
        status: response.status.as_u16(),
        message: response.error_message(),
    })
}

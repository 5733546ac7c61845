//! Backend RPC: profile lookup for the current caller.
//!
//! The main service answers `find_me` with `{"ok": profile}` or
//! `{"err": message}`. The session treats every failure mode (remote error,
//! not found, transport failure) as "no profile".

use async_trait::async_trait;
use rally_types::{RpcResult, UserProfile};

use crate::constants::CALLER_HEADER;
use crate::provider::ActorHandle;

/// Errors from backend calls.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("backend error: {0}")]
    Remote(String),
}

/// Profile lookup contract the configure phase depends on.
#[async_trait]
pub trait ProfileBackend: Send + Sync {
    /// Profile of `actor.caller`, `Ok(None)` if the caller has none.
    async fn find_me(&self, actor: &ActorHandle) -> Result<Option<UserProfile>, BackendError>;
}

/// JSON-over-HTTP client for the main service.
#[derive(Clone, Default)]
pub struct HttpProfileBackend {
    http: reqwest::Client,
}

impl HttpProfileBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

/// Decode a `find_me` response body.
pub fn decode_find_me(body: &[u8]) -> Result<UserProfile, BackendError> {
    let result: RpcResult<UserProfile> = serde_json::from_slice(body)?;
    result.into_result().map_err(BackendError::Remote)
}

#[async_trait]
impl ProfileBackend for HttpProfileBackend {
    async fn find_me(&self, actor: &ActorHandle) -> Result<Option<UserProfile>, BackendError> {
        let response = self
            .http
            .post(actor.method_url("find_me"))
            .header(CALLER_HEADER, actor.caller.to_text())
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(BackendError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        decode_find_me(&body).map(Some)
    }
}

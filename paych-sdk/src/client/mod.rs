//! Clients for both paych transports.
//!
//! Gated behind the `client` cargo feature so downstream crates that only
//! need the shared types do not pull in `reqwest` or `tokio-tungstenite`.

mod raw;
mod stream;

pub use raw::RawClient;
pub use stream::{NotificationStream, StreamClient, WatchStream};

use reqwest::StatusCode;

use crate::codec::FrameError;
use crate::objects::ApiError;

/// Errors produced by the SDK clients.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport-level HTTP failure (DNS, TLS, connection reset, …).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server returned a non-2xx status code.
    #[error("api error: status {status}, body: {body}")]
    Api { status: StatusCode, body: String },

    /// The server answered the request with an error.
    #[error("request rejected: {0}")]
    Rejected(#[from] ApiError),

    /// Response body could not be deserialized.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The base URL could not be joined with the endpoint path.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    /// The base URL cannot be turned into a WebSocket URL.
    #[error("unsupported url scheme: {0}")]
    Scheme(String),

    /// Raw-transport framing failure.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The server sent a message that does not answer the request.
    #[error("unexpected reply: {0}")]
    UnexpectedReply(&'static str),
}

async fn parse_response<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, ClientError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ClientError::Api { status, body });
    }
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(ClientError::Json)
}

use paych_sdk::codec::FrameError;
use paych_sdk::objects::{ApiError, ChannelId, SessionId};

use crate::engine::EngineError;

/// Errors of the subscription and routing layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("already subscribed")]
    AlreadySubscribed,

    #[error("not subscribed")]
    NotSubscribed,

    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("channel not found: {0}")]
    ChannelNotFound(ChannelId),

    /// An engine call failed; `op` names the call.
    #[error("{op}: {source}")]
    Engine {
        op: &'static str,
        #[source]
        source: EngineError,
    },

    /// Framing, decoding or connection loss on the raw transport.
    #[error("transport error: {0}")]
    Transport(#[from] FrameError),

    /// A raw-transport client sent a message only the server may send.
    #[error("protocol violation: client sent a {0} message")]
    UnexpectedMessage(&'static str),
}

impl Error {
    pub fn engine(op: &'static str, source: EngineError) -> Self {
        Error::Engine { op, source }
    }

    /// Wrap an engine result with the operation name.
    pub fn context<T>(op: &'static str, result: Result<T, EngineError>) -> Result<T, Error> {
        result.map_err(|source| Error::engine(op, source))
    }
}

impl From<Error> for ApiError {
    fn from(value: Error) -> Self {
        match value {
            Error::AlreadySubscribed => ApiError::resource_exists("subscription", "active"),
            Error::NotSubscribed => ApiError::resource_not_found("subscription", "none"),
            Error::SessionNotFound(id) => ApiError::resource_not_found("session", id),
            Error::ChannelNotFound(id) => ApiError::resource_not_found("channel", id),
            Error::Engine { op, source } => {
                let mut err = source.0;
                err.message = format!("{op}: {}", err.message);
                err
            }
            Error::Transport(e) => ApiError::internal(e.to_string()),
            Error::UnexpectedMessage(kind) => {
                ApiError::invalid_argument("type", kind, "a request message")
            }
        }
    }
}

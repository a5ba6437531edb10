//! Structured API errors.
//!
//! Every response that can fail carries an `Option<ApiError>`; errors are
//! reported in-band rather than by closing the transport.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Who is expected to act on an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// A channel peer misbehaved or did not respond.
    Participant,
    /// The client sent something the node cannot act on.
    Client,
    /// The channel protocol failed in a way that needs manual recovery.
    ProtocolFatal,
    /// The node itself failed.
    Internal,
}

impl ErrorCategory {
    pub fn as_u8(self) -> u8 {
        match self {
            ErrorCategory::Participant => 0,
            ErrorCategory::Client => 1,
            ErrorCategory::ProtocolFatal => 2,
            ErrorCategory::Internal => 3,
        }
    }
}

/// Machine-readable error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    PeerRequestTimedOut,
    PeerRejected,
    PeerNotFunded,
    UserResponseTimedOut,
    ResourceNotFound,
    ResourceExists,
    InvalidArgument,
    FailedPreCondition,
    InvalidConfig,
    InvalidContracts,
    TxTimedOut,
    ChainNotReachable,
    UnknownInternal,
}

impl ErrorCode {
    pub fn as_u16(self) -> u16 {
        match self {
            ErrorCode::PeerRequestTimedOut => 101,
            ErrorCode::PeerRejected => 102,
            ErrorCode::PeerNotFunded => 103,
            ErrorCode::UserResponseTimedOut => 104,
            ErrorCode::ResourceNotFound => 201,
            ErrorCode::ResourceExists => 202,
            ErrorCode::InvalidArgument => 203,
            ErrorCode::FailedPreCondition => 204,
            ErrorCode::InvalidConfig => 205,
            ErrorCode::InvalidContracts => 206,
            ErrorCode::TxTimedOut => 301,
            ErrorCode::ChainNotReachable => 302,
            ErrorCode::UnknownInternal => 401,
        }
    }

    /// The category an error with this code belongs to by default.
    pub fn category(self) -> ErrorCategory {
        match self.as_u16() / 100 {
            1 => ErrorCategory::Participant,
            2 => ErrorCategory::Client,
            3 => ErrorCategory::ProtocolFatal,
            _ => ErrorCategory::Internal,
        }
    }
}

/// Additional structured context for some error codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorInfo {
    ResourceNotFound { resource: String, id: String },
    ResourceExists { resource: String, id: String },
    InvalidArgument { name: String, value: String, requirement: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub category: ErrorCategory,
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_info: Option<ErrorInfo>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            category: code.category(),
            code,
            message: message.into(),
            add_info: None,
        }
    }

    pub fn with_info(mut self, info: ErrorInfo) -> Self {
        self.add_info = Some(info);
        self
    }

    pub fn resource_not_found(resource: &str, id: impl fmt::Display) -> Self {
        let id = id.to_string();
        Self::new(ErrorCode::ResourceNotFound, format!("{resource} not found: {id}")).with_info(
            ErrorInfo::ResourceNotFound {
                resource: resource.to_owned(),
                id,
            },
        )
    }

    pub fn resource_exists(resource: &str, id: impl fmt::Display) -> Self {
        let id = id.to_string();
        Self::new(ErrorCode::ResourceExists, format!("{resource} already exists: {id}"))
            .with_info(ErrorInfo::ResourceExists {
                resource: resource.to_owned(),
                id,
            })
    }

    pub fn invalid_argument(name: &str, value: impl fmt::Display, requirement: &str) -> Self {
        let value = value.to_string();
        Self::new(
            ErrorCode::InvalidArgument,
            format!("invalid {name} {value}: {requirement}"),
        )
        .with_info(ErrorInfo::InvalidArgument {
            name: name.to_owned(),
            value,
            requirement: requirement.to_owned(),
        })
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnknownInternal, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}/{}] {}",
            self.category.as_u8(),
            self.code.as_u16(),
            self.message
        )
    }
}

impl std::error::Error for ApiError {}

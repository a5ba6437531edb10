//! Request and response messages.
//!
//! The request/response structs are shared by both transports: the unary
//! HTTP endpoints take and return them as JSON bodies, and the raw transport
//! carries them inside an [`Envelope`] of one frame each.
//!
//! # Raw transport payload
//!
//! ```json
//! {"request_id":7,"message":{"type":"fund_req","session_id":"…","params":{…},"state":{…},"idx":0}}
//! ```
//!
//! `request_id` is optional. When a request carries one, every message the
//! server sends in reply to it echoes the same id. Clients that leave it out
//! correlate by message kind and channel id instead.

use serde::{Deserialize, Serialize};

use super::channel::{AdjudicatorReq, Params, SignedState, State, StateMapEntry, Transaction};
use super::error::ApiError;
use super::ids::{ChannelId, HexBytes, SessionId};
use super::notification::{AdjudicatorNotif, Notification};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundReq {
    pub session_id: SessionId,
    pub params: Params,
    pub state: State,
    /// Index of the funding participant.
    pub idx: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterReq {
    pub session_id: SessionId,
    pub adj_req: AdjudicatorReq,
    #[serde(default)]
    pub signed_states: Vec<SignedState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawReq {
    pub session_id: SessionId,
    pub adj_req: AdjudicatorReq,
    #[serde(default)]
    pub state_map: Vec<StateMapEntry>,
}

/// Advance a registered app channel on the ledger to `new_state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressReq {
    pub session_id: SessionId,
    pub adj_req: AdjudicatorReq,
    pub new_state: State,
    /// Signature of the participant at `adj_req.idx` over `new_state`.
    #[serde(default)]
    pub sig: HexBytes,
}

/// Start watching a ledger channel, or publish a newer state for a channel
/// that is already being watched on the same connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartWatchingLedgerChannelReq {
    pub session_id: SessionId,
    pub params: Params,
    pub state: State,
    pub sigs: Vec<HexBytes>,
}

impl StartWatchingLedgerChannelReq {
    pub fn channel_id(&self) -> ChannelId {
        self.state.id
    }

    pub fn signed_state(&self) -> SignedState {
        SignedState {
            params: self.params.clone(),
            state: self.state.clone(),
            sigs: self.sigs.clone(),
        }
    }

    pub fn into_transaction(self) -> Transaction {
        Transaction {
            state: self.state,
            sigs: self.sigs,
        }
    }
}

/// One adjudicator event of a watched channel, or the error that ended the
/// watch.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StartWatchingLedgerChannelResp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<AdjudicatorNotif>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl StartWatchingLedgerChannelResp {
    /// The watch response carrying `notification`.
    ///
    /// Only adjudicator events and errors belong to a watch; anything else
    /// yields `None`.
    pub fn from_notification(notification: Notification) -> Option<Self> {
        match notification {
            Notification::Adjudicator { event } => Some(Self {
                event: Some(event),
                error: None,
            }),
            Notification::Error(error) => Some(Self {
                event: None,
                error: Some(error),
            }),
            Notification::Proposal(_) | Notification::Update(_) => None,
        }
    }

    pub fn failed(error: ApiError) -> Self {
        Self {
            event: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopWatchingReq {
    pub session_id: SessionId,
    pub ch_id: ChannelId,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OpenSessionReq {
    /// Session configuration file, relative to the node's working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OpenSessionResp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl OpenSessionResp {
    pub fn from_result<E: Into<ApiError>>(result: Result<SessionId, E>) -> Self {
        match result {
            Ok(id) => Self {
                session_id: Some(id),
                error: None,
            },
            Err(e) => Self {
                session_id: None,
                error: Some(e.into()),
            },
        }
    }

    pub fn into_result(self) -> Result<SessionId, ApiError> {
        match (self.error, self.session_id) {
            (Some(e), _) => Err(e),
            (None, Some(id)) => Ok(id),
            (None, None) => Err(ApiError::internal("open session answered without a session id")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseSessionReq {
    pub session_id: SessionId,
}

/// Response of every request whose only result is success or an error.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AckResp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl AckResp {
    pub fn ok() -> Self {
        Self { error: None }
    }

    pub fn from_result<E: Into<ApiError>>(result: Result<(), E>) -> Self {
        Self {
            error: result.err().map(Into::into),
        }
    }

    pub fn into_result(self) -> Result<(), ApiError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

pub type FundResp = AckResp;
pub type RegisterResp = AckResp;
pub type WithdrawResp = AckResp;
pub type ProgressResp = AckResp;
pub type CloseSessionResp = AckResp;
pub type StopWatchingResp = AckResp;
pub type UnsubscribeResp = AckResp;

/// A tagged raw-transport message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApiMessage {
    FundReq(FundReq),
    FundResp(FundResp),
    RegisterReq(RegisterReq),
    RegisterResp(RegisterResp),
    WithdrawReq(WithdrawReq),
    WithdrawResp(WithdrawResp),
    ProgressReq(ProgressReq),
    ProgressResp(ProgressResp),
    StartWatchingLedgerChannelReq(StartWatchingLedgerChannelReq),
    StartWatchingLedgerChannelResp(StartWatchingLedgerChannelResp),
    StopWatchingReq(StopWatchingReq),
    StopWatchingResp(StopWatchingResp),
}

impl ApiMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ApiMessage::FundReq(_) => "fund_req",
            ApiMessage::FundResp(_) => "fund_resp",
            ApiMessage::RegisterReq(_) => "register_req",
            ApiMessage::RegisterResp(_) => "register_resp",
            ApiMessage::WithdrawReq(_) => "withdraw_req",
            ApiMessage::WithdrawResp(_) => "withdraw_resp",
            ApiMessage::ProgressReq(_) => "progress_req",
            ApiMessage::ProgressResp(_) => "progress_resp",
            ApiMessage::StartWatchingLedgerChannelReq(_) => "start_watching_ledger_channel_req",
            ApiMessage::StartWatchingLedgerChannelResp(_) => "start_watching_ledger_channel_resp",
            ApiMessage::StopWatchingReq(_) => "stop_watching_req",
            ApiMessage::StopWatchingResp(_) => "stop_watching_resp",
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(
            self,
            ApiMessage::FundReq(_)
                | ApiMessage::RegisterReq(_)
                | ApiMessage::WithdrawReq(_)
                | ApiMessage::ProgressReq(_)
                | ApiMessage::StartWatchingLedgerChannelReq(_)
                | ApiMessage::StopWatchingReq(_)
        )
    }
}

/// One raw-transport payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    pub message: ApiMessage,
}

impl Envelope {
    pub fn new(message: ApiMessage) -> Self {
        Self {
            request_id: None,
            message,
        }
    }

    /// A reply that echoes `request_id`.
    pub fn reply(request_id: Option<u64>, message: ApiMessage) -> Self {
        Self {
            request_id,
            message,
        }
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_slice(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

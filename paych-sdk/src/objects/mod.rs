pub mod channel;
pub mod error;
pub mod ids;
pub mod notification;
pub mod wire;

pub use channel::{
    AdjudicatorReq, Allocation, BalInfo, Params, PayChInfo, SignedState, State, StateMapEntry,
    SubAlloc, Transaction,
};
pub use error::{ApiError, ErrorCategory, ErrorCode, ErrorInfo};
pub use ids::{ChannelId, HexBytes, HexParseError, SessionId};
pub use notification::{AdjudicatorNotif, Notification, ProposalNotif, UpdateKind, UpdateNotif};
pub use wire::{
    AckResp, ApiMessage, CloseSessionReq, CloseSessionResp, Envelope, FundReq, FundResp,
    OpenSessionReq, OpenSessionResp, ProgressReq, ProgressResp, RegisterReq, RegisterResp,
    StartWatchingLedgerChannelReq, StartWatchingLedgerChannelResp, StopWatchingReq,
    StopWatchingResp, UnsubscribeResp, WithdrawReq, WithdrawResp,
};

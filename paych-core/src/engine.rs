//! Contracts of the external collaborators.
//!
//! The session manager, the channel-protocol engine and the adjudicator
//! watcher live outside this crate. The node runtime only talks to them
//! through the traits below; [`crate::memory`] provides an in-process
//! implementation.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use paych_sdk::objects::{
    AdjudicatorReq, ApiError, ChannelId, HexBytes, Params, SessionId, SignedState, State,
    StateMapEntry, Transaction,
};

use crate::events::{AdjudicatorEvent, ProposalNotifier, UpdateNotifier};

/// Any failure reported by the engine or the adjudicator watcher.
///
/// The runtime does not classify these further; they are passed to clients
/// with their original category and code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(transparent)]
pub struct EngineError(#[from] pub ApiError);

/// Entry point of the node: session creation and lookup.
#[async_trait]
pub trait NodeApi: Send + Sync + 'static {
    /// Open a new session, optionally from a session config file.
    async fn open_session(&self, config: Option<&Path>) -> Result<SessionId, EngineError>;

    fn session(&self, id: &SessionId) -> Option<Arc<dyn SessionApi>>;

    /// Close a session. Its channels, subscriptions and watches go with it.
    async fn close_session(&self, id: &SessionId) -> Result<(), EngineError>;
}

/// Funding request for one participant of a channel.
#[derive(Debug, Clone)]
pub struct FundingReq {
    pub params: Params,
    pub state: State,
    pub idx: u16,
}

/// On-chain progression of a registered app channel.
#[derive(Debug, Clone)]
pub struct ProgressionReq {
    pub adj_req: AdjudicatorReq,
    pub new_state: State,
    pub sig: HexBytes,
}

/// One user session of the node.
#[async_trait]
pub trait SessionApi: Send + Sync + 'static {
    fn id(&self) -> &SessionId;

    /// Start pushing channel proposals into `notifier`.
    ///
    /// At most one proposal notifier is registered per session.
    async fn subscribe_proposals(&self, notifier: ProposalNotifier) -> Result<(), EngineError>;

    /// Drop the proposal notifier. The engine closes its sender.
    async fn unsubscribe_proposals(&self) -> Result<(), EngineError>;

    fn channel(&self, id: &ChannelId) -> Option<Arc<dyn ChannelApi>>;

    async fn fund(&self, req: FundingReq) -> Result<(), EngineError>;

    async fn register(
        &self,
        req: AdjudicatorReq,
        signed_states: Vec<SignedState>,
    ) -> Result<(), EngineError>;

    async fn withdraw(
        &self,
        req: AdjudicatorReq,
        state_map: Vec<StateMapEntry>,
    ) -> Result<(), EngineError>;

    async fn progress(&self, req: ProgressionReq) -> Result<(), EngineError>;

    /// Pull-style subscription to a channel's on-chain events.
    async fn subscribe_adjudicator(
        &self,
        channel: ChannelId,
    ) -> Result<Box<dyn AdjudicatorSubscription>, EngineError>;

    /// Start watching a ledger channel from `signed_state` on.
    ///
    /// Newer states are handed to the returned publisher; on-chain events
    /// come out of the returned subscription.
    async fn start_watching(
        &self,
        signed_state: SignedState,
    ) -> Result<(Box<dyn StatePublisher>, Box<dyn AdjudicatorSubscription>), EngineError>;

    /// Stop watching; closes the watch's publisher and subscription.
    async fn stop_watching(&self, channel: ChannelId) -> Result<(), EngineError>;
}

/// An open channel of a session.
#[async_trait]
pub trait ChannelApi: Send + Sync + 'static {
    fn id(&self) -> ChannelId;

    async fn subscribe_updates(&self, notifier: UpdateNotifier) -> Result<(), EngineError>;

    async fn unsubscribe_updates(&self) -> Result<(), EngineError>;
}

/// Blocking-pull event feed of the adjudicator watcher.
#[async_trait]
pub trait AdjudicatorSubscription: Send + Sync + 'static {
    /// Next event; `None` once the subscription is closed.
    async fn next(&self) -> Option<AdjudicatorEvent>;

    /// Why the subscription ended, if it ended abnormally.
    fn err(&self) -> Option<EngineError>;

    async fn close(&self) -> Result<(), EngineError>;
}

/// Hands newer off-chain states to the adjudicator watcher.
#[async_trait]
pub trait StatePublisher: Send + Sync + 'static {
    async fn publish(&self, tx: Transaction) -> Result<(), EngineError>;
}

//! Event types produced by the channel-protocol engine and the adjudicator
//! watcher.
//!
//! These are the engine's view of things: durations and timestamps are typed,
//! errors are engine errors. [`super::translate`] turns them into wire
//! notifications.

use std::time::Duration;

use paych_sdk::objects::{BalInfo, ChannelId, PayChInfo, State};
use time::OffsetDateTime;

use crate::engine::EngineError;

/// A peer proposed to open a channel.
#[derive(Debug, Clone)]
pub struct ProposalEvent {
    pub proposal_id: String,
    pub opening_balances: BalInfo,
    pub challenge_duration: Duration,
    pub expiry: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePhase {
    Open,
    Final,
    Closed,
}

/// A peer proposed an update to a channel, or the channel closed.
#[derive(Debug, Clone)]
pub struct UpdateEvent {
    pub update_id: String,
    pub proposed: PayChInfo,
    pub phase: UpdatePhase,
    pub expiry: OffsetDateTime,
    pub error: Option<EngineError>,
}

/// When a registered state's challenge period ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    Elapsed,
    At(OffsetDateTime),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdjudicatorEventBase {
    pub channel_id: ChannelId,
    pub timeout: Timeout,
    pub version: u64,
}

/// An on-chain event observed by the adjudicator watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdjudicatorEvent {
    Registered {
        base: AdjudicatorEventBase,
        state: State,
    },
    Progressed {
        base: AdjudicatorEventBase,
        state: State,
        idx: u16,
    },
    Concluded {
        base: AdjudicatorEventBase,
    },
}

impl AdjudicatorEvent {
    pub fn base(&self) -> &AdjudicatorEventBase {
        match self {
            AdjudicatorEvent::Registered { base, .. }
            | AdjudicatorEvent::Progressed { base, .. }
            | AdjudicatorEvent::Concluded { base } => base,
        }
    }
}

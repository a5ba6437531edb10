//! Engine events and the channels that carry them.
//!
//! # Event Flow
//!
//! 1. The engine pushes `ProposalEvent` / `UpdateEvent` into a notifier
//!    channel, or yields `AdjudicatorEvent` from a pull-style subscription.
//! 2. An event source adapter hands them to the subscription's forwarding
//!    task.
//! 3. The forwarding task translates each event into a wire `Notification`
//!    and delivers it to the transport sink.

pub mod channels;
pub mod translate;
pub mod types;

pub use channels::{
    DEFAULT_CHANNEL_BUFFER, NotificationReceiver, NotificationSender, ProposalNotifier,
    ProposalReceiver, UpdateNotifier, UpdateReceiver, notification_channel, proposal_channel,
    update_channel,
};

pub use types::{
    AdjudicatorEvent, AdjudicatorEventBase, ProposalEvent, Timeout, UpdateEvent, UpdatePhase,
};

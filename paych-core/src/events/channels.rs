//! Event channel factories and handles.
//!
//! Push-style engine notifiers are plain bounded mpsc senders: the engine
//! awaits `send` for every event and drops the sender when the
//! subscription ends.

use paych_sdk::objects::Notification;
use tokio::sync::mpsc;

use super::types::{ProposalEvent, UpdateEvent};

/// Default buffer size for event channels.
///
/// This provides enough buffer to handle bursts while keeping memory bounded.
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

/// Notifier handed to the engine for a session's proposal feed.
pub type ProposalNotifier = mpsc::Sender<ProposalEvent>;
pub type ProposalReceiver = mpsc::Receiver<ProposalEvent>;

/// Notifier handed to the engine for a channel's update feed.
pub type UpdateNotifier = mpsc::Sender<UpdateEvent>;
pub type UpdateReceiver = mpsc::Receiver<UpdateEvent>;

/// Translated notifications on their way to a transport.
pub type NotificationSender = mpsc::Sender<Notification>;
pub type NotificationReceiver = mpsc::Receiver<Notification>;

pub fn proposal_channel() -> (ProposalNotifier, ProposalReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}

pub fn update_channel() -> (UpdateNotifier, UpdateReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}

/// Create a notification channel with the configured buffer size.
///
/// A zero `buffer` falls back to [`DEFAULT_CHANNEL_BUFFER`].
pub fn notification_channel(buffer: usize) -> (NotificationSender, NotificationReceiver) {
    let buffer = if buffer == 0 {
        DEFAULT_CHANNEL_BUFFER
    } else {
        buffer
    };
    mpsc::channel(buffer)
}

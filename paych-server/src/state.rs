//! Application state shared across all request handlers.

use std::sync::Arc;

use paych_core::handlers::RequestHandler;
use paych_core::signal::SignalTable;
use paych_core::subscriptions::{SubscriptionKey, Subscriptions};
use paych_sdk::objects::{ChannelId, SessionId};
use tokio::sync::watch;

use crate::config::runtime::SharedConfig;

/// Key of a long-lived stream call, used to stop it from another call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StreamKey {
    /// A server-push subscription stream.
    Subscription(SubscriptionKey),
    /// A ledger channel watch stream.
    Watch(SessionId, ChannelId),
}

impl StreamKey {
    pub fn session(&self) -> &SessionId {
        match self {
            StreamKey::Subscription(key) => key.session(),
            StreamKey::Watch(session, _) => session,
        }
    }
}

/// Application state that is shared across all request handlers.
///
/// This is cloneable and cheap to pass around (everything is behind Arc).
#[derive(Clone)]
pub struct AppState {
    pub subscriptions: Arc<Subscriptions>,
    pub handler: RequestHandler,
    /// Stop signals of open stream calls.
    pub streams: Arc<SignalTable<StreamKey>>,
    /// Runtime configuration (can be reloaded via SIGHUP).
    pub config: SharedConfig,
    /// Flips to `true` when the server shuts down.
    pub shutdown: watch::Receiver<bool>,
}

impl AppState {
    pub fn new(
        subscriptions: Arc<Subscriptions>,
        config: SharedConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            handler: RequestHandler::new(subscriptions.clone()),
            subscriptions,
            streams: Arc::new(SignalTable::new()),
            config,
            shutdown,
        }
    }
}

//! Runtime configuration shared between the transports.
//!
//! These are the values that may change while the node runs (reloaded on
//! `SIGHUP`). Loading and validating the config file is the server crate's
//! job; it publishes the result into a [`SharedConfig`].

mod config_store;

pub use config_store::{ConfigStore, ConfigWatcher};

use crate::events::DEFAULT_CHANNEL_BUFFER;
use crate::routes::DEFAULT_PUBLISH_QUEUE_CAPACITY;

/// Tunables of the subscription and routing layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Capacity of each raw-transport publish queue.
    pub publish_queue_capacity: usize,
    /// Evict a channel's raw-transport route when it stops being watched.
    pub evict_routes_on_stop: bool,
    /// Buffer between a forwarding task and its transport.
    pub notification_buffer: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            publish_queue_capacity: DEFAULT_PUBLISH_QUEUE_CAPACITY,
            evict_routes_on_stop: true,
            notification_buffer: DEFAULT_CHANNEL_BUFFER,
        }
    }
}

/// Runtime configuration store handed to both transports.
pub type SharedConfig = ConfigStore<RuntimeConfig>;

//! TOML file configuration structures.
//!
//! These structs directly map to the `paych.toml` file format. Every
//! section is optional.

use paych_sdk::objects::SessionId;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub raw: RawConfig,
    #[serde(default)]
    pub subscriptions: SubscriptionsConfig,
}

/// Streaming (HTTP/WebSocket) transport section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The address and port to listen on (e.g., "0.0.0.0:50051").
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 50051))
}

/// Raw multiplexed transport section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_raw_listen_addr")]
    pub listen: SocketAddr,

    /// Session all raw requests act on. A new session is opened when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,

    /// Session config file handed to the engine when opening the session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_config: Option<PathBuf>,

    /// Capacity of each per-channel publish queue.
    #[serde(default = "default_publish_queue_capacity")]
    pub publish_queue_capacity: usize,

    /// Evict a channel's route once it stops being watched.
    #[serde(default = "default_true")]
    pub evict_routes_on_stop: bool,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_raw_listen_addr(),
            session_id: None,
            session_config: None,
            publish_queue_capacity: default_publish_queue_capacity(),
            evict_routes_on_stop: true,
        }
    }
}

fn default_raw_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 50052))
}

fn default_publish_queue_capacity() -> usize {
    paych_core::routes::DEFAULT_PUBLISH_QUEUE_CAPACITY
}

fn default_true() -> bool {
    true
}

/// Subscription forwarding section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionsConfig {
    /// Buffer between a forwarding task and its transport.
    #[serde(default = "default_notification_buffer")]
    pub notification_buffer: usize,
}

impl Default for SubscriptionsConfig {
    fn default() -> Self {
        Self {
            notification_buffer: default_notification_buffer(),
        }
    }
}

fn default_notification_buffer() -> usize {
    paych_core::events::DEFAULT_CHANNEL_BUFFER
}

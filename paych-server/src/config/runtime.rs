//! Runtime configuration re-exports and utilities.
//!
//! The actual runtime types are defined in `paych-core::config`; this module
//! builds them from the file configuration.

pub use paych_core::config::{RuntimeConfig, SharedConfig};

use crate::config::file::FileConfig;

/// The reloadable part of a file configuration.
pub fn runtime_config(file: &FileConfig) -> RuntimeConfig {
    RuntimeConfig {
        publish_queue_capacity: file.raw.publish_queue_capacity,
        evict_routes_on_stop: file.raw.evict_routes_on_stop,
        notification_buffer: file.subscriptions.notification_buffer,
    }
}

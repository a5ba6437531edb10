#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod handlers;
pub mod memory;
pub mod registry;
pub mod routes;
pub mod signal;
pub mod sink;
pub mod source;
pub mod subscriptions;
pub mod watching;

//! Shared types for the paych payment-channel node API.
//!
//! - [`objects`] holds everything that travels over the wire: identifiers,
//!   channel state, request/response messages, notifications and API errors.
//! - [`codec`] implements the length-prefixed framing of the raw transport.
//! - `client` (behind the `client` feature) provides a raw-transport client
//!   and a streaming client for the HTTP/WebSocket transport.

pub mod codec;
pub mod objects;

#[cfg(feature = "client")]
pub mod client;

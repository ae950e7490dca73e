//! Channel adapters for OpsClaw.
//!
//! Each adapter converts a channel-native payload into a
//! [`NormalizedMessage`](opsclaw_core::channel::NormalizedMessage) and pushes
//! response chunks back out. The router only sees the
//! [`ChannelAdapter`](opsclaw_core::channel::ChannelAdapter) trait.
//!
//! Available channels:
//! - **CLI**: interactive terminal chat (stdin/stdout)
//! - **Web**: request/response delivery for the HTTP gateway

pub mod cli;
pub mod web;

pub use cli::CliChannel;
pub use web::WebChannel;

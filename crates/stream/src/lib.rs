//! Server-push stream for the vesta API.
//!
//! [`StreamClient`] keeps one WebSocket open, decodes inbound envelopes into
//! [`StreamEvent`]s and serializes outbound control frames.

pub mod client;
pub mod message;

pub use client::{ConnectionState, EventStream, StreamClient};
pub use message::{InboundMessage, MessageKind, OutboundMessage, StreamEvent};

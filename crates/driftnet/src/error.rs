//! Error types for the epidemic core.
//!
//! Nothing in the core propagates an error to its caller at runtime: wire
//! errors end in a logged drop, and transport failures are absorbed because
//! the next encounter redrives the gossip. The types here exist so those
//! drops carry a reason.

use thiserror::Error;

/// Errors raised while parsing control frames and data headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WireError {
    /// The buffer ended before the encoding did.
    #[error("frame truncated: needed {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },

    /// The leading type byte is not a known control message.
    #[error("unknown message type {0:#04x}")]
    UnknownMessageType(u8),
}

/// Failure handed to an entry's error callback when the host stack cannot
/// complete a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    /// The endpoint backing the send was closed.
    #[error("endpoint closed")]
    EndpointClosed,

    /// No route or device reaches the destination.
    #[error("destination unreachable")]
    Unreachable,
}

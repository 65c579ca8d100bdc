//! Core Wisp protocol types, framing, and constants.
//!
//! This crate provides:
//! - The application [`Message`] and its JSON encoding
//! - Protocol levels negotiated per connection
//! - Reserved message id blocks for lifecycle and authentication events
//! - The text frame header shared by the encrypted levels
//!
//! Nothing here touches key material; see `wisp-crypto` for that.

#![forbid(unsafe_code)]

pub mod events;
pub mod frame;
pub mod level;
pub mod message;

pub use frame::{FrameError, FrameHeader, Framing, HEADER_LEN};
pub use level::{ProtocolLevel, UnsupportedLevel};
pub use message::{Message, MessageError, Payload};

/// Query parameter carrying the protocol level on the connection URI.
pub const LEVEL_PARAM: &str = "l";

/// Query parameter carrying the sealed ephemeral key (levels 1 and 2).
pub const KEY_PARAM: &str = "k";

/// Failure classes shared by every layer of the transport.
///
/// Per-frame failures are local: the frame is logged and dropped. Only
/// [`ErrorKind::ConfigurationError`] is ever returned to a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad tag, header field or unparsable body.
    MalformedFrame,
    /// Length/digest mismatch or a body that does not decrypt.
    IntegrityFailure,
    /// Header id differs from the id inside the encrypted body.
    IdentityMismatch,
    /// Level 2 traffic arrived before the bootstrap IV was installed.
    HandshakeIncomplete,
    /// The duplex channel closed or errored.
    TransportFailure,
    /// Unsupported level or missing secret, raised before any I/O.
    ConfigurationError,
}

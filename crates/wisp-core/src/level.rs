//! Protocol levels.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Negotiated protocol variant selecting framing and encryption strength.
///
/// Fixed for the lifetime of one connection; changing it means redialing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ProtocolLevel {
    /// Bare JSON, no cryptography. Debugging only.
    Plain = 0,
    /// Static per-dial key and IV carved from the ephemeral key.
    HandshakeV1 = 1,
    /// Per-dial key with a server-contributed IV.
    HandshakeV2 = 2,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unsupported protocol level: {0}")]
pub struct UnsupportedLevel(pub String);

impl ProtocolLevel {
    pub const ALL: [ProtocolLevel; 3] = [
        ProtocolLevel::Plain,
        ProtocolLevel::HandshakeV1,
        ProtocolLevel::HandshakeV2,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether traffic at this level is encrypted and framed.
    pub fn is_encrypted(self) -> bool {
        !matches!(self, ProtocolLevel::Plain)
    }

    /// Frame tag: the level byte followed by `':'`, rendered as hex.
    pub fn frame_tag(self) -> Option<&'static str> {
        match self {
            ProtocolLevel::Plain => None,
            ProtocolLevel::HandshakeV1 => Some("013a"),
            ProtocolLevel::HandshakeV2 => Some("023a"),
        }
    }
}

impl TryFrom<u8> for ProtocolLevel {
    type Error = UnsupportedLevel;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ProtocolLevel::Plain),
            1 => Ok(ProtocolLevel::HandshakeV1),
            2 => Ok(ProtocolLevel::HandshakeV2),
            other => Err(UnsupportedLevel(other.to_string())),
        }
    }
}

impl From<ProtocolLevel> for u8 {
    fn from(level: ProtocolLevel) -> Self {
        level.as_u8()
    }
}

impl FromStr for ProtocolLevel {
    type Err = UnsupportedLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plain" | "json" => Ok(ProtocolLevel::Plain),
            "v1" => Ok(ProtocolLevel::HandshakeV1),
            "v2" => Ok(ProtocolLevel::HandshakeV2),
            other => other
                .parse::<u8>()
                .map_err(|_| UnsupportedLevel(other.to_string()))
                .and_then(ProtocolLevel::try_from),
        }
    }
}

impl fmt::Display for ProtocolLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

//! Text frame header for the encrypted levels.
//!
//! # Wire Format
//!
//! ```text
//! [tag: 4 hex][id: 4 hex][field: 8 hex][body: base64 ...]
//! tag   = level byte then ':'   ("013a" for level 1, "023a" for level 2)
//! field = body length (length framing) or truncated body digest (digest framing)
//! ```
//!
//! Hex fields are lowercase and fixed width. A frame must carry at least one
//! body character. Interpretation of `field` belongs to the codec.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::level::ProtocolLevel;

pub const TAG_LEN: usize = 4;
pub const ID_LEN: usize = 4;
pub const FIELD_LEN: usize = 8;

/// Total header length in characters.
pub const HEADER_LEN: usize = TAG_LEN + ID_LEN + FIELD_LEN;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame too short: {0} chars")]
    TooShort(usize),
    #[error("level {0} frames carry no header")]
    Unframed(ProtocolLevel),
    #[error("invalid frame tag: {0:?}")]
    InvalidTag(String),
    #[error("invalid {field} field: {value:?}")]
    InvalidHex { field: &'static str, value: String },
    #[error("message id must be non-zero")]
    ZeroId,
}

/// Meaning of the 8-hex-digit header field.
///
/// Both encodings share tags, so a peer's choice cannot be detected from
/// the wire; it is fixed by configuration on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// Field holds the body length in characters.
    #[default]
    Length,
    /// Field holds the first four bytes of the body digest.
    Digest,
}

impl FromStr for Framing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "length" => Ok(Framing::Length),
            "digest" => Ok(Framing::Digest),
            other => Err(format!("unknown framing: {other}")),
        }
    }
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Framing::Length => f.write_str("length"),
            Framing::Digest => f.write_str("digest"),
        }
    }
}

/// Parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub level: ProtocolLevel,
    pub id: u16,
    pub field: u32,
}

impl FrameHeader {
    /// Render the header followed by `body`.
    pub fn write(&self, body: &str) -> Result<String, FrameError> {
        let tag = self
            .level
            .frame_tag()
            .ok_or(FrameError::Unframed(self.level))?;
        if self.id == 0 {
            return Err(FrameError::ZeroId);
        }

        let mut frame = String::with_capacity(HEADER_LEN + body.len());
        frame.push_str(tag);
        frame.push_str(&format!("{:04x}{:08x}", self.id, self.field));
        frame.push_str(body);
        Ok(frame)
    }

    /// Split `frame` into its header and body.
    pub fn split(level: ProtocolLevel, frame: &str) -> Result<(FrameHeader, &str), FrameError> {
        let tag = level.frame_tag().ok_or(FrameError::Unframed(level))?;
        let bytes = frame.as_bytes();

        if bytes.len() <= HEADER_LEN {
            return Err(FrameError::TooShort(bytes.len()));
        }
        if &bytes[..TAG_LEN] != tag.as_bytes() {
            return Err(FrameError::InvalidTag(
                String::from_utf8_lossy(&bytes[..TAG_LEN]).into_owned(),
            ));
        }

        let id = parse_hex("id", &bytes[TAG_LEN..TAG_LEN + ID_LEN])?;
        let field = parse_hex("field", &bytes[TAG_LEN + ID_LEN..HEADER_LEN])?;
        if id == 0 {
            return Err(FrameError::ZeroId);
        }

        // The header is ASCII, so HEADER_LEN is a char boundary.
        let header = FrameHeader {
            level,
            id: id as u16,
            field,
        };
        Ok((header, &frame[HEADER_LEN..]))
    }
}

/// Whether `frame` starts with the tag of `level`.
pub fn has_tag(level: ProtocolLevel, frame: &str) -> bool {
    level
        .frame_tag()
        .is_some_and(|tag| frame.as_bytes().starts_with(tag.as_bytes()))
}

fn parse_hex(field: &'static str, digits: &[u8]) -> Result<u32, FrameError> {
    let invalid = || FrameError::InvalidHex {
        field,
        value: String::from_utf8_lossy(digits).into_owned(),
    };

    if !digits
        .iter()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(b))
    {
        return Err(invalid());
    }
    let text = std::str::from_utf8(digits).map_err(|_| invalid())?;
    u32::from_str_radix(text, 16).map_err(|_| invalid())
}

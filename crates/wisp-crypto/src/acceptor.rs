//! Responder side of the handshake.
//!
//! The accepting end reads `l` and `k` from the upgrade request, recovers
//! the client's ephemeral key with the pre-shared secret and builds the
//! mirror codec. At level 2 it also picks the IV and produces the plaintext
//! bootstrap that must be the first frame it sends.

use thiserror::Error;
use tracing::debug;
use wisp_core::events::{self, CONNECT_SUCCESS};
use wisp_core::{Framing, Message, Payload, ProtocolLevel};

use crate::cipher::{self, CipherError};
use crate::codec::{Codec, BOOTSTRAP_FIELD};
use crate::keys::{random_token, KeyStateError, NegotiatedKeys, PreSharedSecret, StaticKeys};

#[derive(Debug, Error)]
pub enum AcceptError {
    #[error("unsupported protocol level: {0:?}")]
    UnsupportedLevel(String),

    #[error("level {0} requires a key parameter")]
    MissingKey(ProtocolLevel),

    #[error("invalid key parameter: {0}")]
    InvalidKey(#[from] CipherError),

    #[error("key state: {0}")]
    KeyState(#[from] KeyStateError),
}

/// Outcome of a successful accept.
#[derive(Debug)]
pub struct Accepted {
    pub codec: Codec,
    /// Plaintext bootstrap to send before anything else (level 2 only).
    pub bootstrap: Option<Message>,
}

/// Parse the `l` query parameter. A missing value selects level 0.
pub fn parse_level(param: Option<&str>) -> Result<ProtocolLevel, AcceptError> {
    let Some(raw) = param else {
        return Ok(ProtocolLevel::Plain);
    };
    raw.parse::<u8>()
        .ok()
        .and_then(|value| ProtocolLevel::try_from(value).ok())
        .ok_or_else(|| AcceptError::UnsupportedLevel(raw.to_string()))
}

/// Build the responder codec for one connection.
pub fn accept(
    level: ProtocolLevel,
    key_param: Option<&str>,
    psk: &PreSharedSecret,
    framing: Framing,
) -> Result<Accepted, AcceptError> {
    if level == ProtocolLevel::Plain {
        return Ok(Accepted {
            codec: Codec::Plain,
            bootstrap: None,
        });
    }

    let sealed = key_param
        .filter(|k| !k.is_empty())
        .ok_or(AcceptError::MissingKey(level))?;
    let ephemeral = psk.open_ephemeral(sealed)?;

    match level {
        ProtocolLevel::HandshakeV1 => Ok(Accepted {
            codec: Codec::V1 {
                keys: StaticKeys::from_ephemeral(ephemeral.as_str())?,
                framing,
            },
            bootstrap: None,
        }),
        _ => {
            let iv = random_token();
            let sealed_iv = cipher::seal_base64(&iv, psk.key(), psk.iv())?;
            let keys = NegotiatedKeys::handshaking(ephemeral.as_str())?.secure(iv)?;

            let mut payload = Payload::new();
            payload.insert(BOOTSTRAP_FIELD.to_string(), sealed_iv.into());
            let bootstrap = events::event(CONNECT_SUCCESS, payload);
            debug!(level = %level, "handshake accepted");

            Ok(Accepted {
                codec: Codec::V2 {
                    keys,
                    psk: psk.clone(),
                    framing,
                },
                bootstrap,
            })
        }
    }
}

//! Connection target negotiation.
//!
//! Builds the dial URI and the codec for one dial. Every call generates
//! fresh key material, so two dials never share keys.

use thiserror::Error;
use url::Url;
use wisp_core::{ErrorKind, Framing, ProtocolLevel, UnsupportedLevel, KEY_PARAM, LEVEL_PARAM};
use wisp_crypto::{CipherError, Codec, NegotiatedKeys, PreSharedSecret, StaticKeys};

#[derive(Debug, Error)]
pub enum NegotiateError {
    #[error(transparent)]
    UnsupportedLevel(#[from] UnsupportedLevel),

    #[error("invalid uri {uri:?}: {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("level {0} requires a pre-shared secret")]
    MissingSecret(ProtocolLevel),

    #[error("sealing ephemeral key: {0}")]
    Cipher(#[from] CipherError),
}

impl NegotiateError {
    /// Negotiation fails only on configuration, before any I/O.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ConfigurationError
    }
}

impl From<NegotiateError> for wisp_common::Error {
    fn from(err: NegotiateError) -> Self {
        wisp_common::Error::config(err)
    }
}

/// Where to dial and how to speak once connected.
#[derive(Debug)]
pub struct ConnectionTarget {
    pub uri: Url,
    pub codec: Codec,
}

/// Parse and check a base URI without negotiating.
pub fn parse_base_uri(base_uri: &str) -> Result<Url, NegotiateError> {
    let invalid = |reason: String| NegotiateError::InvalidUri {
        uri: base_uri.to_string(),
        reason,
    };
    let uri = Url::parse(base_uri).map_err(|e| invalid(e.to_string()))?;
    match uri.scheme() {
        "ws" | "wss" => Ok(uri),
        other => Err(invalid(format!("unsupported scheme {other:?}"))),
    }
}

/// Build the dial URI and a codec pre-loaded with fresh key material.
///
/// Appends `l=<level>` and, for the encrypted levels, `k=<sealed key>` to
/// any query the base URI already carries.
pub fn build_target(
    base_uri: &str,
    level: u8,
    psk: Option<&PreSharedSecret>,
    framing: Framing,
) -> Result<ConnectionTarget, NegotiateError> {
    let level = ProtocolLevel::try_from(level)?;
    let mut uri = parse_base_uri(base_uri)?;

    let (codec, sealed) = match level {
        ProtocolLevel::Plain => (Codec::Plain, None),
        ProtocolLevel::HandshakeV1 => {
            let psk = psk.ok_or(NegotiateError::MissingSecret(level))?;
            let keys = StaticKeys::generate();
            let sealed = psk.seal_ephemeral(keys.ephemeral())?;
            (Codec::V1 { keys, framing }, Some(sealed))
        }
        ProtocolLevel::HandshakeV2 => {
            let psk = psk.ok_or(NegotiateError::MissingSecret(level))?;
            let keys = NegotiatedKeys::generate();
            let sealed = psk.seal_ephemeral(keys.ephemeral())?;
            let codec = Codec::V2 {
                keys,
                psk: psk.clone(),
                framing,
            };
            (codec, Some(sealed))
        }
    };

    {
        let mut query = uri.query_pairs_mut();
        query.append_pair(LEVEL_PARAM, &level.as_u8().to_string());
        if let Some(sealed) = &sealed {
            query.append_pair(KEY_PARAM, sealed);
        }
    }

    Ok(ConnectionTarget { uri, codec })
}

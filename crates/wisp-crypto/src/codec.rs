//! Message ⇄ frame codecs, one per protocol level.
//!
//! Every codec owns the key material for one connection. Decoding is
//! all-or-nothing: any failed check yields a [`CodecError`], never a partial
//! message. Only the level 2 codec mutates itself while decoding, when the
//! bootstrap installs the IV.

use thiserror::Error;
use tracing::debug;
use wisp_common::helpers::constant_time_eq;
use wisp_core::events::CONNECT_SUCCESS;
use wisp_core::frame::has_tag;
use wisp_core::{
    ErrorKind, FrameError, FrameHeader, Framing, Message, MessageError, ProtocolLevel,
};

use crate::cipher::{self, CipherError};
use crate::keys::{KeyStateError, NegotiatedKeys, PreSharedSecret, StaticKeys};

/// Payload field of the bootstrap message that carries the sealed IV.
pub const BOOTSTRAP_FIELD: &str = "data";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] FrameError),

    #[error("length mismatch: header {expected}, body {actual}")]
    LengthMismatch { expected: u32, actual: usize },

    #[error("digest mismatch")]
    DigestMismatch,

    #[error("id mismatch: header {header:#06x}, body {body:#06x}")]
    IdentityMismatch { header: u16, body: u16 },

    #[error("handshake incomplete: no iv installed")]
    HandshakeIncomplete,

    #[error("body too large: {0} chars")]
    BodyTooLarge(usize),

    #[error("bootstrap rejected: {0}")]
    Bootstrap(#[from] KeyStateError),

    #[error("cipher error: {0}")]
    Cipher(#[from] CipherError),

    #[error("invalid message: {0}")]
    Message(#[from] MessageError),
}

impl CodecError {
    /// Failure class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CodecError::Malformed(_) | CodecError::Message(_) => ErrorKind::MalformedFrame,
            CodecError::LengthMismatch { .. }
            | CodecError::DigestMismatch
            | CodecError::BodyTooLarge(_)
            | CodecError::Bootstrap(_)
            | CodecError::Cipher(_) => ErrorKind::IntegrityFailure,
            CodecError::IdentityMismatch { .. } => ErrorKind::IdentityMismatch,
            CodecError::HandshakeIncomplete => ErrorKind::HandshakeIncomplete,
        }
    }
}

impl From<CodecError> for wisp_common::Error {
    fn from(err: CodecError) -> Self {
        wisp_common::Error::protocol(err)
    }
}

/// Codec for one connection, selected by protocol level.
#[derive(Debug, Clone)]
pub enum Codec {
    /// Level 0: the frame is the message JSON.
    Plain,
    /// Level 1: key and IV fixed at dial time.
    V1 { keys: StaticKeys, framing: Framing },
    /// Level 2: IV delivered in-band, sealed under the pre-shared secret.
    V2 {
        keys: NegotiatedKeys,
        psk: PreSharedSecret,
        framing: Framing,
    },
}

impl Codec {
    pub fn level(&self) -> ProtocolLevel {
        match self {
            Codec::Plain => ProtocolLevel::Plain,
            Codec::V1 { .. } => ProtocolLevel::HandshakeV1,
            Codec::V2 { .. } => ProtocolLevel::HandshakeV2,
        }
    }

    /// Whether outbound encryption can proceed.
    pub fn is_secured(&self) -> bool {
        match self {
            Codec::Plain | Codec::V1 { .. } => true,
            Codec::V2 { keys, .. } => keys.is_secured(),
        }
    }

    /// Installed level 2 IV, if any.
    pub fn iv(&self) -> Option<&str> {
        match self {
            Codec::V2 { keys, .. } => keys.iv(),
            _ => None,
        }
    }

    pub fn encode(&self, message: &Message) -> Result<String, CodecError> {
        let json = message.encode()?;
        match self {
            Codec::Plain => Ok(json),
            Codec::V1 { keys, framing } => seal_frame(
                ProtocolLevel::HandshakeV1,
                message.id(),
                &json,
                keys.cipher_key(),
                keys.iv(),
                *framing,
            ),
            Codec::V2 { keys, framing, .. } => {
                let iv = keys.iv().ok_or(CodecError::HandshakeIncomplete)?;
                seal_frame(
                    ProtocolLevel::HandshakeV2,
                    message.id(),
                    &json,
                    keys.ephemeral().as_bytes(),
                    iv.as_bytes(),
                    *framing,
                )
            }
        }
    }

    pub fn decode(&mut self, frame: &str) -> Result<Message, CodecError> {
        match self {
            Codec::Plain => Ok(Message::decode(frame)?),
            Codec::V1 { keys, framing } => open_frame(
                ProtocolLevel::HandshakeV1,
                frame,
                keys.cipher_key(),
                keys.iv(),
                *framing,
            ),
            Codec::V2 {
                keys,
                psk,
                framing,
            } => {
                let Some(iv) = keys.iv() else {
                    if !has_tag(ProtocolLevel::HandshakeV2, frame) && frame.starts_with('{') {
                        let (message, secured) = bootstrap(keys, psk, frame)?;
                        *keys = secured;
                        return Ok(message);
                    }
                    return Err(CodecError::HandshakeIncomplete);
                };
                open_frame(
                    ProtocolLevel::HandshakeV2,
                    frame,
                    keys.ephemeral().as_bytes(),
                    iv.as_bytes(),
                    *framing,
                )
            }
        }
    }
}

/// Recover the IV from a plaintext `ConnectSuccess` bootstrap.
fn bootstrap(
    keys: &NegotiatedKeys,
    psk: &PreSharedSecret,
    frame: &str,
) -> Result<(Message, NegotiatedKeys), CodecError> {
    let message = Message::decode(frame)?;
    let sealed = match message.get_str(BOOTSTRAP_FIELD) {
        Some(sealed) if message.id() == CONNECT_SUCCESS => sealed,
        _ => return Err(CodecError::HandshakeIncomplete),
    };

    let iv = cipher::open_base64(sealed, psk.key(), psk.iv())?;
    let secured = keys.secure(iv)?;
    debug!("level 2 iv installed");
    Ok((message, secured))
}

fn integrity_field(body: &str, framing: Framing) -> Result<u32, CodecError> {
    match framing {
        Framing::Length => {
            u32::try_from(body.len()).map_err(|_| CodecError::BodyTooLarge(body.len()))
        }
        Framing::Digest => Ok(u32::from_be_bytes(cipher::digest(body.as_bytes()))),
    }
}

fn seal_frame(
    level: ProtocolLevel,
    id: u16,
    json: &str,
    key: &[u8],
    iv: &[u8],
    framing: Framing,
) -> Result<String, CodecError> {
    let body = cipher::seal_base64(json, key, iv)?;
    let header = FrameHeader {
        level,
        id,
        field: integrity_field(&body, framing)?,
    };
    Ok(header.write(&body)?)
}

fn open_frame(
    level: ProtocolLevel,
    frame: &str,
    key: &[u8],
    iv: &[u8],
    framing: Framing,
) -> Result<Message, CodecError> {
    let (header, body) = FrameHeader::split(level, frame)?;

    match framing {
        Framing::Length => {
            if usize::try_from(header.field).ok() != Some(body.len()) {
                return Err(CodecError::LengthMismatch {
                    expected: header.field,
                    actual: body.len(),
                });
            }
        }
        Framing::Digest => {
            let actual = cipher::digest(body.as_bytes());
            if !constant_time_eq(&header.field.to_be_bytes(), &actual) {
                return Err(CodecError::DigestMismatch);
            }
        }
    }

    let json = cipher::open_base64(body, key, iv)?;
    let message = Message::decode(&json)?;
    if message.id() != header.id {
        return Err(CodecError::IdentityMismatch {
            header: header.id,
            body: message.id(),
        });
    }
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    const EPHEMERAL_V1: &str = "0123456789abcdef0123456789abcdef";

    fn chat() -> Message {
        Message::new(0x0300, "chat").unwrap().with_field("text", "hi")
    }

    fn psk() -> PreSharedSecret {
        PreSharedSecret::new(*b"psk-key-01234567", *b"psk-iv-012345678").unwrap()
    }

    fn v1(framing: Framing) -> Codec {
        Codec::V1 {
            keys: StaticKeys::from_ephemeral(EPHEMERAL_V1).unwrap(),
            framing,
        }
    }

    fn v2_pair(framing: Framing) -> (Codec, Codec) {
        let client = NegotiatedKeys::handshaking("fedcba9876543210").unwrap();
        let server = client.secure("1111222233334444").unwrap();
        (
            Codec::V2 {
                keys: client,
                psk: psk(),
                framing,
            },
            Codec::V2 {
                keys: server,
                psk: psk(),
                framing,
            },
        )
    }

    fn bootstrap_text(iv: &str) -> String {
        let psk = psk();
        let data = cipher::seal_base64(iv, psk.key(), psk.iv()).unwrap();
        Message::new(CONNECT_SUCCESS, "connect_success")
            .unwrap()
            .with_field(BOOTSTRAP_FIELD, data)
            .encode()
            .unwrap()
    }

    /// Replace the 8 hex digits after the tag and id.
    fn with_field(frame: &str, field: u32) -> String {
        format!("{}{:08x}{}", &frame[..8], field, &frame[16..])
    }

    #[test]
    fn test_plain_encodes_message_json() {
        let mut codec = Codec::Plain;
        let frame = codec.encode(&chat()).unwrap();
        assert_eq!(frame, r#"{"id":768,"name":"chat","payload":{"text":"hi"}}"#);
        assert_eq!(codec.decode(&frame).unwrap(), chat());
    }

    #[test]
    fn test_v1_roundtrip_with_fixed_key() {
        let mut codec = v1(Framing::Length);
        let frame = codec.encode(&chat()).unwrap();
        assert!(frame.starts_with("013a0300"));
        let field = u32::from_str_radix(&frame[8..16], 16).unwrap();
        assert_eq!(field as usize, frame.len() - 16);
        assert_eq!(codec.decode(&frame).unwrap(), chat());
    }

    #[test]
    fn test_v1_body_decrypts_with_carved_key() {
        let frame = v1(Framing::Length).encode(&chat()).unwrap();
        let ciphertext = STANDARD.decode(&frame[16..]).unwrap();
        let json = cipher::decrypt(&ciphertext, b"0123456789abcdef", b"0123456789abcdef").unwrap();
        assert_eq!(json, chat().encode().unwrap().into_bytes());
    }

    #[test]
    fn test_digest_framing_roundtrip() {
        let mut codec = v1(Framing::Digest);
        let frame = codec.encode(&chat()).unwrap();
        let expected = cipher::digest(frame[16..].as_bytes());
        assert_eq!(&frame[8..16], hex::encode(expected));
        assert_eq!(codec.decode(&frame).unwrap(), chat());
    }

    #[test]
    fn test_framings_are_not_interchangeable() {
        let frame = v1(Framing::Digest).encode(&chat()).unwrap();
        let err = v1(Framing::Length).decode(&frame).unwrap_err();
        assert!(matches!(err, CodecError::LengthMismatch { .. }));
    }

    #[test]
    fn test_tampered_length_rejected() {
        let mut codec = v1(Framing::Length);
        let frame = codec.encode(&chat()).unwrap();
        let body_len = (frame.len() - 16) as u32;
        let err = codec.decode(&with_field(&frame, body_len + 1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IntegrityFailure);
    }

    #[test]
    fn test_tampered_digest_rejected() {
        let mut codec = v1(Framing::Digest);
        let frame = codec.encode(&chat()).unwrap();
        let err = codec.decode(&with_field(&frame, 0xdeadbeef)).unwrap_err();
        assert!(matches!(err, CodecError::DigestMismatch));
        assert_eq!(err.kind(), ErrorKind::IntegrityFailure);
    }

    #[test]
    fn test_tampered_body_rejected() {
        let mut codec = v1(Framing::Length);
        let frame = codec.encode(&chat()).unwrap();

        // Swap one base64 character for another, keeping the length intact.
        let mut bytes = frame.into_bytes();
        bytes[20] = if bytes[20] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(bytes).unwrap();

        match codec.decode(&tampered) {
            Err(err) => assert_ne!(err.kind(), ErrorKind::HandshakeIncomplete),
            Ok(message) => panic!("tampered frame decoded: {message:?}"),
        }
    }

    #[test]
    fn test_digest_body_tamper_rejected() {
        let mut codec = v1(Framing::Digest);
        let frame = codec.encode(&chat()).unwrap();
        let mut bytes = frame.into_bytes();
        let last = bytes.len() - 3;
        bytes[last] = if bytes[last] == b'A' { b'B' } else { b'A' };
        let err = codec.decode(&String::from_utf8(bytes).unwrap()).unwrap_err();
        assert!(matches!(err, CodecError::DigestMismatch));
    }

    #[test]
    fn test_identity_mismatch_rejected() {
        let mut codec = v1(Framing::Length);
        let frame = codec.encode(&chat()).unwrap();
        let forged = format!("{}0301{}", &frame[..4], &frame[8..]);
        let err = codec.decode(&forged).unwrap_err();
        assert!(matches!(
            err,
            CodecError::IdentityMismatch {
                header: 0x0301,
                body: 0x0300
            }
        ));
        assert_eq!(err.kind(), ErrorKind::IdentityMismatch);
    }

    #[test]
    fn test_converts_to_protocol_error() {
        let err: wisp_common::Error = CodecError::HandshakeIncomplete.into();
        assert_eq!(
            err.to_string(),
            "protocol error: handshake incomplete: no iv installed"
        );
    }

    #[test]
    fn test_wrong_level_tag_is_malformed() {
        let (_, server) = v2_pair(Framing::Length);
        let frame = server.encode(&chat()).unwrap();
        let err = v1(Framing::Length).decode(&frame).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedFrame);
    }

    #[test]
    fn test_v2_cannot_encode_before_bootstrap() {
        let (client, _) = v2_pair(Framing::Length);
        assert!(!client.is_secured());
        assert!(matches!(
            client.encode(&chat()),
            Err(CodecError::HandshakeIncomplete)
        ));
    }

    #[test]
    fn test_v2_encrypted_frame_before_bootstrap_is_rejected() {
        let (mut client, server) = v2_pair(Framing::Length);
        let frame = server.encode(&chat()).unwrap();
        let err = client.decode(&frame).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HandshakeIncomplete);
        assert!(!client.is_secured());
    }

    #[test]
    fn test_v2_bootstrap_installs_iv() {
        let (mut client, server) = v2_pair(Framing::Length);

        let boot = client.decode(&bootstrap_text("1111222233334444")).unwrap();
        assert_eq!(boot.id(), CONNECT_SUCCESS);
        assert!(client.is_secured());
        assert_eq!(client.iv(), Some("1111222233334444"));

        let frame = server.encode(&chat()).unwrap();
        assert!(frame.starts_with("023a0300"));
        assert_eq!(client.decode(&frame).unwrap(), chat());

        let mut server = server;
        let reply = client.encode(&chat()).unwrap();
        assert_eq!(server.decode(&reply).unwrap(), chat());
    }

    #[test]
    fn test_v2_second_bootstrap_is_not_plaintext() {
        let (mut client, _) = v2_pair(Framing::Length);
        client.decode(&bootstrap_text("1111222233334444")).unwrap();

        let err = client.decode(&bootstrap_text("5555666677778888")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedFrame);
        assert_eq!(client.iv(), Some("1111222233334444"));
    }

    #[test]
    fn test_v2_other_plaintext_is_rejected() {
        let (mut client, _) = v2_pair(Framing::Length);
        let err = client.decode(&chat().encode().unwrap()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HandshakeIncomplete);

        let bare = Message::new(CONNECT_SUCCESS, "connect_success")
            .unwrap()
            .encode()
            .unwrap();
        assert!(matches!(
            client.decode(&bare),
            Err(CodecError::HandshakeIncomplete)
        ));
        assert!(!client.is_secured());
    }

    #[test]
    fn test_v2_bootstrap_under_wrong_secret_fails() {
        let (mut client, _) = v2_pair(Framing::Length);
        let other = PreSharedSecret::new(*b"other-key-012345", *b"other-iv-0123456").unwrap();
        let data = cipher::seal_base64("1111222233334444", other.key(), other.iv()).unwrap();
        let text = Message::new(CONNECT_SUCCESS, "connect_success")
            .unwrap()
            .with_field(BOOTSTRAP_FIELD, data)
            .encode()
            .unwrap();

        let err = client.decode(&text).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IntegrityFailure);
        assert!(!client.is_secured());
    }
}

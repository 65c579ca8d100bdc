//! Cryptographic layer for Wisp.
//!
//! This crate provides:
//! - AES-CBC sealing of text with PKCS#7 padding, and a truncated body digest
//! - The pre-shared secret and per-dial key material
//! - The codec family that turns messages into frames for each level
//! - The responder side of the handshake
//!
//! # Design
//!
//! The pre-shared secret never protects application traffic. It only seals
//! the client's ephemeral key (both encrypted levels) and the server's IV
//! (level 2). Key material lives exactly as long as one connection.

#![forbid(unsafe_code)]

pub mod acceptor;
pub mod cipher;
pub mod codec;
pub mod keys;

pub use acceptor::{accept, parse_level, AcceptError, Accepted};
pub use cipher::CipherError;
pub use codec::{Codec, CodecError};
pub use keys::{NegotiatedKeys, PreSharedSecret, StaticKeys};

//! Pre-shared secret and per-dial key material.
//!
//! # Key Schedule
//!
//! ```text
//! level 1: ephemeral = token ∥ token (32 chars)
//!          cipher key = ephemeral[0..16], iv = ephemeral[16..32]
//! level 2: ephemeral = token (16 chars) = cipher key
//!          iv = delivered by the server, sealed under the pre-shared secret
//! ```
//!
//! The client sends `seal_hex(ephemeral, psk)` as the `k` query parameter.
//! Nothing here survives a redial: every dial generates new material.

use std::fmt;

use rand::Rng;
use zeroize::Zeroizing;

use crate::cipher::{self, CipherError};

/// Length of one random hex token.
pub const TOKEN_LEN: usize = 16;

/// Length of the level 1 ephemeral key.
pub const STATIC_KEY_LEN: usize = 2 * TOKEN_LEN;

/// Generate a random 16-hex-digit token.
///
/// The leading digit is never zero so the width is always [`TOKEN_LEN`].
pub fn random_token() -> String {
    let value: u64 = rand::thread_rng().gen_range(0x1000_0000_0000_0000..=u64::MAX);
    format!("{value:016x}")
}

/// Static key/IV pair known to both ends before any handshake.
///
/// Only ever used to seal the ephemeral key and the level 2 IV.
#[derive(Clone)]
pub struct PreSharedSecret {
    key: Zeroizing<Vec<u8>>,
    iv: Zeroizing<Vec<u8>>,
}

impl PreSharedSecret {
    pub fn new(key: impl Into<Vec<u8>>, iv: impl Into<Vec<u8>>) -> Result<Self, CipherError> {
        let key = Zeroizing::new(key.into());
        let iv = Zeroizing::new(iv.into());
        cipher::check_key(&key)?;
        cipher::check_iv(&iv)?;
        Ok(Self { key, iv })
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    /// Seal an ephemeral key for the `k` query parameter.
    pub fn seal_ephemeral(&self, ephemeral: &str) -> Result<String, CipherError> {
        cipher::seal_hex(ephemeral, &self.key, &self.iv)
    }

    /// Recover an ephemeral key from the `k` query parameter.
    pub fn open_ephemeral(&self, sealed: &str) -> Result<Zeroizing<String>, CipherError> {
        cipher::open_hex(sealed, &self.key, &self.iv).map(Zeroizing::new)
    }
}

impl fmt::Debug for PreSharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreSharedSecret")
            .field("key_len", &self.key.len())
            .finish_non_exhaustive()
    }
}

/// Level 1 key material: key and IV carved from one ephemeral key.
#[derive(Clone)]
pub struct StaticKeys {
    ephemeral: Zeroizing<String>,
}

impl StaticKeys {
    /// Fresh material for one dial.
    pub fn generate() -> Self {
        let mut ephemeral = random_token();
        ephemeral.push_str(&random_token());
        Self {
            ephemeral: Zeroizing::new(ephemeral),
        }
    }

    pub fn from_ephemeral(ephemeral: impl Into<String>) -> Result<Self, CipherError> {
        let ephemeral = Zeroizing::new(ephemeral.into());
        if ephemeral.len() != STATIC_KEY_LEN || !ephemeral.is_ascii() {
            return Err(CipherError::InvalidKeyLength(ephemeral.len()));
        }
        Ok(Self { ephemeral })
    }

    pub fn ephemeral(&self) -> &str {
        &self.ephemeral
    }

    pub fn cipher_key(&self) -> &[u8] {
        &self.ephemeral.as_bytes()[..TOKEN_LEN]
    }

    pub fn iv(&self) -> &[u8] {
        &self.ephemeral.as_bytes()[TOKEN_LEN..]
    }
}

impl fmt::Debug for StaticKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticKeys").finish_non_exhaustive()
    }
}

/// Level 2 key material.
///
/// Starts in `Handshaking` and moves to `Secured` exactly once, when the
/// server's IV has been recovered. Outbound encryption needs `Secured`.
#[derive(Clone)]
pub enum NegotiatedKeys {
    Handshaking {
        ephemeral: Zeroizing<String>,
    },
    Secured {
        ephemeral: Zeroizing<String>,
        iv: Zeroizing<String>,
    },
}

impl NegotiatedKeys {
    /// Fresh material for one dial, awaiting the server's IV.
    pub fn generate() -> Self {
        NegotiatedKeys::Handshaking {
            ephemeral: Zeroizing::new(random_token()),
        }
    }

    pub fn handshaking(ephemeral: impl Into<String>) -> Result<Self, CipherError> {
        let ephemeral = Zeroizing::new(ephemeral.into());
        cipher::check_key(ephemeral.as_bytes())?;
        Ok(NegotiatedKeys::Handshaking { ephemeral })
    }

    pub fn ephemeral(&self) -> &str {
        match self {
            NegotiatedKeys::Handshaking { ephemeral } => ephemeral,
            NegotiatedKeys::Secured { ephemeral, .. } => ephemeral,
        }
    }

    pub fn iv(&self) -> Option<&str> {
        match self {
            NegotiatedKeys::Handshaking { .. } => None,
            NegotiatedKeys::Secured { iv, .. } => Some(iv),
        }
    }

    pub fn is_secured(&self) -> bool {
        matches!(self, NegotiatedKeys::Secured { .. })
    }

    /// Transition to `Secured` with the server's IV.
    ///
    /// Only valid from `Handshaking`; the IV is never replaced once set.
    pub fn secure(&self, iv: impl Into<String>) -> Result<NegotiatedKeys, KeyStateError> {
        let NegotiatedKeys::Handshaking { ephemeral } = self else {
            return Err(KeyStateError::AlreadySecured);
        };
        let iv = Zeroizing::new(iv.into());
        cipher::check_iv(iv.as_bytes()).map_err(KeyStateError::Cipher)?;
        Ok(NegotiatedKeys::Secured {
            ephemeral: ephemeral.clone(),
            iv,
        })
    }
}

impl fmt::Debug for NegotiatedKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NegotiatedKeys::Handshaking { .. } => write!(f, "Handshaking"),
            NegotiatedKeys::Secured { .. } => write!(f, "Secured"),
        }
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum KeyStateError {
    #[error("iv already installed")]
    AlreadySecured,
    #[error("invalid iv: {0}")]
    Cipher(CipherError),
}

//! AES-CBC primitives and the truncated body digest.
//!
//! Keys and IVs are the raw bytes of ASCII strings, as the browser client
//! feeds them to its cipher. Key length picks the AES variant (16, 24 or 32
//! bytes); IVs are always 16 bytes. Padding is PKCS#7.

use aes::{Aes128, Aes192, Aes256};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const IV_LEN: usize = 16;
pub const DIGEST_LEN: usize = 4;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("invalid key length: {0} bytes")]
    InvalidKeyLength(usize),
    #[error("invalid iv length: {0} bytes")]
    InvalidIvLength(usize),
    #[error("decryption failed: bad padding")]
    Padding,
    #[error("invalid base64: {0}")]
    Base64(String),
    #[error("invalid hex: {0}")]
    Hex(String),
    #[error("plaintext is not valid utf-8")]
    Utf8,
}

impl From<CipherError> for wisp_common::Error {
    fn from(err: CipherError) -> Self {
        wisp_common::Error::crypto(err)
    }
}

/// Check that `key` selects an AES variant.
pub fn check_key(key: &[u8]) -> Result<(), CipherError> {
    match key.len() {
        16 | 24 | 32 => Ok(()),
        n => Err(CipherError::InvalidKeyLength(n)),
    }
}

/// Check that `iv` is one block long.
pub fn check_iv(iv: &[u8]) -> Result<(), CipherError> {
    if iv.len() == IV_LEN {
        Ok(())
    } else {
        Err(CipherError::InvalidIvLength(iv.len()))
    }
}

pub fn encrypt(plaintext: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>, CipherError> {
    check_key(key)?;
    check_iv(iv)?;

    let bad_key = |_| CipherError::InvalidKeyLength(key.len());
    let ciphertext = match key.len() {
        16 => cbc::Encryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(bad_key)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        24 => cbc::Encryptor::<Aes192>::new_from_slices(key, iv)
            .map_err(bad_key)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        _ => cbc::Encryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(bad_key)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
    };
    Ok(ciphertext)
}

pub fn decrypt(ciphertext: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>, CipherError> {
    check_key(key)?;
    check_iv(iv)?;

    let bad_key = |_| CipherError::InvalidKeyLength(key.len());
    let plaintext = match key.len() {
        16 => cbc::Decryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(bad_key)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        24 => cbc::Decryptor::<Aes192>::new_from_slices(key, iv)
            .map_err(bad_key)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        _ => cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(bad_key)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
    };
    plaintext.map_err(|_| CipherError::Padding)
}

/// First [`DIGEST_LEN`] bytes of the SHA-256 of `bytes`.
pub fn digest(bytes: &[u8]) -> [u8; DIGEST_LEN] {
    let full = Sha256::digest(bytes);
    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(&full[..DIGEST_LEN]);
    out
}

/// Encrypt UTF-8 text and render the ciphertext as standard base64.
pub fn seal_base64(plaintext: &str, key: &[u8], iv: &[u8]) -> Result<String, CipherError> {
    Ok(STANDARD.encode(encrypt(plaintext.as_bytes(), key, iv)?))
}

/// Inverse of [`seal_base64`].
pub fn open_base64(sealed: &str, key: &[u8], iv: &[u8]) -> Result<String, CipherError> {
    let ciphertext = STANDARD
        .decode(sealed)
        .map_err(|e| CipherError::Base64(e.to_string()))?;
    utf8(decrypt(&ciphertext, key, iv)?)
}

/// Encrypt UTF-8 text and render the ciphertext as lowercase hex.
pub fn seal_hex(plaintext: &str, key: &[u8], iv: &[u8]) -> Result<String, CipherError> {
    Ok(hex::encode(encrypt(plaintext.as_bytes(), key, iv)?))
}

/// Inverse of [`seal_hex`].
pub fn open_hex(sealed: &str, key: &[u8], iv: &[u8]) -> Result<String, CipherError> {
    let ciphertext = hex::decode(sealed).map_err(|e| CipherError::Hex(e.to_string()))?;
    utf8(decrypt(&ciphertext, key, iv)?)
}

fn utf8(bytes: Vec<u8>) -> Result<String, CipherError> {
    String::from_utf8(bytes).map_err(|_| CipherError::Utf8)
}

//! Client-side payload encryption
//!
//! AES-256-GCM with a random 96-bit nonce per payload. Encrypted payloads
//! are framed as `MAGIC || nonce || ciphertext || tag`.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use rand::RngCore;
use rand::rngs::OsRng;

use crate::error::{Error, Result};

/// Frame marker for encrypted payloads
pub const MAGIC: &[u8; 4] = b"STW1";

/// Required key length in bytes
pub const KEY_LEN: usize = 32;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Metadata name flagging an encrypted object
pub const META_ENCRYPTED: &str = "encrypted";

/// Metadata name recording the key alias used
pub const META_KEY_ALIAS: &str = "encryption-key-alias";

/// Bytes added to a payload by [`encrypt`]
pub const OVERHEAD: usize = MAGIC.len() + NONCE_LEN + TAG_LEN;

fn cipher(key: &[u8]) -> Result<Aes256Gcm> {
    Aes256Gcm::new_from_slice(key).map_err(|_| {
        Error::Encryption(format!(
            "key must be {KEY_LEN} bytes, got {} bytes",
            key.len()
        ))
    })
}

/// Encrypt a payload under a 32-byte key
pub fn encrypt(plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher(key)?;

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| Error::Encryption(format!("AES-GCM encrypt: {e}")))?;

    let mut out = Vec::with_capacity(OVERHEAD + plaintext.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Decrypt a payload produced by [`encrypt`]
pub fn decrypt(payload: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher(key)?;

    if payload.len() < OVERHEAD || !payload.starts_with(MAGIC) {
        return Err(Error::Encryption(
            "payload is not an encrypted stowage object".into(),
        ));
    }

    let (nonce, sealed) = payload[MAGIC.len()..].split_at(NONCE_LEN);
    cipher
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|_| Error::Encryption("authentication failed: wrong key or corrupted data".into()))
}

/// Generate a fresh random key
pub fn generate_key() -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut key);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let key = generate_key();
        let big = vec![0u8; 4096];
        let payloads: [&[u8]; 4] = [b"", b"x", b"hello world", &big];
        for payload in payloads {
            let sealed = encrypt(payload, &key).unwrap();
            assert_eq!(sealed.len(), payload.len() + OVERHEAD);
            assert_eq!(decrypt(&sealed, &key).unwrap(), payload);
        }
    }

    #[test]
    fn test_nonce_is_fresh_per_payload() {
        let key = generate_key();
        let a = encrypt(b"same", &key).unwrap();
        let b = encrypt(b"same", &key).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = encrypt(b"secret", &generate_key()).unwrap();
        let err = decrypt(&sealed, &generate_key()).unwrap_err();
        assert!(matches!(err, Error::Encryption(_)));
    }

    #[test]
    fn test_tampered_payload_fails() {
        let key = generate_key();
        let mut sealed = encrypt(b"secret", &key).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(decrypt(&sealed, &key).is_err());
    }

    #[test]
    fn test_rejects_plaintext_and_short_keys() {
        let key = generate_key();
        assert!(decrypt(b"plain bytes that are long enough to pass", &key).is_err());
        assert!(encrypt(b"data", &key[..16]).is_err());
    }
}

//! Symmetric encryption of envelope bytes.
//!
//! Channels can optionally encrypt every frame with AES-256-CBC and PKCS7
//! padding under a pre-shared, Base64-encoded 32 byte key.
//!
//! A warning regarding the initialization vector: it is derived once, as the
//! first 16 bytes of the SHA-256 digest of a constant string. Every message
//! under a given key therefore encrypts with the same IV and produces
//! deterministic ciphertext. Equal plaintext prefixes are visible to an
//! observer, which is a known CBC weakness. The deterministic output is part
//! of the protocol this crate implements, so it is kept rather than fixed.
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD, Engine};
use sha2::{Digest, Sha256};

use crate::{error::Error, internal_prelude::*};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub const KEY_LENGTH: usize = 32;
const IV_LENGTH: usize = 16;

/// The constant seed the per-key IV is derived from.
const IV_SEED: &str = "pipelink.channel.iv";

/// Encrypts and decrypts opaque byte buffers under a pre-shared key.
#[derive(Clone)]
pub struct Cipher {
    key: [u8; KEY_LENGTH],
    iv: [u8; IV_LENGTH],
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material must never end up in logs.
        f.debug_struct("Cipher").finish_non_exhaustive()
    }
}

impl Cipher {
    /// Build a cipher from a Base64-encoded 32 byte key, as produced by
    /// [`generate_key`](crate::secret::generate_key).
    pub fn new(base64_key: &str) -> Result<Self, Error> {
        let decoded = STANDARD
            .decode(base64_key)
            .map_err(|err| Error::Crypto(format!("Key is not valid Base64: {err}")))?;
        let key: [u8; KEY_LENGTH] = decoded
            .try_into()
            .map_err(|bytes: Vec<u8>| Error::InvalidKey(bytes.len()))?;

        let digest = Sha256::digest(IV_SEED.as_bytes());
        let mut iv = [0u8; IV_LENGTH];
        iv.copy_from_slice(&digest[..IV_LENGTH]);

        Ok(Cipher { key, iv })
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        if plaintext.is_empty() {
            return Err(Error::EmptyPayload);
        }

        trace!("Encrypting {} bytes", plaintext.len());
        let ciphertext = Aes256CbcEnc::new(&self.key.into(), &self.iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        Ok(ciphertext)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        if ciphertext.is_empty() {
            return Err(Error::EmptyPayload);
        }

        trace!("Decrypting {} bytes", ciphertext.len());
        Aes256CbcDec::new(&self.key.into(), &self.iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|err| Error::Crypto(format!("Failed to decrypt message: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::secret::generate_key;

    #[test]
    fn roundtrip_restores_the_plaintext() {
        let cipher = Cipher::new(&generate_key()).unwrap();
        let plaintext = b"the parent process says hello".to_vec();

        let ciphertext = cipher.encrypt(&plaintext).unwrap();
        assert_ne!(ciphertext, plaintext);

        let decrypted = cipher.decrypt(&ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn short_key_is_rejected_at_construction() {
        let short_key = STANDARD.encode([0u8; 16]);
        let result = Cipher::new(&short_key);
        assert!(matches!(result, Err(Error::InvalidKey(16))));
    }

    #[test]
    fn garbage_key_is_rejected_at_construction() {
        let result = Cipher::new("???definitely-not-base64???");
        assert!(matches!(result, Err(Error::Crypto(_))));
    }

    #[test]
    fn empty_input_is_rejected() {
        let cipher = Cipher::new(&generate_key()).unwrap();
        assert!(matches!(cipher.encrypt(&[]), Err(Error::EmptyPayload)));
        assert!(matches!(cipher.decrypt(&[]), Err(Error::EmptyPayload)));
    }

    #[test]
    fn ciphertext_is_deterministic_under_one_key() {
        // The IV is fixed per key, so equal plaintexts produce equal
        // ciphertexts. Protocol behavior, not a feature.
        let cipher = Cipher::new(&generate_key()).unwrap();
        let first = cipher.encrypt(b"same message").unwrap();
        let second = cipher.encrypt(b"same message").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn tampered_ciphertext_fails_to_decrypt() {
        let cipher = Cipher::new(&generate_key()).unwrap();
        let mut ciphertext = cipher.encrypt(b"payload bytes").unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0xff;

        assert!(matches!(cipher.decrypt(&ciphertext), Err(Error::Crypto(_))));
    }
}

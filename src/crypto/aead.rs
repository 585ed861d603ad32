//! AEAD ciphers for Noise
//!
//! ChaCha20-Poly1305 and AES-256-GCM with the Noise nonce layout: 32 zero
//! bits followed by the 64-bit counter (little-endian for ChaChaPoly,
//! big-endian for AESGCM).

use aes_gcm::Aes256Gcm;
use chacha20poly1305::{
    aead::{generic_array::GenericArray, Aead, KeyInit, Payload},
    ChaCha20Poly1305,
};

use crate::error::CryptoError;

/// Authentication tag length
pub const TAG_LEN: usize = 16;

/// Cipher key length
pub const KEY_LEN: usize = 32;

/// Cipher nonce length
pub const NONCE_LEN: usize = 12;

/// Cipher function named in a Noise protocol name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherAlgorithm {
    ChaChaPoly,
    AesGcm,
}

impl CipherAlgorithm {
    /// Resolve the cipher token of a protocol name
    pub fn from_name(name: &str) -> Result<Self, CryptoError> {
        match name {
            "ChaChaPoly" => Ok(Self::ChaChaPoly),
            "AESGCM" => Ok(Self::AesGcm),
            _ => Err(CryptoError::UnsupportedPrimitive {
                component: "cipher",
                name: name.to_string(),
            }),
        }
    }

    /// Token used in protocol names
    pub fn name(&self) -> &'static str {
        match self {
            Self::ChaChaPoly => "ChaChaPoly",
            Self::AesGcm => "AESGCM",
        }
    }

    fn nonce(&self, counter: u64) -> [u8; NONCE_LEN] {
        let mut nonce = [0u8; NONCE_LEN];
        match self {
            Self::ChaChaPoly => nonce[4..].copy_from_slice(&counter.to_le_bytes()),
            Self::AesGcm => nonce[4..].copy_from_slice(&counter.to_be_bytes()),
        }
        nonce
    }

    /// Encrypt plaintext, returning ciphertext with the tag appended
    pub fn encrypt(
        &self,
        key: &[u8; KEY_LEN],
        counter: u64,
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let nonce = self.nonce(counter);
        let payload = Payload {
            msg: plaintext,
            aad,
        };

        let result = match self {
            Self::ChaChaPoly => ChaCha20Poly1305::new(GenericArray::from_slice(key))
                .encrypt(GenericArray::from_slice(&nonce), payload),
            Self::AesGcm => Aes256Gcm::new(GenericArray::from_slice(key))
                .encrypt(GenericArray::from_slice(&nonce), payload),
        };
        // Only fails for plaintexts beyond the cipher's length limit
        result.map_err(|_| CryptoError::AuthenticationFailure)
    }

    /// Decrypt ciphertext; nothing is returned unless the tag verifies
    pub fn decrypt(
        &self,
        key: &[u8; KEY_LEN],
        counter: u64,
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < TAG_LEN {
            return Err(CryptoError::AuthenticationFailure);
        }

        let nonce = self.nonce(counter);
        let payload = Payload {
            msg: ciphertext,
            aad,
        };

        let result = match self {
            Self::ChaChaPoly => ChaCha20Poly1305::new(GenericArray::from_slice(key))
                .decrypt(GenericArray::from_slice(&nonce), payload),
            Self::AesGcm => Aes256Gcm::new(GenericArray::from_slice(key))
                .decrypt(GenericArray::from_slice(&nonce), payload),
        };
        result.map_err(|_| CryptoError::AuthenticationFailure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CIPHERS: [CipherAlgorithm; 2] = [CipherAlgorithm::ChaChaPoly, CipherAlgorithm::AesGcm];

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = [0u8; 32];
        let plaintext = b"Hello, enclave!";
        let aad = b"additional data";

        for cipher in CIPHERS {
            let ciphertext = cipher.encrypt(&key, 42, aad, plaintext).unwrap();
            assert_eq!(ciphertext.len(), plaintext.len() + TAG_LEN);

            let decrypted = cipher.decrypt(&key, 42, aad, &ciphertext).unwrap();
            assert_eq!(decrypted, plaintext);
        }
    }

    #[test]
    fn test_decrypt_wrong_key() {
        for cipher in CIPHERS {
            let ciphertext = cipher.encrypt(&[0u8; 32], 1, b"", b"secret").unwrap();
            let result = cipher.decrypt(&[1u8; 32], 1, b"", &ciphertext);
            assert_eq!(result.unwrap_err(), CryptoError::AuthenticationFailure);
        }
    }

    #[test]
    fn test_decrypt_wrong_counter() {
        for cipher in CIPHERS {
            let ciphertext = cipher.encrypt(&[0u8; 32], 42, b"", b"secret").unwrap();
            assert!(cipher.decrypt(&[0u8; 32], 43, b"", &ciphertext).is_err());
        }
    }

    #[test]
    fn test_decrypt_wrong_aad() {
        for cipher in CIPHERS {
            let ciphertext = cipher.encrypt(&[0u8; 32], 0, b"correct aad", b"x").unwrap();
            assert!(cipher.decrypt(&[0u8; 32], 0, b"wrong aad", &ciphertext).is_err());
        }
    }

    #[test]
    fn test_nonce_layouts_differ() {
        let chacha = CipherAlgorithm::ChaChaPoly.nonce(1);
        let aes = CipherAlgorithm::AesGcm.nonce(1);

        assert_eq!(chacha, [0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(aes, [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn test_short_ciphertext_rejected() {
        for cipher in CIPHERS {
            let result = cipher.decrypt(&[0u8; 32], 0, b"", &[0u8; TAG_LEN - 1]);
            assert_eq!(result.unwrap_err(), CryptoError::AuthenticationFailure);
        }
    }

    #[test]
    fn test_empty_plaintext() {
        for cipher in CIPHERS {
            let ciphertext = cipher.encrypt(&[0u8; 32], 0, b"", &[]).unwrap();
            assert_eq!(ciphertext.len(), TAG_LEN);
            assert!(cipher.decrypt(&[0u8; 32], 0, b"", &ciphertext).unwrap().is_empty());
        }
    }
}

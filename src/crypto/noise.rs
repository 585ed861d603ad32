//! Noise CipherState and SymmetricState
//!
//! The symmetric half of the Noise framework: a keyed AEAD with a nonce
//! counter, and the chaining-key/transcript-hash pair that every handshake
//! token feeds into.

use zeroize::{Zeroize, Zeroizing};

use super::aead::{self, CipherAlgorithm};
use super::hash::HashAlgorithm;
use crate::error::CryptoError;

/// Nonce value reserved by Noise; reaching it means the key is spent
pub const MAX_NONCE: u64 = u64::MAX;

/// A cipher key plus a 64-bit nonce counter
pub struct CipherState {
    cipher: CipherAlgorithm,
    key: Option<Zeroizing<[u8; aead::KEY_LEN]>>,
    nonce: u64,
}

impl CipherState {
    /// Create an empty (unkeyed) cipher state
    pub fn new(cipher: CipherAlgorithm) -> Self {
        Self {
            cipher,
            key: None,
            nonce: 0,
        }
    }

    /// Create a cipher state keyed with `key`
    pub fn with_key(cipher: CipherAlgorithm, key: &[u8; aead::KEY_LEN]) -> Self {
        let mut state = Self::new(cipher);
        state.initialize_key(key);
        state
    }

    /// Like [`with_key`](Self::with_key) for keys held as slices
    pub fn from_key_slice(cipher: CipherAlgorithm, key: &[u8]) -> Result<Self, CryptoError> {
        let key: &[u8; aead::KEY_LEN] =
            key.try_into().map_err(|_| CryptoError::InvalidKeyLength {
                expected: aead::KEY_LEN,
                got: key.len(),
            })?;
        Ok(Self::with_key(cipher, key))
    }

    /// Install a new key and reset the nonce
    pub fn initialize_key(&mut self, key: &[u8; aead::KEY_LEN]) {
        self.key = Some(Zeroizing::new(*key));
        self.nonce = 0;
    }

    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    /// Next nonce to be used
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Noise SetNonce; only moves the counter, never the key
    pub fn set_nonce(&mut self, nonce: u64) {
        self.nonce = nonce;
    }

    pub fn cipher(&self) -> CipherAlgorithm {
        self.cipher
    }

    /// Encrypt under the current nonce, then advance it
    ///
    /// Without a key the plaintext passes through unchanged.
    pub fn encrypt_with_ad(&mut self, ad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let Some(key) = &self.key else {
            return Ok(plaintext.to_vec());
        };
        if self.nonce == MAX_NONCE {
            return Err(CryptoError::NonceExhausted);
        }

        let ciphertext = self.cipher.encrypt(key, self.nonce, ad, plaintext)?;
        self.nonce += 1;
        Ok(ciphertext)
    }

    /// Decrypt under the current nonce; the nonce only advances on success
    pub fn decrypt_with_ad(&mut self, ad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let Some(key) = &self.key else {
            return Ok(ciphertext.to_vec());
        };
        if self.nonce == MAX_NONCE {
            return Err(CryptoError::NonceExhausted);
        }

        let plaintext = self.cipher.decrypt(key, self.nonce, ad, ciphertext)?;
        self.nonce += 1;
        Ok(plaintext)
    }

    /// Noise REKEY: derive a fresh key by encrypting zeros under the reserved nonce
    pub fn rekey(&mut self) -> Result<(), CryptoError> {
        let Some(key) = &self.key else {
            return Ok(());
        };

        let zeros = [0u8; aead::KEY_LEN];
        let output = Zeroizing::new(self.cipher.encrypt(key, MAX_NONCE, &[], &zeros)?);
        self.key = Some(truncate_key(&output));
        Ok(())
    }

    /// Drop the key; the buffer is wiped
    pub fn clear(&mut self) {
        self.key = None;
    }
}

impl std::fmt::Debug for CipherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherState")
            .field("cipher", &self.cipher)
            .field("has_key", &self.has_key())
            .field("nonce", &self.nonce)
            .finish()
    }
}

/// Chaining key, transcript hash and the handshake cipher state
pub struct SymmetricState {
    hash: HashAlgorithm,
    /// Chaining key for key derivation
    chaining_key: Zeroizing<Vec<u8>>,
    /// Transcript hash
    h: Vec<u8>,
    cipher: CipherState,
}

impl SymmetricState {
    /// InitializeSymmetric(protocol_name)
    ///
    /// Names no longer than HASHLEN are zero-padded, longer names are hashed.
    pub fn initialize(protocol_name: &str, cipher: CipherAlgorithm, hash: HashAlgorithm) -> Self {
        let name = protocol_name.as_bytes();
        let h = if name.len() <= hash.hash_len() {
            let mut padded = vec![0u8; hash.hash_len()];
            padded[..name.len()].copy_from_slice(name);
            padded
        } else {
            hash.hash(name)
        };

        Self {
            hash,
            chaining_key: Zeroizing::new(h.clone()),
            h,
            cipher: CipherState::new(cipher),
        }
    }

    /// MixKey: (ck, k) = HKDF(ck, input_key_material)
    pub fn mix_key(&mut self, input_key_material: &[u8]) {
        let (ck, temp_k) = self.hash.hkdf2(&self.chaining_key, input_key_material);
        self.chaining_key = ck;
        self.cipher.initialize_key(&truncate_key(&temp_k));
    }

    /// MixHash: h = HASH(h || data)
    pub fn mix_hash(&mut self, data: &[u8]) {
        self.h = self.hash.hash_parts(&[self.h.as_slice(), data]);
    }

    /// MixKeyAndHash: (ck, temp_h, k) = HKDF(ck, input_key_material, 3)
    pub fn mix_key_and_hash(&mut self, input_key_material: &[u8]) {
        let (ck, temp_h, temp_k) = self.hash.hkdf3(&self.chaining_key, input_key_material);
        self.chaining_key = ck;
        self.mix_hash(&temp_h);
        self.cipher.initialize_key(&truncate_key(&temp_k));
    }

    pub fn has_key(&self) -> bool {
        self.cipher.has_key()
    }

    /// Current transcript hash
    pub fn handshake_hash(&self) -> &[u8] {
        &self.h
    }

    /// EncryptAndHash: c = ENCRYPT(k, n++, h, plaintext); h = HASH(h || c)
    pub fn encrypt_and_hash(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let ciphertext = self.cipher.encrypt_with_ad(&self.h, plaintext)?;
        self.mix_hash(&ciphertext);
        Ok(ciphertext)
    }

    /// DecryptAndHash: p = DECRYPT(k, n++, h, c); h = HASH(h || c)
    pub fn decrypt_and_hash(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let plaintext = self.cipher.decrypt_with_ad(&self.h, ciphertext)?;
        self.mix_hash(ciphertext);
        Ok(plaintext)
    }

    /// Split into the (initiator -> responder, responder -> initiator) cipher states
    pub fn split(self) -> (CipherState, CipherState) {
        let (k1, k2) = self.hash.hkdf2(&self.chaining_key, &[]);
        let cipher = self.cipher.cipher();
        (
            CipherState::with_key(cipher, &truncate_key(&k1)),
            CipherState::with_key(cipher, &truncate_key(&k2)),
        )
    }

    /// Wipe all key material after an aborted handshake
    pub fn wipe(&mut self) {
        self.chaining_key.zeroize();
        self.h.zeroize();
        self.cipher.clear();
    }
}

/// First 32 bytes of a derived secret; 64-byte hash outputs are truncated
fn truncate_key(output: &[u8]) -> Zeroizing<[u8; aead::KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; aead::KEY_LEN]);
    // HASHLEN and REKEY output are never below 32 bytes
    key.copy_from_slice(&output[..aead::KEY_LEN]);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAME: &str = "Noise_NN_25519_ChaChaPoly_SHA256";

    fn state() -> SymmetricState {
        SymmetricState::initialize(NAME, CipherAlgorithm::ChaChaPoly, HashAlgorithm::Sha256)
    }

    #[test]
    fn test_short_name_is_padded() {
        let state = state();
        assert_eq!(&state.handshake_hash()[..NAME.len()], NAME.as_bytes());
        assert!(state.handshake_hash()[NAME.len()..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_long_name_is_hashed() {
        let name = "Noise_XX_25519_ChaChaPoly_BLAKE2s_but_much_longer_than_thirty_two";
        let state =
            SymmetricState::initialize(name, CipherAlgorithm::ChaChaPoly, HashAlgorithm::Blake2s);
        assert_eq!(state.handshake_hash(), HashAlgorithm::Blake2s.hash(name.as_bytes()));
    }

    #[test]
    fn test_mix_hash() {
        let mut state = state();
        let original = state.handshake_hash().to_vec();

        state.mix_hash(b"test data");
        assert_ne!(state.handshake_hash(), original.as_slice());
    }

    #[test]
    fn test_unkeyed_encrypt_is_passthrough() {
        let mut state = state();
        assert!(!state.has_key());
        let out = state.encrypt_and_hash(b"visible").unwrap();
        assert_eq!(out, b"visible");
    }

    #[test]
    fn test_encrypt_decrypt_and_hash() {
        let mut alice = state();
        let mut bob = state();
        alice.mix_key(b"shared secret");
        bob.mix_key(b"shared secret");

        let ciphertext = alice.encrypt_and_hash(b"secret message").unwrap();
        let decrypted = bob.decrypt_and_hash(&ciphertext).unwrap();

        assert_eq!(decrypted, b"secret message");
        assert_eq!(alice.handshake_hash(), bob.handshake_hash());
    }

    #[test]
    fn test_split_keys_match_across_parties() {
        let mut alice = state();
        let mut bob = state();
        alice.mix_key(b"ikm");
        bob.mix_key(b"ikm");

        let (mut a1, mut a2) = alice.split();
        let (mut b1, mut b2) = bob.split();

        let c = a1.encrypt_with_ad(&[], b"one").unwrap();
        assert_eq!(b1.decrypt_with_ad(&[], &c).unwrap(), b"one");

        let c = b2.encrypt_with_ad(&[], b"two").unwrap();
        assert_eq!(a2.decrypt_with_ad(&[], &c).unwrap(), b"two");
    }

    #[test]
    fn test_cipher_state_nonce_exhaustion() {
        let mut cs = CipherState::with_key(CipherAlgorithm::AesGcm, &[3u8; 32]);
        cs.set_nonce(MAX_NONCE - 1);
        assert!(cs.encrypt_with_ad(&[], b"last").is_ok());
        assert_eq!(cs.nonce(), MAX_NONCE);
        assert_eq!(
            cs.encrypt_with_ad(&[], b"one too many").unwrap_err(),
            CryptoError::NonceExhausted
        );
    }

    #[test]
    fn test_short_key_slice_rejected() {
        assert_eq!(
            CipherState::from_key_slice(CipherAlgorithm::ChaChaPoly, &[0u8; 16]).unwrap_err(),
            CryptoError::InvalidKeyLength {
                expected: 32,
                got: 16
            }
        );
        assert!(CipherState::from_key_slice(CipherAlgorithm::AesGcm, &[0u8; 33]).is_err());

        let mut from_slice =
            CipherState::from_key_slice(CipherAlgorithm::ChaChaPoly, &[7u8; 32][..]).unwrap();
        let mut from_array = CipherState::with_key(CipherAlgorithm::ChaChaPoly, &[7u8; 32]);
        let c = from_slice.encrypt_with_ad(&[], b"same key").unwrap();
        assert_eq!(from_array.decrypt_with_ad(&[], &c).unwrap(), b"same key");
    }

    #[test]
    fn test_failed_decrypt_keeps_nonce() {
        let mut cs = CipherState::with_key(CipherAlgorithm::ChaChaPoly, &[3u8; 32]);
        assert!(cs.decrypt_with_ad(&[], &[0u8; 20]).is_err());
        assert_eq!(cs.nonce(), 0);
    }

    #[test]
    fn test_rekey_changes_key_not_nonce() {
        let mut sender = CipherState::with_key(CipherAlgorithm::ChaChaPoly, &[5u8; 32]);
        let mut receiver = CipherState::with_key(CipherAlgorithm::ChaChaPoly, &[5u8; 32]);
        let mut stale = CipherState::with_key(CipherAlgorithm::ChaChaPoly, &[5u8; 32]);

        sender.rekey().unwrap();
        receiver.rekey().unwrap();
        assert_eq!(sender.nonce(), 0);

        let c = sender.encrypt_with_ad(&[], b"after rekey").unwrap();
        assert!(stale.decrypt_with_ad(&[], &c).is_err());
        assert_eq!(receiver.decrypt_with_ad(&[], &c).unwrap(), b"after rekey");
    }

    #[test]
    fn test_wipe_clears_key() {
        let mut state = state();
        state.mix_key(b"ikm");
        state.wipe();
        assert!(!state.has_key());
        assert!(state.handshake_hash().is_empty());
    }
}

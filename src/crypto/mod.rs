//! Cryptographic primitives for Noise
//!
//! This module provides the primitive suite and symmetric state:
//! - X25519 Diffie-Hellman key exchange (dh)
//! - ChaCha20-Poly1305 and AES-256-GCM AEAD encryption (aead)
//! - SHA-2 and BLAKE2 hashing, HMAC, and HKDF (hash)
//! - Noise CipherState and SymmetricState (noise)

pub mod aead;
pub mod dh;
pub mod hash;
pub mod noise;

pub use aead::CipherAlgorithm;
pub use dh::{DhAlgorithm, KeyPair, PublicKeyBytes};
pub use hash::HashAlgorithm;
pub use noise::{CipherState, SymmetricState};

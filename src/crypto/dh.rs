//! Diffie-Hellman functions for Noise handshakes
//!
//! Provides key generation and DH operations. Only Curve25519 is available;
//! the enum is the seam where further curves plug in.

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Key length for X25519 (both private and public keys are 32 bytes)
pub const KEY_LEN: usize = 32;

/// Raw public key bytes
pub type PublicKeyBytes = [u8; KEY_LEN];

/// DH function named in a Noise protocol name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DhAlgorithm {
    Curve25519,
}

impl DhAlgorithm {
    /// Resolve the DH token of a protocol name
    pub fn from_name(name: &str) -> Result<Self, CryptoError> {
        match name {
            "25519" => Ok(Self::Curve25519),
            _ => Err(CryptoError::UnsupportedPrimitive {
                component: "DH function",
                name: name.to_string(),
            }),
        }
    }

    /// Token used in protocol names
    pub fn name(&self) -> &'static str {
        match self {
            Self::Curve25519 => "25519",
        }
    }

    /// Length of public keys and shared secrets (DHLEN)
    pub fn dh_len(&self) -> usize {
        match self {
            Self::Curve25519 => KEY_LEN,
        }
    }

    /// Generate a new key pair
    pub fn generate_keypair(&self) -> KeyPair {
        match self {
            Self::Curve25519 => KeyPair::generate(),
        }
    }

    /// Compute the shared secret from our key pair and their public key
    ///
    /// An all-zero result means the peer sent a low-order point and is rejected.
    pub fn dh(
        &self,
        local: &KeyPair,
        remote_public: &[u8],
    ) -> Result<Zeroizing<[u8; KEY_LEN]>, CryptoError> {
        match self {
            Self::Curve25519 => {
                let remote: PublicKeyBytes =
                    remote_public
                        .try_into()
                        .map_err(|_| CryptoError::InvalidKeyLength {
                            expected: KEY_LEN,
                            got: remote_public.len(),
                        })?;
                let secret = StaticSecret::from(*local.private);
                let shared = Zeroizing::new(
                    secret
                        .diffie_hellman(&PublicKey::from(remote))
                        .to_bytes(),
                );
                if shared.iter().all(|&b| b == 0) {
                    return Err(CryptoError::DiffieHellman);
                }
                Ok(shared)
            }
        }
    }
}

/// A static or ephemeral key pair; the private half is wiped on drop
#[derive(Clone)]
pub struct KeyPair {
    private: Zeroizing<[u8; KEY_LEN]>,
    public: PublicKeyBytes,
}

impl KeyPair {
    /// Generate a new X25519 key pair
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self {
            private: Zeroizing::new(secret.to_bytes()),
            public: public.to_bytes(),
        }
    }

    /// Rebuild a key pair from private key bytes
    pub fn from_private(private_key: [u8; KEY_LEN]) -> Self {
        let private = Zeroizing::new(private_key);
        let public = PublicKey::from(&StaticSecret::from(*private)).to_bytes();
        Self { private, public }
    }

    pub fn public_key(&self) -> &PublicKeyBytes {
        &self.public
    }

    /// Private key bytes, for persisting into a config file
    pub fn private_key(&self) -> &[u8; KEY_LEN] {
        &self.private
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &hex::encode(self.public))
            .finish_non_exhaustive()
    }
}

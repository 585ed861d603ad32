//! Cipher suite resolution from Noise protocol names
//!
//! `Noise_<Pattern>_<DH>_<Cipher>_<Hash>`, e.g. `Noise_NX_25519_AESGCM_SHA256`.

use std::fmt;
use std::str::FromStr;

use crate::crypto::{CipherAlgorithm, DhAlgorithm, HashAlgorithm};
use crate::error::CryptoError;
use crate::protocol::pattern::HandshakePattern;

/// Immutable binding of a handshake pattern to its primitives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CipherSuite {
    pub pattern: HandshakePattern,
    pub dh: DhAlgorithm,
    pub cipher: CipherAlgorithm,
    pub hash: HashAlgorithm,
}

impl CipherSuite {
    pub fn new(
        pattern: HandshakePattern,
        dh: DhAlgorithm,
        cipher: CipherAlgorithm,
        hash: HashAlgorithm,
    ) -> Self {
        Self {
            pattern,
            dh,
            cipher,
            hash,
        }
    }

    /// Parse a full protocol name
    pub fn parse(name: &str) -> Result<Self, CryptoError> {
        let unsupported = || CryptoError::UnsupportedPrimitive {
            component: "protocol name",
            name: name.to_string(),
        };

        if !name.is_ascii() {
            return Err(unsupported());
        }

        let mut parts = name.split('_');
        if parts.next() != Some("Noise") {
            return Err(unsupported());
        }

        let (Some(pattern), Some(dh), Some(cipher), Some(hash), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return Err(unsupported());
        };

        Ok(Self {
            pattern: HandshakePattern::from_name(pattern)?,
            dh: DhAlgorithm::from_name(dh)?,
            cipher: CipherAlgorithm::from_name(cipher)?,
            hash: HashAlgorithm::from_name(hash)?,
        })
    }

    /// Canonical protocol name, hashed into the initial handshake state
    pub fn protocol_name(&self) -> String {
        format!(
            "Noise_{}_{}_{}_{}",
            self.pattern.name(),
            self.dh.name(),
            self.cipher.name(),
            self.hash.name()
        )
    }
}

impl FromStr for CipherSuite {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.protocol_name())
    }
}

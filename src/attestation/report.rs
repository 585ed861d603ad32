//! Attestation report model
//!
//! A report is untrusted input. Its only path to trust is through
//! [`ConstraintExpression::evaluate`](super::ConstraintExpression::evaluate),
//! which hands back the embedded key as a [`TrustedKey`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::crypto::PublicKeyBytes;
use crate::error::{ConfigError, ConstraintError};

/// Security posture of the attested environment, weakest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    /// Debug or simulation build; memory is readable by the host
    #[serde(alias = "debug")]
    Insecure,
    /// Hardware enclave whose platform has pending security updates
    Stale,
    /// Hardware enclave on an up-to-date platform
    Secure,
}

impl SecurityLevel {
    pub fn from_name(name: &str) -> Result<Self, ConstraintError> {
        match name.to_ascii_lowercase().as_str() {
            "insecure" | "debug" => Ok(Self::Insecure),
            "stale" => Ok(Self::Stale),
            "secure" => Ok(Self::Secure),
            _ => Err(ConstraintError::InvalidValue {
                tag: "security-mode",
                value: name.to_string(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Insecure => "insecure",
            Self::Stale => "stale",
            Self::Secure => "secure",
        }
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Structured attestation evidence; 32-byte fields are hex in JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationReport {
    /// Measurement of the loaded code
    #[serde(with = "hex32")]
    pub code_hash: [u8; 32],
    /// Hash of the key that signed the code
    #[serde(with = "hex32")]
    pub signer: [u8; 32],
    pub product_id: u16,
    pub revocation_level: u32,
    pub security: SecurityLevel,
    #[serde(default)]
    pub debug_mode: bool,
    /// Unix seconds at which the evidence was produced
    pub attested_at: u64,
    /// Key to trust for the handshake if the report is accepted
    #[serde(with = "hex32")]
    pub public_key: PublicKeyBytes,
}

impl AttestationReport {
    /// Security level after accounting for the debug flag
    pub fn effective_security(&self) -> SecurityLevel {
        if self.debug_mode {
            SecurityLevel::Insecure
        } else {
            self.security
        }
    }

    /// Parse a report from its JSON form
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError {
            line: e.line(),
            message: e.to_string(),
        })
    }

    pub fn to_json(&self) -> String {
        // Only fixed-size fields and strings; serializing cannot fail
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// Public key taken from a report that passed a constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustedKey(PublicKeyBytes);

impl TrustedKey {
    pub(crate) fn new(key: PublicKeyBytes) -> Self {
        Self(key)
    }

    pub fn as_bytes(&self) -> &PublicKeyBytes {
        &self.0
    }

    pub fn into_bytes(self) -> PublicKeyBytes {
        self.0
    }
}

mod hex32 {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = hex::decode(&text).map_err(de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|b: Vec<u8>| de::Error::invalid_length(b.len(), &"32 bytes"))
    }
}

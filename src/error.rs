//! Error types for enclave-mail

use thiserror::Error;

/// Main error type for enclave-mail
#[derive(Error, Debug)]
pub enum EnclaveMailError {
    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Cryptographic errors
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Handshake and transport errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Envelope encoding errors
    #[error("Mail error: {0}")]
    Mail(#[from] MailError),

    /// Constraint expression errors
    #[error("Constraint error: {0}")]
    Constraint(#[from] ConstraintError),

    /// Attestation report rejected by a constraint
    #[error("Attestation rejected: {0}")]
    Violation(#[from] ConstraintViolation),

    /// Byte stream errors
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    /// System I/O errors
    #[error("System error: {0}")]
    System(#[from] std::io::Error),
}

/// Configuration parsing errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid config format at line {line}: {message}")]
    ParseError { line: usize, message: String },

    #[error("Invalid base64 key: {field}")]
    InvalidKey { field: String },

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Cryptographic operation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Unsupported {component}: {name}")]
    UnsupportedPrimitive { component: &'static str, name: String },

    #[error("Authentication failure")]
    AuthenticationFailure,

    #[error("Nonce exhausted, the cipher state must be rekeyed or discarded")]
    NonceExhausted,

    #[error("Invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("DH computation failed")]
    DiffieHellman,
}

/// Handshake and transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Deliberately coarse: the cause of a rejected handshake message is not surfaced
    #[error("Handshake failure")]
    HandshakeFailure,

    #[error("Handshake is {actual}, operation requires {expected}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Handshake pattern requires {key}")]
    MissingKey { key: &'static str },

    #[error("Replay or gap: expected counter {expected}, got {got}")]
    ReplayOrGap { expected: u64, got: u64 },

    #[error("Message too large: {len} bytes exceeds {max}")]
    MessageTooLarge { len: usize, max: usize },

    #[error("Transport session cannot {direction} on a one-way pattern")]
    OneWay { direction: &'static str },

    #[error("Remote static key does not match the trusted key")]
    RemoteKeyMismatch,

    #[error("Handshake payload refused until the trusted remote key is verified")]
    UnverifiedPayload,

    #[error("Handshake pattern {pattern} never authenticates the remote static key")]
    RemoteStaticUnused { pattern: &'static str },
}

/// Envelope encoding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MailError {
    #[error("Malformed envelope: {reason}")]
    MalformedEnvelope { reason: String },

    #[error("Envelope too large: {field} is {len} bytes, limit is {limit}")]
    EnvelopeTooLarge {
        field: &'static str,
        len: usize,
        limit: usize,
    },

    #[error("Invalid topic: {reason}")]
    InvalidTopic { reason: String },

    #[error("Sequence numbers exhausted on topic {topic}")]
    SequenceExhausted { topic: String },
}

/// Constraint expression parse errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConstraintError {
    #[error("Unknown constraint tag: {tag}")]
    UnknownConstraintTag { tag: String },

    #[error("Conflicting constraint: {tag} given as both {first} and {second}")]
    ConflictingConstraint {
        tag: &'static str,
        first: String,
        second: String,
    },

    #[error("Invalid token: {token}")]
    InvalidToken { token: String },

    #[error("Invalid value for {tag}: {value}")]
    InvalidValue { tag: &'static str, value: String },

    #[error("Incomplete constraint: {reason}")]
    IncompleteConstraint { reason: &'static str },
}

/// A report that fails a constraint clause, with the values that caused it
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("clause {clause} not satisfied: expected {expected}, found {actual}")]
pub struct ConstraintViolation {
    pub clause: String,
    pub expected: String,
    pub actual: String,
}

/// Byte stream errors raised by transport collaborators
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Stream closed")]
    Closed,

    #[error("Send failed: {reason}")]
    SendFailed { reason: String },

    #[error("Receive failed: {reason}")]
    ReceiveFailed { reason: String },

    #[error("Attestation report unavailable: {reason}")]
    AttestationUnavailable { reason: String },
}

impl EnclaveMailError {
    /// Get a user-friendly error message with suggested action
    pub fn user_message(&self) -> String {
        match self {
            Self::Config(ConfigError::FileNotFound { path }) => {
                format!(
                    "Config file not found: {}\n  Check the path and try again.",
                    path
                )
            }

            Self::Config(ConfigError::InvalidKey { field }) => {
                format!(
                    "Invalid {} in config. Expected 32-byte base64-encoded key.",
                    field
                )
            }

            Self::Crypto(CryptoError::UnsupportedPrimitive { component, name }) => {
                format!(
                    "Unsupported {} '{}'.\n  \
                    Expected a name like Noise_XX_25519_ChaChaPoly_BLAKE2s.",
                    component, name
                )
            }

            Self::Protocol(ProtocolError::HandshakeFailure) => {
                "Handshake failed. The peer may hold a different static key than the one trusted."
                    .to_string()
            }

            Self::Violation(violation) => {
                format!(
                    "The enclave does not satisfy the constraint.\n  {}",
                    violation
                )
            }

            _ => format!("{}", self),
        }
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 1,
            Self::Constraint(_) => 2,
            Self::Violation(_) => 3,
            Self::Protocol(_) => 4,
            Self::Crypto(_) => 5,
            Self::Mail(_) => 6,
            Self::Stream(_) => 7,
            Self::System(_) => 8,
        }
    }
}

/// Result type alias for enclave-mail operations
pub type Result<T> = std::result::Result<T, EnclaveMailError>;

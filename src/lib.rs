//! enclave-mail - attested Noise channels for isolated execution environments
//!
//! Confidential, authenticated, replay-protected messaging between a client
//! and an enclave whose identity is first established from attestation
//! evidence.
//!
//! # Features
//!
//! - Noise handshakes (`N K X NN NK NX XN XK XX KN KK KX IN IK IX`) over
//!   X25519, ChaCha20-Poly1305 / AES-256-GCM, SHA-2 / BLAKE2
//! - Transport sessions with strict nonce sequencing and rekey
//! - Versioned mail envelopes with per-topic sequence numbers
//! - Attestation constraint language, secure by default
//!
//! # Usage
//!
//! ```no_run
//! use enclave_mail::{AttestationReport, ChannelOptions, ConstraintExpression, SecureChannel};
//! # use enclave_mail::channel::{AttestationSource, ByteStream};
//! # fn demo<S: ByteStream, A: AttestationSource>(stream: S, source: &mut A) -> enclave_mail::Result<()> {
//! let constraint = ConstraintExpression::parse("code-hash:AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA")?;
//! let options = ChannelOptions::new("Noise_NK_25519_ChaChaPoly_BLAKE2s".parse()?);
//! let mut channel = SecureChannel::connect_attested(stream, options, source, &constraint)?;
//! channel.send(b"hello enclave")?;
//! let reply = channel.receive()?;
//! # Ok(())
//! # }
//! ```

pub mod attestation;
pub mod channel;
pub mod config;
pub mod crypto;
pub mod error;
pub mod protocol;

pub use attestation::{AttestationReport, ConstraintExpression, SecurityLevel, TrustedKey};
pub use channel::{establish_channel, ChannelOptions, MemoryStream, SecureChannel};
pub use config::ChannelConfig;
pub use crypto::KeyPair;
pub use error::{EnclaveMailError, Result};
pub use protocol::{
    open_mail, CipherSuite, HandshakeState, MailCodec, MailEnvelope, MinSizePolicy, OpenedMail,
    PostOffice, Role, TransportSession,
};

//! Noise protocol engine and mail framing
//!
//! This module contains the protocol components:
//! - Handshake pattern table and cipher suites
//! - Handshake state machine
//! - Transport encryption
//! - Mail envelope codec and per-topic sequencing
//! - Sealed, self-contained mail

pub mod handshake;
pub mod mail;
pub mod pattern;
pub mod post_office;
pub mod sealed;
pub mod suite;
pub mod transport;

pub use handshake::{HandshakeBuilder, HandshakeState, HandshakeStatus, Role, MAX_MESSAGE_LEN};
pub use mail::{MailCodec, MailEnvelope, MailHeader};
pub use pattern::{HandshakePattern, Token};
pub use post_office::{validate_topic, PostOffice, SequenceTracker};
pub use sealed::{open_mail, MinSizePolicy, OpenedMail};
pub use suite::CipherSuite;
pub use transport::TransportSession;

//! Secure channel over an external byte stream
//!
//! Every handshake and transport message travels inside a mail envelope on
//! one topic. The receiving transport counter is derived from the envelope
//! sequence number minus the handshake messages already received, so the
//! per-topic sequence check doubles as the transport replay check.
//!
//! The mail version and topic are mixed into the handshake prologue, and the
//! encoded header of each transport envelope is the AEAD associated data, so
//! no header field can be rewritten in flight.

use std::sync::mpsc::{self, Receiver, Sender};

use crate::attestation::{AttestationReport, ConstraintExpression, TrustedKey};
use crate::config::{ChannelConfig, DEFAULT_TOPIC};
use crate::crypto::aead::TAG_LEN;
use crate::crypto::{KeyPair, PublicKeyBytes};
use crate::error::{MailError, ProtocolError, Result, StreamError};
use crate::protocol::{
    CipherSuite, HandshakeState, HandshakeStatus, MailCodec, MailEnvelope, PostOffice, Role,
    SequenceTracker, TransportSession,
};
use crate::protocol::mail::MAIL_VERSION;

/// Bytes in, bytes out; message boundaries are preserved
pub trait ByteStream {
    fn send(&mut self, bytes: &[u8]) -> std::result::Result<(), StreamError>;
    fn receive(&mut self) -> std::result::Result<Vec<u8>, StreamError>;
}

/// Source of the peer's attestation report, queried once per connection
pub trait AttestationSource {
    fn fetch_report(&mut self) -> std::result::Result<AttestationReport, StreamError>;
}

/// Start a handshake, pinning or pre-loading the trusted peer key
pub fn establish_channel(
    suite: CipherSuite,
    role: Role,
    local_static: Option<KeyPair>,
    trusted_remote_key: Option<TrustedKey>,
) -> std::result::Result<HandshakeState, ProtocolError> {
    let mut options = ChannelOptions::new(suite);
    options.local_static = local_static;
    options.trusted_remote_key = trusted_remote_key.map(TrustedKey::into_bytes);
    options.handshake(role)
}

/// Everything needed to open a channel
#[derive(Clone)]
pub struct ChannelOptions {
    pub suite: CipherSuite,
    pub topic: String,
    pub prologue: Vec<u8>,
    pub codec: MailCodec,
    pub local_static: Option<KeyPair>,
    pub trusted_remote_key: Option<PublicKeyBytes>,
}

impl ChannelOptions {
    pub fn new(suite: CipherSuite) -> Self {
        Self {
            suite,
            topic: DEFAULT_TOPIC.to_string(),
            prologue: Vec::new(),
            codec: MailCodec::default(),
            local_static: None,
            trusted_remote_key: None,
        }
    }

    /// Options from a parsed config; `PeerPublicKey` becomes the trusted key
    pub fn from_config(config: &ChannelConfig) -> Self {
        Self {
            suite: config.channel.protocol,
            topic: config.channel.topic.clone(),
            prologue: config.channel.prologue.clone(),
            codec: config.codec(),
            local_static: config.keypair(),
            trusted_remote_key: config
                .attestation
                .as_ref()
                .and_then(|a| a.peer_public_key),
        }
    }

    pub fn with_topic(mut self, topic: &str) -> Self {
        self.topic = topic.to_string();
        self
    }

    pub fn with_prologue(mut self, prologue: &[u8]) -> Self {
        self.prologue = prologue.to_vec();
        self
    }

    pub fn with_local_static(mut self, keypair: KeyPair) -> Self {
        self.local_static = Some(keypair);
        self
    }

    pub fn with_trusted_key(mut self, key: TrustedKey) -> Self {
        self.trusted_remote_key = Some(key.into_bytes());
        self
    }

    /// Prologue both sides must agree on: mail version, topic, then the
    /// configured prologue bytes
    pub fn bound_prologue(&self) -> Vec<u8> {
        let topic = self.topic.as_bytes();
        let mut prologue = Vec::with_capacity(3 + topic.len() + self.prologue.len());
        prologue.push(MAIL_VERSION);
        prologue.extend_from_slice(&(topic.len() as u16).to_be_bytes());
        prologue.extend_from_slice(topic);
        prologue.extend_from_slice(&self.prologue);
        prologue
    }

    fn handshake(&self, role: Role) -> std::result::Result<HandshakeState, ProtocolError> {
        let mut builder =
            HandshakeState::builder(self.suite, role).prologue(&self.bound_prologue());
        if let Some(keypair) = &self.local_static {
            builder = builder.local_static(keypair.clone());
        }
        if let Some(key) = self.trusted_remote_key {
            builder = builder.remote_static(key);
        }
        builder.build()
    }
}

/// An established channel: transport session plus mail sequencing
pub struct SecureChannel<S> {
    stream: S,
    session: TransportSession,
    office: PostOffice,
    tracker: SequenceTracker,
    codec: MailCodec,
    handshake_sent: u64,
    handshake_received: u64,
}

impl<S: ByteStream> SecureChannel<S> {
    /// Run the handshake as initiator
    pub fn connect(stream: S, options: ChannelOptions) -> Result<Self> {
        Self::establish(stream, &options, Role::Initiator)
    }

    /// Run the handshake as responder
    pub fn accept(stream: S, options: ChannelOptions) -> Result<Self> {
        Self::establish(stream, &options, Role::Responder)
    }

    /// Fetch the peer's report, check it, and connect pinned to its key
    ///
    /// The report is fetched exactly once, before the first handshake message.
    pub fn connect_attested<A: AttestationSource>(
        stream: S,
        options: ChannelOptions,
        source: &mut A,
        constraint: &ConstraintExpression,
    ) -> Result<Self> {
        let report = source.fetch_report()?;
        let trusted = constraint.evaluate(&report)?;
        tracing::info!(
            "Peer attestation accepted, pinning key {:02x?}",
            &trusted.as_bytes()[..8]
        );
        Self::connect(stream, options.with_trusted_key(trusted))
    }

    fn establish(mut stream: S, options: &ChannelOptions, role: Role) -> Result<Self> {
        let mut office = PostOffice::with_codec(&options.topic, options.codec)?;
        let mut handshake = options.handshake(role)?;
        let mut tracker = SequenceTracker::new();
        let mut handshake_received = 0u64;

        while !handshake.is_complete() {
            match handshake.status() {
                HandshakeStatus::AwaitingWrite => {
                    let message = handshake.write_message(&[])?;
                    let bytes = office.post(message)?;
                    stream.send(&bytes)?;
                }
                HandshakeStatus::AwaitingRead => {
                    let bytes = stream.receive()?;
                    let envelope = options.codec.decode(&bytes)?;
                    check_topic(office.topic(), &envelope.topic)?;
                    if !envelope.envelope.is_empty() {
                        return Err(MailError::MalformedEnvelope {
                            reason: "envelope field on a handshake message".to_string(),
                        }
                        .into());
                    }
                    tracker.accept(&envelope.topic, envelope.sequence)?;
                    handshake.read_message(&envelope.payload)?;
                    handshake_received += 1;
                }
                status => {
                    return Err(ProtocolError::InvalidState {
                        expected: HandshakeStatus::AwaitingWrite.as_str(),
                        actual: status.as_str(),
                    }
                    .into())
                }
            }
        }

        let handshake_sent = office.next_sequence();
        let session = handshake.into_transport()?;
        tracing::info!(
            "Channel established on topic {} with {} as {:?}",
            office.topic(),
            options.suite,
            role
        );

        Ok(Self {
            stream,
            session,
            office,
            tracker,
            codec: options.codec,
            handshake_sent,
            handshake_received,
        })
    }

    /// Encrypt and send one application message
    pub fn send(&mut self, plaintext: &[u8]) -> Result<()> {
        self.send_with_envelope(plaintext, &[])
    }

    /// Like [`send`](Self::send), with a cleartext envelope field
    ///
    /// The envelope field is readable by anyone on the path but is
    /// authenticated together with the rest of the header.
    pub fn send_with_envelope(&mut self, plaintext: &[u8], envelope: &[u8]) -> Result<()> {
        // Refuse before encrypting so the counter and the sequence stay in step
        let len = plaintext.len() + TAG_LEN;
        if len > self.codec.max_payload_len() {
            return Err(MailError::EnvelopeTooLarge {
                field: "payload",
                len,
                limit: self.codec.max_payload_len(),
            }
            .into());
        }

        let header = self.office.next_header(envelope)?;
        let ciphertext = self.session.encrypt_with_ad(&header, plaintext)?;
        let bytes = self.office.post_with_envelope(ciphertext, envelope.to_vec())?;
        self.stream.send(&bytes)?;
        Ok(())
    }

    /// Receive and decrypt one application message
    pub fn receive(&mut self) -> Result<Vec<u8>> {
        Ok(self.receive_with_envelope()?.0)
    }

    /// Receive one message, returning the plaintext and the envelope field
    pub fn receive_with_envelope(&mut self) -> Result<(Vec<u8>, Vec<u8>)> {
        let bytes = self.stream.receive()?;
        let envelope = self.codec.decode(&bytes)?;
        check_topic(self.office.topic(), &envelope.topic)?;
        self.tracker.check(&envelope.topic, envelope.sequence)?;

        let counter = envelope
            .sequence
            .checked_sub(self.handshake_received)
            .ok_or(ProtocolError::ReplayOrGap {
                expected: self.tracker.expected(&envelope.topic),
                got: envelope.sequence,
            })?;
        let header =
            self.codec
                .encode_header(&envelope.topic, envelope.sequence, &envelope.envelope)?;
        let plaintext =
            self.session
                .decrypt_with_counter_and_ad(counter, &header, &envelope.payload)?;

        self.tracker.accept(&envelope.topic, envelope.sequence)?;
        Ok((plaintext, envelope.envelope))
    }

    /// Transcript hash of the handshake, usable for channel binding
    pub fn handshake_hash(&self) -> &[u8] {
        self.session.handshake_hash()
    }

    /// Static key the peer authenticated with
    pub fn remote_static(&self) -> Option<&PublicKeyBytes> {
        self.session.remote_static()
    }

    pub fn topic(&self) -> &str {
        self.office.topic()
    }

    /// Application messages sent since the handshake
    pub fn messages_sent(&self) -> u64 {
        self.office.next_sequence() - self.handshake_sent
    }

    /// Application messages accepted since the handshake
    pub fn messages_received(&self) -> u64 {
        self.tracker.expected(self.office.topic()) - self.handshake_received
    }

    pub fn session(&self) -> &TransportSession {
        &self.session
    }

    /// Give back the underlying stream, dropping the session keys
    pub fn into_stream(self) -> S {
        self.stream
    }
}

fn check_topic(expected: &str, got: &str) -> std::result::Result<(), MailError> {
    if expected != got {
        return Err(MailError::InvalidTopic {
            reason: format!("expected topic {}, got {}", expected, got),
        });
    }
    Ok(())
}

/// Peek at an envelope without a session, for diagnostics
pub fn inspect_envelope(bytes: &[u8]) -> std::result::Result<MailEnvelope, MailError> {
    let header = MailEnvelope::peek_header(bytes)?;
    let offset = bytes.len() - header.payload_len;
    Ok(MailEnvelope {
        topic: header.topic,
        sequence: header.sequence,
        envelope: header.envelope,
        payload: bytes[offset..].to_vec(),
    })
}

/// In-process byte stream; one half of a connected pair
pub struct MemoryStream {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

impl MemoryStream {
    /// Two connected ends; what one sends the other receives
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel();
        let (b_tx, a_rx) = mpsc::channel();
        (
            Self { tx: a_tx, rx: a_rx },
            Self { tx: b_tx, rx: b_rx },
        )
    }

    /// Take the next message if one is already waiting
    pub fn try_receive(&mut self) -> Option<Vec<u8>> {
        self.rx.try_recv().ok()
    }
}

impl ByteStream for MemoryStream {
    fn send(&mut self, bytes: &[u8]) -> std::result::Result<(), StreamError> {
        self.tx.send(bytes.to_vec()).map_err(|_| StreamError::Closed)
    }

    fn receive(&mut self) -> std::result::Result<Vec<u8>, StreamError> {
        self.rx.recv().map_err(|_| StreamError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::SecurityLevel;
    use crate::error::{CryptoError, EnclaveMailError};
    use std::thread;

    /// Stream wrapper that records and lets tests tamper with outgoing bytes
    struct Tap<F> {
        inner: MemoryStream,
        tamper: F,
    }

    impl<F: FnMut(&mut Vec<u8>)> ByteStream for Tap<F> {
        fn send(&mut self, bytes: &[u8]) -> std::result::Result<(), StreamError> {
            let mut bytes = bytes.to_vec();
            (self.tamper)(&mut bytes);
            self.inner.send(&bytes)
        }

        fn receive(&mut self) -> std::result::Result<Vec<u8>, StreamError> {
            self.inner.receive()
        }
    }

    struct FixedReport {
        report: AttestationReport,
        fetched: usize,
    }

    impl AttestationSource for FixedReport {
        fn fetch_report(&mut self) -> std::result::Result<AttestationReport, StreamError> {
            self.fetched += 1;
            Ok(self.report.clone())
        }
    }

    fn suite(name: &str) -> CipherSuite {
        name.parse().unwrap()
    }

    fn report_for(key: &KeyPair) -> AttestationReport {
        AttestationReport {
            code_hash: [0xaa; 32],
            signer: [0xbb; 32],
            product_id: 1,
            revocation_level: 0,
            security: SecurityLevel::Secure,
            debug_mode: false,
            attested_at: 0,
            public_key: *key.public_key(),
        }
    }

    #[test]
    fn test_xx_ping_pong() {
        let s = suite("Noise_XX_25519_ChaChaPoly_BLAKE2s");
        let (client_stream, server_stream) = MemoryStream::pair();
        let server_options = ChannelOptions::new(s).with_local_static(KeyPair::generate());
        let client_options = ChannelOptions::new(s).with_local_static(KeyPair::generate());

        let server = thread::spawn(move || {
            let mut channel = SecureChannel::accept(server_stream, server_options).unwrap();
            let ping = channel.receive().unwrap();
            channel.send(&[ping, b"-pong".to_vec()].concat()).unwrap();
            channel.handshake_hash().to_vec()
        });

        let mut client = SecureChannel::connect(client_stream, client_options).unwrap();
        client.send(b"ping").unwrap();
        assert_eq!(client.receive().unwrap(), b"ping-pong");
        assert_eq!(server.join().unwrap(), client.handshake_hash());
    }

    #[test]
    fn test_attested_connect_pins_key() {
        let s = suite("Noise_NK_25519_AESGCM_SHA256");
        let enclave_key = KeyPair::generate();
        let mut source = FixedReport {
            report: report_for(&enclave_key),
            fetched: 0,
        };
        let constraint = ConstraintExpression::parse(&format!(
            "code-hash:{} security-mode:secure",
            "AA".repeat(32)
        ))
        .unwrap();

        let (client_stream, server_stream) = MemoryStream::pair();
        let server_options = ChannelOptions::new(s)
            .with_topic("enclave")
            .with_local_static(enclave_key);
        let server = thread::spawn(move || {
            let mut channel = SecureChannel::accept(server_stream, server_options).unwrap();
            channel.receive().unwrap()
        });

        let mut client = SecureChannel::connect_attested(
            client_stream,
            ChannelOptions::new(s).with_topic("enclave"),
            &mut source,
            &constraint,
        )
        .unwrap();
        client.send(b"sealed").unwrap();

        assert_eq!(server.join().unwrap(), b"sealed");
        assert_eq!(source.fetched, 1);
    }

    #[test]
    fn test_attestation_rejection_stops_before_handshake() {
        let s = suite("Noise_NK_25519_AESGCM_SHA256");
        let enclave_key = KeyPair::generate();
        let mut report = report_for(&enclave_key);
        report.debug_mode = true;
        let mut source = FixedReport { report, fetched: 0 };
        let constraint =
            ConstraintExpression::parse(&format!("C:{}", "AA".repeat(32))).unwrap();

        let (client_stream, mut server_stream) = MemoryStream::pair();
        let result = SecureChannel::connect_attested(
            client_stream,
            ChannelOptions::new(s),
            &mut source,
            &constraint,
        );

        assert!(matches!(result, Err(EnclaveMailError::Violation(_))));
        // Nothing reached the wire
        assert!(server_stream.try_receive().is_none());
    }

    #[test]
    fn test_replayed_envelope_rejected() {
        let s = suite("Noise_NN_25519_ChaChaPoly_SHA256");
        let (client_stream, server_stream) = MemoryStream::pair();
        let (replay_tx, replay_rx) = mpsc::channel();
        let tap = Tap {
            inner: client_stream,
            tamper: move |bytes: &mut Vec<u8>| {
                let _ = replay_tx.send(bytes.clone());
            },
        };

        let server = thread::spawn(move || {
            let mut channel = SecureChannel::accept(server_stream, ChannelOptions::new(s)).unwrap();
            let first = channel.receive().unwrap();
            let replay = channel.receive();
            (first, replay)
        });

        let mut client = SecureChannel::connect(tap, ChannelOptions::new(s)).unwrap();
        client.send(b"once").unwrap();

        // Resend the last envelope verbatim
        let mut last = None;
        while let Ok(bytes) = replay_rx.try_recv() {
            last = Some(bytes);
        }
        client.stream.inner.send(&last.unwrap()).unwrap();

        let (first, replay) = server.join().unwrap();
        assert_eq!(first, b"once");
        assert!(matches!(
            replay,
            Err(EnclaveMailError::Protocol(ProtocolError::ReplayOrGap { .. }))
        ));
    }

    #[test]
    fn test_tampered_payload_keeps_channel_in_step() {
        let s = suite("Noise_NN_25519_ChaChaPoly_SHA256");
        let (client_stream, server_stream) = MemoryStream::pair();
        let mut sent = 0;
        let tap = Tap {
            inner: client_stream,
            tamper: move |bytes: &mut Vec<u8>| {
                sent += 1;
                // First transport envelope (after the single initiator handshake message)
                if sent == 2 {
                    let last = bytes.len() - 1;
                    bytes[last] ^= 0x01;
                }
            },
        };

        let server = thread::spawn(move || {
            let mut channel = SecureChannel::accept(server_stream, ChannelOptions::new(s)).unwrap();
            let tampered = channel.receive();
            (tampered, channel.session().receiving_nonce())
        });

        let mut client = SecureChannel::connect(tap, ChannelOptions::new(s)).unwrap();
        client.send(b"fragile").unwrap();

        let (tampered, nonce) = server.join().unwrap();
        assert!(matches!(
            tampered,
            Err(EnclaveMailError::Crypto(CryptoError::AuthenticationFailure))
        ));
        assert_eq!(nonce, Some(0));
    }

    #[test]
    fn test_envelope_field_travels_authenticated() {
        let s = suite("Noise_NN_25519_ChaChaPoly_SHA256");
        let (client_stream, server_stream) = MemoryStream::pair();

        let server = thread::spawn(move || {
            let mut channel = SecureChannel::accept(server_stream, ChannelOptions::new(s)).unwrap();
            channel.receive_with_envelope().unwrap()
        });

        let mut client = SecureChannel::connect(client_stream, ChannelOptions::new(s)).unwrap();
        client.send_with_envelope(b"body", b"route=7").unwrap();

        let (plaintext, envelope) = server.join().unwrap();
        assert_eq!(plaintext, b"body");
        assert_eq!(envelope, b"route=7");
    }

    #[test]
    fn test_rewritten_header_fails_authentication() {
        let s = suite("Noise_NN_25519_ChaChaPoly_SHA256");
        let (client_stream, server_stream) = MemoryStream::pair();
        let codec = MailCodec::default();
        let (original_tx, original_rx) = mpsc::channel();
        let mut sent = 0;
        let tap = Tap {
            inner: client_stream,
            tamper: move |bytes: &mut Vec<u8>| {
                sent += 1;
                // Swap the envelope field of the first transport message
                if sent == 2 {
                    let _ = original_tx.send(bytes.clone());
                    let mail = codec.decode(bytes).unwrap().with_envelope(b"route=8".to_vec());
                    *bytes = codec.encode(&mail).unwrap();
                }
            },
        };

        let server = thread::spawn(move || {
            let mut channel = SecureChannel::accept(server_stream, ChannelOptions::new(s)).unwrap();
            let forged = channel.receive();
            let genuine = channel.receive_with_envelope().unwrap();
            (forged, genuine)
        });

        let mut client = SecureChannel::connect(tap, ChannelOptions::new(s)).unwrap();
        client.send_with_envelope(b"pay 5", b"route=7").unwrap();
        client.stream.inner.send(&original_rx.recv().unwrap()).unwrap();

        let (forged, genuine) = server.join().unwrap();
        assert!(matches!(
            forged,
            Err(EnclaveMailError::Crypto(CryptoError::AuthenticationFailure))
        ));
        assert_eq!(genuine, (b"pay 5".to_vec(), b"route=7".to_vec()));
    }

    #[test]
    fn test_topic_is_bound_into_handshake() {
        let s = suite("Noise_NN_25519_ChaChaPoly_SHA256");
        let client = ChannelOptions::new(s).with_topic("alpha");
        let server = ChannelOptions::new(s).with_topic("beta");
        assert_ne!(client.bound_prologue(), server.bound_prologue());

        let mut initiator = client.handshake(Role::Initiator).unwrap();
        let mut responder = server.handshake(Role::Responder).unwrap();
        let msg1 = initiator.write_message(&[]).unwrap();
        responder.read_message(&msg1).unwrap();
        let msg2 = responder.write_message(&[]).unwrap();
        assert!(matches!(
            initiator.read_message(&msg2),
            Err(EnclaveMailError::Protocol(ProtocolError::HandshakeFailure))
        ));
    }

    #[test]
    fn test_envelope_field_on_handshake_message_rejected() {
        let s = suite("Noise_NN_25519_ChaChaPoly_SHA256");
        let (client_stream, server_stream) = MemoryStream::pair();
        let codec = MailCodec::default();
        let tap = Tap {
            inner: client_stream,
            tamper: move |bytes: &mut Vec<u8>| {
                let mail = codec.decode(bytes).unwrap().with_envelope(b"x".to_vec());
                *bytes = codec.encode(&mail).unwrap();
            },
        };

        let server = thread::spawn(move || {
            SecureChannel::accept(server_stream, ChannelOptions::new(s)).err()
        });

        let client = thread::spawn(move || SecureChannel::connect(tap, ChannelOptions::new(s)).is_ok());

        assert!(matches!(
            server.join().unwrap(),
            Some(EnclaveMailError::Mail(MailError::MalformedEnvelope { .. }))
        ));
        // The server hung up, so the client never completes
        assert!(!client.join().unwrap());
    }

    #[test]
    fn test_oversized_send_rejected_without_consuming_counter() {
        let s = suite("Noise_NN_25519_ChaChaPoly_SHA256");
        let (client_stream, server_stream) = MemoryStream::pair();
        let mut options = ChannelOptions::new(s);
        options.codec = MailCodec::new(255, 64);
        let server_options = options.clone();

        let server = thread::spawn(move || {
            let mut channel = SecureChannel::accept(server_stream, server_options).unwrap();
            channel.receive().unwrap()
        });

        let mut client = SecureChannel::connect(client_stream, options).unwrap();
        assert!(matches!(
            client.send(&[0u8; 49]),
            Err(EnclaveMailError::Mail(MailError::EnvelopeTooLarge { .. }))
        ));
        client.send(&[7u8; 48]).unwrap();
        assert_eq!(server.join().unwrap(), vec![7u8; 48]);
    }

    #[test]
    fn test_one_way_channel() {
        let s = suite("Noise_N_25519_ChaChaPoly_SHA256");
        let recipient = KeyPair::generate();
        let trusted = TrustedKey::new(*recipient.public_key());
        let (client_stream, server_stream) = MemoryStream::pair();

        let server = thread::spawn(move || {
            let options = ChannelOptions::new(s).with_local_static(recipient);
            let mut channel = SecureChannel::accept(server_stream, options).unwrap();
            let message = channel.receive().unwrap();
            (message, channel.send(b"reply").is_err())
        });

        let mut client =
            SecureChannel::connect(client_stream, ChannelOptions::new(s).with_trusted_key(trusted))
                .unwrap();
        client.send(b"drop box").unwrap();
        assert!(client.session().receiving_nonce().is_none());

        let (message, reply_refused) = server.join().unwrap();
        assert_eq!(message, b"drop box");
        assert!(reply_refused);
    }

    #[test]
    fn test_establish_channel_validates_keys() {
        let s = suite("Noise_NK_25519_ChaChaPoly_SHA256");
        assert!(matches!(
            establish_channel(s, Role::Initiator, None, None),
            Err(ProtocolError::MissingKey { .. })
        ));

        let server = KeyPair::generate();
        let trusted = TrustedKey::new(*server.public_key());
        let state = establish_channel(s, Role::Initiator, None, Some(trusted)).unwrap();
        assert_eq!(state.remote_static(), Some(server.public_key()));
    }

    #[test]
    fn test_inspect_envelope() {
        let mut office = PostOffice::new("diag").unwrap();
        let bytes = office.post(b"opaque".to_vec()).unwrap();
        let envelope = inspect_envelope(&bytes).unwrap();
        assert_eq!(envelope.topic, "diag");
        assert_eq!(envelope.payload, b"opaque");
        assert_eq!(envelope.version(), MAIL_VERSION);

        let bytes = office
            .post_with_envelope(b"opaque".to_vec(), b"meta".to_vec())
            .unwrap();
        let envelope = inspect_envelope(&bytes).unwrap();
        assert_eq!(envelope.envelope, b"meta");
        assert_eq!(envelope.sequence, 1);
    }
}

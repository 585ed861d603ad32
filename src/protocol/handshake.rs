//! Noise handshake state machine
//!
//! Drives a handshake pattern token by token. Writes and reads alternate
//! strictly per role; a rejected message kills the handshake for good.

use crate::crypto::aead::TAG_LEN;
use crate::crypto::{KeyPair, PublicKeyBytes, SymmetricState};
use crate::error::{CryptoError, EnclaveMailError, ProtocolError};
use crate::protocol::pattern::Token;
use crate::protocol::suite::CipherSuite;
use crate::protocol::transport::TransportSession;

/// Maximum length of any Noise message
pub const MAX_MESSAGE_LEN: usize = 65535;

/// Which side of the handshake we are
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// Where the handshake currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    AwaitingWrite,
    AwaitingRead,
    Complete,
    Failed,
}

impl HandshakeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingWrite => "awaiting write",
            Self::AwaitingRead => "awaiting read",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

/// Builder for a [`HandshakeState`]
pub struct HandshakeBuilder {
    suite: CipherSuite,
    role: Role,
    local_static: Option<KeyPair>,
    remote_static: Option<PublicKeyBytes>,
    local_ephemeral: Option<KeyPair>,
    prologue: Vec<u8>,
}

impl HandshakeBuilder {
    /// Our static key pair
    pub fn local_static(mut self, keypair: KeyPair) -> Self {
        self.local_static = Some(keypair);
        self
    }

    /// The peer's static key: pre-known for `K`/`N`-style patterns, pinned otherwise
    pub fn remote_static(mut self, public_key: PublicKeyBytes) -> Self {
        self.remote_static = Some(public_key);
        self
    }

    /// Use a fixed ephemeral key instead of a random one (test vectors only)
    pub fn local_ephemeral(mut self, keypair: KeyPair) -> Self {
        self.local_ephemeral = Some(keypair);
        self
    }

    /// Bytes both sides bind into the transcript before the first message
    pub fn prologue(mut self, prologue: &[u8]) -> Self {
        self.prologue = prologue.to_vec();
        self
    }

    pub fn build(self) -> Result<HandshakeState, ProtocolError> {
        let pattern = self.suite.pattern;
        let spec = pattern.spec();

        let (local_needs_static, remote_needs_static, local_pre, remote_pre) = match self.role {
            Role::Initiator => (
                pattern.initiator_needs_static(),
                pattern.responder_needs_static(),
                spec.initiator_pre,
                spec.responder_pre,
            ),
            Role::Responder => (
                pattern.responder_needs_static(),
                pattern.initiator_needs_static(),
                spec.responder_pre,
                spec.initiator_pre,
            ),
        };

        if local_needs_static && self.local_static.is_none() {
            return Err(ProtocolError::MissingKey {
                key: "local static key",
            });
        }

        let remote_pre_known = remote_pre.contains(&Token::S);
        if remote_pre_known && self.remote_static.is_none() {
            return Err(ProtocolError::MissingKey {
                key: "remote static key",
            });
        }
        if self.remote_static.is_some() && !remote_needs_static {
            return Err(ProtocolError::RemoteStaticUnused {
                pattern: pattern.name(),
            });
        }

        let (rs, pinned_remote) = if remote_pre_known {
            (self.remote_static, None)
        } else {
            (None, self.remote_static)
        };

        let mut symmetric =
            SymmetricState::initialize(&self.suite.protocol_name(), self.suite.cipher, self.suite.hash);
        symmetric.mix_hash(&self.prologue);

        // Pre-messages: initiator's keys first, then the responder's
        let (initiator_pre, responder_pre) = match self.role {
            Role::Initiator => (local_pre, remote_pre),
            Role::Responder => (remote_pre, local_pre),
        };
        for (tokens, is_local) in [
            (initiator_pre, self.role == Role::Initiator),
            (responder_pre, self.role == Role::Responder),
        ] {
            if tokens.contains(&Token::S) {
                let key = if is_local {
                    self.local_static.as_ref().map(|s| *s.public_key())
                } else {
                    rs
                };
                if let Some(key) = key {
                    symmetric.mix_hash(&key);
                }
            }
        }

        let status = match self.role {
            Role::Initiator => HandshakeStatus::AwaitingWrite,
            Role::Responder => HandshakeStatus::AwaitingRead,
        };

        tracing::debug!(
            "Handshake {} as {:?}, prologue {} bytes",
            self.suite,
            self.role,
            self.prologue.len()
        );

        Ok(HandshakeState {
            suite: self.suite,
            role: self.role,
            symmetric,
            s: self.local_static,
            e: self.local_ephemeral,
            rs,
            re: None,
            pinned_remote,
            cursor: 0,
            status,
        })
    }
}

/// An in-progress handshake
pub struct HandshakeState {
    suite: CipherSuite,
    role: Role,
    symmetric: SymmetricState,
    s: Option<KeyPair>,
    e: Option<KeyPair>,
    rs: Option<PublicKeyBytes>,
    re: Option<PublicKeyBytes>,
    /// Static key the peer must present when it transmits one
    pinned_remote: Option<PublicKeyBytes>,
    cursor: usize,
    status: HandshakeStatus,
}

impl HandshakeState {
    pub fn builder(suite: CipherSuite, role: Role) -> HandshakeBuilder {
        HandshakeBuilder {
            suite,
            role,
            local_static: None,
            remote_static: None,
            local_ephemeral: None,
            prologue: Vec::new(),
        }
    }

    pub fn status(&self) -> HandshakeStatus {
        self.status
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn suite(&self) -> &CipherSuite {
        &self.suite
    }

    pub fn is_complete(&self) -> bool {
        self.status == HandshakeStatus::Complete
    }

    /// Peer static key, once known
    pub fn remote_static(&self) -> Option<&PublicKeyBytes> {
        self.rs.as_ref()
    }

    /// Transcript hash so far
    pub fn handshake_hash(&self) -> &[u8] {
        self.symmetric.handshake_hash()
    }

    /// Write the next handshake message carrying `payload`
    ///
    /// With a pinned remote key, a non-empty payload is refused until the
    /// peer's static key has been received and matched. The handshake stays
    /// usable and the message can be written again with an empty payload.
    pub fn write_message(&mut self, payload: &[u8]) -> Result<Vec<u8>, EnclaveMailError> {
        self.expect_status(HandshakeStatus::AwaitingWrite)?;
        if !payload.is_empty() && self.awaiting_pinned_key() {
            tracing::warn!(
                "Refused {} byte payload before the remote key is verified",
                payload.len()
            );
            return Err(ProtocolError::UnverifiedPayload.into());
        }

        match self.write_tokens(payload) {
            Ok(message) => {
                tracing::debug!(
                    "Wrote handshake message {} ({} bytes)",
                    self.cursor,
                    message.len()
                );
                self.advance();
                Ok(message)
            }
            Err(e) => {
                self.abort();
                Err(e)
            }
        }
    }

    /// Read the next handshake message and return its payload
    pub fn read_message(&mut self, message: &[u8]) -> Result<Vec<u8>, EnclaveMailError> {
        self.expect_status(HandshakeStatus::AwaitingRead)?;

        match self.read_tokens(message) {
            Ok(payload) => {
                tracing::debug!(
                    "Read handshake message {} ({} bytes)",
                    self.cursor,
                    message.len()
                );
                self.advance();
                Ok(payload)
            }
            Err(_) => {
                tracing::warn!("Rejected handshake message {}", self.cursor);
                self.abort();
                Err(ProtocolError::HandshakeFailure.into())
            }
        }
    }

    /// Split a completed handshake into its transport session
    pub fn into_transport(self) -> Result<TransportSession, ProtocolError> {
        if self.status != HandshakeStatus::Complete {
            return Err(ProtocolError::InvalidState {
                expected: HandshakeStatus::Complete.as_str(),
                actual: self.status.as_str(),
            });
        }

        let handshake_hash = self.symmetric.handshake_hash().to_vec();
        let one_way = self.suite.pattern.is_one_way();
        let (c1, c2) = self.symmetric.split();

        let (send, recv) = match self.role {
            Role::Initiator => (Some(c1), (!one_way).then_some(c2)),
            Role::Responder => ((!one_way).then_some(c2), Some(c1)),
        };

        Ok(TransportSession::new(send, recv, handshake_hash, self.rs))
    }

    /// A pinned key is set but the peer has not presented its static key yet
    fn awaiting_pinned_key(&self) -> bool {
        self.pinned_remote.is_some() && self.rs.is_none()
    }

    fn expect_status(&self, expected: HandshakeStatus) -> Result<(), ProtocolError> {
        if self.status != expected {
            return Err(ProtocolError::InvalidState {
                expected: expected.as_str(),
                actual: self.status.as_str(),
            });
        }
        Ok(())
    }

    fn current_tokens(&self) -> &'static [Token] {
        self.suite.pattern.spec().messages[self.cursor]
    }

    fn advance(&mut self) {
        self.cursor += 1;
        self.status = if self.cursor == self.suite.pattern.spec().messages.len() {
            HandshakeStatus::Complete
        } else if self.status == HandshakeStatus::AwaitingWrite {
            HandshakeStatus::AwaitingRead
        } else {
            HandshakeStatus::AwaitingWrite
        };
    }

    /// Fail closed: drop every key and refuse further use
    fn abort(&mut self) {
        self.status = HandshakeStatus::Failed;
        self.e = None;
        self.s = None;
        self.re = None;
        self.symmetric.wipe();
    }

    fn write_tokens(&mut self, payload: &[u8]) -> Result<Vec<u8>, EnclaveMailError> {
        let mut message = Vec::new();

        for &token in self.current_tokens() {
            match token {
                Token::E => {
                    let ephemeral = match self.e.take() {
                        Some(fixed) => fixed,
                        None => self.suite.dh.generate_keypair(),
                    };
                    let public = *ephemeral.public_key();
                    tracing::debug!("Ephemeral public: {:02x?}", &public[..8]);
                    message.extend_from_slice(&public);
                    self.symmetric.mix_hash(&public);
                    self.e = Some(ephemeral);
                }
                Token::S => {
                    let public = *self
                        .s
                        .as_ref()
                        .ok_or(ProtocolError::MissingKey {
                            key: "local static key",
                        })?
                        .public_key();
                    let encrypted = self.symmetric.encrypt_and_hash(&public)?;
                    message.extend_from_slice(&encrypted);
                }
                dh_token => self.mix_dh(dh_token)?,
            }
        }

        let encrypted = self.symmetric.encrypt_and_hash(payload)?;
        message.extend_from_slice(&encrypted);

        if message.len() > MAX_MESSAGE_LEN {
            return Err(ProtocolError::MessageTooLarge {
                len: message.len(),
                max: MAX_MESSAGE_LEN,
            }
            .into());
        }
        Ok(message)
    }

    fn read_tokens(&mut self, message: &[u8]) -> Result<Vec<u8>, EnclaveMailError> {
        if message.len() > MAX_MESSAGE_LEN {
            return Err(ProtocolError::HandshakeFailure.into());
        }

        let dh_len = self.suite.dh.dh_len();
        let mut rest = message;

        for &token in self.current_tokens() {
            match token {
                Token::E => {
                    let (public, tail) = take(rest, dh_len)?;
                    let public = to_public_key(public)?;
                    self.symmetric.mix_hash(&public);
                    self.re = Some(public);
                    rest = tail;
                }
                Token::S => {
                    let len = if self.symmetric.has_key() {
                        dh_len + TAG_LEN
                    } else {
                        dh_len
                    };
                    let (encrypted, tail) = take(rest, len)?;
                    let public = to_public_key(&self.symmetric.decrypt_and_hash(encrypted)?)?;
                    if let Some(pinned) = &self.pinned_remote {
                        if *pinned != public {
                            return Err(ProtocolError::RemoteKeyMismatch.into());
                        }
                    }
                    tracing::debug!("Remote static public: {:02x?}", &public[..8]);
                    self.rs = Some(public);
                    rest = tail;
                }
                dh_token => self.mix_dh(dh_token)?,
            }
        }

        Ok(self.symmetric.decrypt_and_hash(rest)?)
    }

    /// Perform the DH named by `token` from our side and mix the result
    fn mix_dh(&mut self, token: Token) -> Result<(), EnclaveMailError> {
        let initiator = self.role == Role::Initiator;
        let (local, remote) = match token {
            Token::Ee => (&self.e, &self.re),
            Token::Es if initiator => (&self.e, &self.rs),
            Token::Es => (&self.s, &self.re),
            Token::Se if initiator => (&self.s, &self.re),
            Token::Se => (&self.e, &self.rs),
            Token::Ss => (&self.s, &self.rs),
            Token::E | Token::S => unreachable!("key tokens are handled by the caller"),
        };

        let local = local.as_ref().ok_or(ProtocolError::MissingKey {
            key: "local key for DH",
        })?;
        let remote = remote.as_ref().ok_or(ProtocolError::MissingKey {
            key: "remote key for DH",
        })?;

        let shared = self.suite.dh.dh(local, remote)?;
        self.symmetric.mix_key(&shared[..]);
        Ok(())
    }
}

fn take(bytes: &[u8], len: usize) -> Result<(&[u8], &[u8]), ProtocolError> {
    if bytes.len() < len {
        return Err(ProtocolError::HandshakeFailure);
    }
    Ok(bytes.split_at(len))
}

fn to_public_key(bytes: &[u8]) -> Result<PublicKeyBytes, CryptoError> {
    bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
        expected: crate::crypto::dh::KEY_LEN,
        got: bytes.len(),
    })
}

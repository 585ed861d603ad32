//! Transport phase encryption
//!
//! A completed handshake splits into one cipher state per direction. Each
//! message is sealed under the current counter, which then advances; counters
//! never reset and the reserved value `u64::MAX` is never used.

use crate::crypto::aead::TAG_LEN;
use crate::crypto::{CipherState, PublicKeyBytes};
use crate::error::{CryptoError, EnclaveMailError, ProtocolError};
use crate::protocol::handshake::MAX_MESSAGE_LEN;

/// Size of the explicit counter prefix on framed messages
pub const COUNTER_LEN: usize = 8;

/// Largest plaintext that fits in one transport message
pub const MAX_PLAINTEXT_LEN: usize = MAX_MESSAGE_LEN - TAG_LEN;

/// The (send, receive) cipher pair produced by one handshake
pub struct TransportSession {
    send: Option<CipherState>,
    recv: Option<CipherState>,
    handshake_hash: Vec<u8>,
    remote_static: Option<PublicKeyBytes>,
}

impl TransportSession {
    /// Bind cipher states to a session; `None` marks a one-way direction
    pub fn new(
        send: Option<CipherState>,
        recv: Option<CipherState>,
        handshake_hash: Vec<u8>,
        remote_static: Option<PublicKeyBytes>,
    ) -> Self {
        Self {
            send,
            recv,
            handshake_hash,
            remote_static,
        }
    }

    /// Transcript hash of the handshake, usable for channel binding
    pub fn handshake_hash(&self) -> &[u8] {
        &self.handshake_hash
    }

    /// Static key the peer authenticated with, if the pattern had one
    pub fn remote_static(&self) -> Option<&PublicKeyBytes> {
        self.remote_static.as_ref()
    }

    pub fn can_send(&self) -> bool {
        self.send.is_some()
    }

    pub fn can_receive(&self) -> bool {
        self.recv.is_some()
    }

    /// Counter the next outgoing message will use
    pub fn sending_nonce(&self) -> Option<u64> {
        self.send.as_ref().map(CipherState::nonce)
    }

    /// Counter the next incoming message must carry
    pub fn receiving_nonce(&self) -> Option<u64> {
        self.recv.as_ref().map(CipherState::nonce)
    }

    /// Encrypt under the current sending counter, then advance it
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, EnclaveMailError> {
        self.encrypt_with_ad(&[], plaintext)
    }

    /// Encrypt, authenticating `ad` alongside the plaintext
    pub fn encrypt_with_ad(
        &mut self,
        ad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, EnclaveMailError> {
        if plaintext.len() > MAX_PLAINTEXT_LEN {
            return Err(ProtocolError::MessageTooLarge {
                len: plaintext.len(),
                max: MAX_PLAINTEXT_LEN,
            }
            .into());
        }

        let cipher = self.sender()?;
        Ok(cipher.encrypt_with_ad(ad, plaintext)?)
    }

    /// Decrypt under the channel's own receiving counter
    ///
    /// A failed decryption leaves the counter where it was.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, EnclaveMailError> {
        self.decrypt_with_ad(&[], ciphertext)
    }

    /// Decrypt a message sealed with [`encrypt_with_ad`](Self::encrypt_with_ad)
    pub fn decrypt_with_ad(
        &mut self,
        ad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, EnclaveMailError> {
        if ciphertext.len() > MAX_MESSAGE_LEN {
            return Err(ProtocolError::MessageTooLarge {
                len: ciphertext.len(),
                max: MAX_MESSAGE_LEN,
            }
            .into());
        }

        let cipher = self.receiver()?;
        Ok(cipher.decrypt_with_ad(ad, ciphertext)?)
    }

    /// Decrypt a message whose counter was carried out of band
    ///
    /// Anything but the next expected counter is a replay or a gap and is
    /// rejected before any decryption is attempted.
    pub fn decrypt_with_counter(
        &mut self,
        counter: u64,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, EnclaveMailError> {
        self.decrypt_with_counter_and_ad(counter, &[], ciphertext)
    }

    pub fn decrypt_with_counter_and_ad(
        &mut self,
        counter: u64,
        ad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, EnclaveMailError> {
        let expected = self.receiver()?.nonce();
        if counter != expected {
            tracing::warn!("Transport counter {} rejected, expected {}", counter, expected);
            return Err(ProtocolError::ReplayOrGap {
                expected,
                got: counter,
            }
            .into());
        }
        self.decrypt_with_ad(ad, ciphertext)
    }

    /// Encrypt and prefix the 8-byte big-endian counter
    pub fn encrypt_framed(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, EnclaveMailError> {
        let counter = self.sender()?.nonce();
        let ciphertext = self.encrypt(plaintext)?;

        let mut frame = Vec::with_capacity(COUNTER_LEN + ciphertext.len());
        frame.extend_from_slice(&counter.to_be_bytes());
        frame.extend_from_slice(&ciphertext);
        Ok(frame)
    }

    /// Decrypt a frame produced by [`encrypt_framed`](Self::encrypt_framed)
    pub fn decrypt_framed(&mut self, frame: &[u8]) -> Result<Vec<u8>, EnclaveMailError> {
        if frame.len() < COUNTER_LEN + TAG_LEN {
            return Err(CryptoError::AuthenticationFailure.into());
        }

        let (prefix, ciphertext) = frame.split_at(COUNTER_LEN);
        let mut counter = [0u8; COUNTER_LEN];
        counter.copy_from_slice(prefix);
        self.decrypt_with_counter(u64::from_be_bytes(counter), ciphertext)
    }

    /// Noise REKEY on the sending key; the peer must call `rekey_incoming` in step
    pub fn rekey_outgoing(&mut self) -> Result<(), EnclaveMailError> {
        self.sender()?.rekey()?;
        tracing::debug!("Sending key rotated");
        Ok(())
    }

    /// Noise REKEY on the receiving key
    pub fn rekey_incoming(&mut self) -> Result<(), EnclaveMailError> {
        self.receiver()?.rekey()?;
        tracing::debug!("Receiving key rotated");
        Ok(())
    }

    fn sender(&mut self) -> Result<&mut CipherState, ProtocolError> {
        self.send
            .as_mut()
            .ok_or(ProtocolError::OneWay { direction: "send" })
    }

    fn receiver(&mut self) -> Result<&mut CipherState, ProtocolError> {
        self.recv
            .as_mut()
            .ok_or(ProtocolError::OneWay { direction: "receive" })
    }
}

impl std::fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSession")
            .field("send", &self.send)
            .field("recv", &self.recv)
            .finish_non_exhaustive()
    }
}

//! Self-contained encrypted mail
//!
//! A sealed mail needs no live session: the sender runs the one-way `X`
//! handshake against the recipient's static key and streams the body as
//! transport packets behind it. The encoded envelope header is the
//! handshake prologue, so the topic, sequence number and envelope field
//! stay readable but any change to them breaks decryption.
//!
//! ```text
//! payload: [2 BE len][handshake message] ([2 BE len][packet])* [2 BE len][terminator]
//! packet plaintext: [body bytes][zero padding][2 BE body byte count]
//! ```
//!
//! The terminator is a packet with neither body nor padding. A mail that
//! ends without one has been truncated.

use crate::crypto::{KeyPair, PublicKeyBytes};
use crate::error::{EnclaveMailError, MailError, ProtocolError};
use crate::protocol::handshake::{HandshakeState, Role};
use crate::protocol::mail::MailCodec;
use crate::protocol::suite::CipherSuite;
use crate::protocol::transport::{TransportSession, MAX_PLAINTEXT_LEN};

/// Protocol every sealed mail is encrypted with
pub const SEALED_MAIL_PROTOCOL: &str = "Noise_X_25519_AESGCM_SHA256";

const CHUNK_LEN_LEN: usize = 2;
const BODY_COUNT_LEN: usize = 2;

/// Body plus padding bytes that fit in one packet
pub const MAX_PACKET_BODY_LEN: usize = MAX_PLAINTEXT_LEN - BODY_COUNT_LEN;

/// How far a mail body is padded to hide its real size
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MinSizePolicy {
    /// No padding
    #[default]
    None,
    /// Pad every body to at least this many bytes
    Fixed(usize),
    /// Pad to the largest body sent so far
    LargestSeen { seen: usize },
    /// Pad to the running average of body sizes
    MovingAverage { sum: u64, count: u64 },
}

impl MinSizePolicy {
    pub fn fixed(min_size: usize) -> Self {
        Self::Fixed(min_size)
    }

    pub fn largest_seen() -> Self {
        Self::LargestSeen { seen: 0 }
    }

    pub fn moving_average() -> Self {
        Self::MovingAverage { sum: 0, count: 0 }
    }

    /// Minimum padded size for a body of `body_len` bytes; updates the history
    pub fn min_size(&mut self, body_len: usize) -> usize {
        match self {
            Self::None => 0,
            Self::Fixed(min_size) => *min_size,
            Self::LargestSeen { seen } => {
                *seen = (*seen).max(body_len);
                *seen
            }
            Self::MovingAverage { sum, count } => {
                let body_len = body_len as u64;
                *sum = match sum.checked_add(body_len) {
                    Some(total) => total,
                    None => {
                        // Restart from the current average
                        let average = *sum / (*count).max(1);
                        *count = 1;
                        average + body_len
                    }
                };
                *count += 1;
                (*sum / *count) as usize
            }
        }
    }
}

/// A sealed mail after decryption
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedMail {
    pub topic: String,
    pub sequence: u64,
    pub envelope: Vec<u8>,
    /// Static key the sender proved possession of
    pub sender: PublicKeyBytes,
    pub body: Vec<u8>,
}

fn sealed_suite() -> Result<CipherSuite, EnclaveMailError> {
    Ok(SEALED_MAIL_PROTOCOL.parse()?)
}

/// Encrypt `body` to `destination` with `header` as the prologue
///
/// The body is padded with zeros until body plus padding reach `min_size`.
pub(crate) fn seal_payload(
    header: &[u8],
    destination: &PublicKeyBytes,
    sender: &KeyPair,
    body: &[u8],
    min_size: usize,
) -> Result<Vec<u8>, EnclaveMailError> {
    let mut handshake = HandshakeState::builder(sealed_suite()?, Role::Initiator)
        .local_static(sender.clone())
        .remote_static(*destination)
        .prologue(header)
        .build()?;

    let mut out = Vec::with_capacity(body.len().max(min_size) + 128);
    push_chunk(&mut out, &handshake.write_message(&[])?);
    let mut session = handshake.into_transport()?;

    let mut written = 0usize;
    for chunk in body.chunks(MAX_PACKET_BODY_LEN) {
        let padding = min_size
            .saturating_sub(written + chunk.len())
            .min(MAX_PACKET_BODY_LEN - chunk.len());
        write_packet(&mut out, &mut session, chunk, padding)?;
        written += chunk.len() + padding;
    }
    while written < min_size {
        let padding = (min_size - written).min(MAX_PACKET_BODY_LEN);
        write_packet(&mut out, &mut session, &[], padding)?;
        written += padding;
    }
    write_packet(&mut out, &mut session, &[], 0)?;

    Ok(out)
}

fn write_packet(
    out: &mut Vec<u8>,
    session: &mut TransportSession,
    body: &[u8],
    padding: usize,
) -> Result<(), EnclaveMailError> {
    let mut plaintext = Vec::with_capacity(body.len() + padding + BODY_COUNT_LEN);
    plaintext.extend_from_slice(body);
    plaintext.resize(body.len() + padding, 0);
    plaintext.extend_from_slice(&(body.len() as u16).to_be_bytes());

    let ciphertext = session.encrypt(&plaintext)?;
    push_chunk(out, &ciphertext);
    Ok(())
}

fn push_chunk(out: &mut Vec<u8>, chunk: &[u8]) {
    out.extend_from_slice(&(chunk.len() as u16).to_be_bytes());
    out.extend_from_slice(chunk);
}

fn next_chunk<'a>(rest: &mut &'a [u8]) -> Result<&'a [u8], MailError> {
    let truncated = || MailError::MalformedEnvelope {
        reason: "sealed mail truncated".to_string(),
    };

    if rest.len() < CHUNK_LEN_LEN {
        return Err(truncated());
    }
    let len = u16::from_be_bytes([rest[0], rest[1]]) as usize;
    let tail = &rest[CHUNK_LEN_LEN..];
    if tail.len() < len {
        return Err(truncated());
    }
    let (chunk, tail) = tail.split_at(len);
    *rest = tail;
    Ok(chunk)
}

/// Decode and decrypt a sealed mail addressed to `recipient`
///
/// Any change to the header fails the handshake; any change to a packet
/// fails authentication. Sequence checking is left to the caller.
pub fn open_mail(
    codec: &MailCodec,
    recipient: &KeyPair,
    bytes: &[u8],
) -> Result<OpenedMail, EnclaveMailError> {
    let mail = codec.decode(bytes)?;
    let header = codec.encode_header(&mail.topic, mail.sequence, &mail.envelope)?;

    let mut handshake = HandshakeState::builder(sealed_suite()?, Role::Responder)
        .local_static(recipient.clone())
        .prologue(&header)
        .build()?;

    let mut rest = mail.payload.as_slice();
    handshake.read_message(next_chunk(&mut rest)?)?;
    let mut session = handshake.into_transport()?;
    let sender = *session
        .remote_static()
        .ok_or(ProtocolError::HandshakeFailure)?;

    let mut body = Vec::new();
    loop {
        let plaintext = session.decrypt(next_chunk(&mut rest)?)?;
        if plaintext.len() < BODY_COUNT_LEN {
            return Err(malformed("packet shorter than its body count"));
        }
        let payload_len = plaintext.len() - BODY_COUNT_LEN;
        let count =
            u16::from_be_bytes([plaintext[payload_len], plaintext[payload_len + 1]]) as usize;
        if count > payload_len {
            return Err(malformed("packet body count exceeds packet"));
        }
        if payload_len == 0 {
            break;
        }
        body.extend_from_slice(&plaintext[..count]);
    }

    if !rest.is_empty() {
        return Err(malformed("data after terminator packet"));
    }

    tracing::debug!(
        "Opened mail {} on topic {} from {:02x?}",
        mail.sequence,
        mail.topic,
        &sender[..8]
    );

    Ok(OpenedMail {
        topic: mail.topic,
        sequence: mail.sequence,
        envelope: mail.envelope,
        sender,
        body,
    })
}

fn malformed(reason: &str) -> EnclaveMailError {
    MailError::MalformedEnvelope {
        reason: reason.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CryptoError;
    use crate::protocol::mail::MailEnvelope;

    fn seal(body: &[u8], min_size: usize, recipient: &KeyPair, sender: &KeyPair) -> Vec<u8> {
        let codec = MailCodec::new(255, 1 << 20);
        let header = codec.encode_header("inbox", 0, b"").unwrap();
        let payload =
            seal_payload(&header, recipient.public_key(), sender, body, min_size).unwrap();
        codec.encode(&MailEnvelope::new("inbox", 0, payload)).unwrap()
    }

    #[test]
    fn test_min_size_policies() {
        let mut none = MinSizePolicy::default();
        assert_eq!(none.min_size(100), 0);

        let mut fixed = MinSizePolicy::fixed(64);
        assert_eq!(fixed.min_size(10), 64);
        assert_eq!(fixed.min_size(1000), 64);

        let mut largest = MinSizePolicy::largest_seen();
        assert_eq!(largest.min_size(10), 10);
        assert_eq!(largest.min_size(50), 50);
        assert_eq!(largest.min_size(20), 50);

        let mut average = MinSizePolicy::moving_average();
        assert_eq!(average.min_size(10), 10);
        assert_eq!(average.min_size(30), 20);
        assert_eq!(average.min_size(20), 20);
    }

    #[test]
    fn test_moving_average_survives_overflow() {
        let mut average = MinSizePolicy::MovingAverage {
            sum: u64::MAX - 1,
            count: 2,
        };
        let expected = ((u64::MAX - 1) / 2 + 10) / 2;
        assert_eq!(average.min_size(10), expected as usize);
    }

    #[test]
    fn test_padding_hides_body_size() {
        let recipient = KeyPair::generate();
        let sender = KeyPair::generate();

        let short = seal(b"hi", 1000, &recipient, &sender);
        let long = seal(&[7u8; 900], 1000, &recipient, &sender);
        assert_eq!(short.len(), long.len());

        let codec = MailCodec::new(255, 1 << 20);
        assert_eq!(open_mail(&codec, &recipient, &short).unwrap().body, b"hi");
        assert_eq!(open_mail(&codec, &recipient, &long).unwrap().body, vec![7u8; 900]);
    }

    #[test]
    fn test_multi_packet_body() {
        let recipient = KeyPair::generate();
        let sender = KeyPair::generate();
        let body: Vec<u8> = (0..MAX_PACKET_BODY_LEN * 2 + 5).map(|i| i as u8).collect();

        let bytes = seal(&body, 0, &recipient, &sender);
        let opened = open_mail(&MailCodec::new(255, 1 << 20), &recipient, &bytes).unwrap();
        assert_eq!(opened.body, body);
        assert_eq!(opened.sender, *sender.public_key());
    }

    #[test]
    fn test_padding_only_packets_beyond_one_packet() {
        let recipient = KeyPair::generate();
        let sender = KeyPair::generate();
        let min_size = MAX_PACKET_BODY_LEN + 10;

        let bytes = seal(b"x", min_size, &recipient, &sender);
        let opened = open_mail(&MailCodec::new(255, 1 << 20), &recipient, &bytes).unwrap();
        assert_eq!(opened.body, b"x");
    }

    #[test]
    fn test_wrong_recipient_fails_handshake() {
        let recipient = KeyPair::generate();
        let sender = KeyPair::generate();
        let bytes = seal(b"private", 0, &recipient, &sender);

        assert!(matches!(
            open_mail(&MailCodec::default(), &KeyPair::generate(), &bytes),
            Err(EnclaveMailError::Protocol(ProtocolError::HandshakeFailure))
        ));
    }

    #[test]
    fn test_missing_terminator_is_truncation() {
        let recipient = KeyPair::generate();
        let sender = KeyPair::generate();
        let bytes = seal(b"cut short", 0, &recipient, &sender);

        // The terminator is the last chunk: 2-byte length, then 2 + 16 bytes
        let cut = &bytes[..bytes.len() - (2 + 2 + 16)];
        assert!(matches!(
            open_mail(&MailCodec::default(), &recipient, cut),
            Err(EnclaveMailError::Mail(MailError::MalformedEnvelope { .. }))
        ));
    }

    #[test]
    fn test_tampered_packet_fails_authentication() {
        let recipient = KeyPair::generate();
        let sender = KeyPair::generate();
        let mut bytes = seal(b"integrity", 0, &recipient, &sender);
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;

        assert!(matches!(
            open_mail(&MailCodec::default(), &recipient, &bytes),
            Err(EnclaveMailError::Crypto(CryptoError::AuthenticationFailure))
        ));
    }
}

//! Per-topic sequencing of mail
//!
//! A [`PostOffice`] stamps outgoing envelopes for one topic with sequence
//! numbers 0, 1, 2, ... and can seal mail to a recipient's static key. A
//! [`SequenceTracker`] on the receiving side accepts exactly the next
//! expected number for each topic and nothing else.

use std::collections::HashMap;

use crate::crypto::{KeyPair, PublicKeyBytes};
use crate::error::{EnclaveMailError, MailError, ProtocolError};
use crate::protocol::mail::{MailCodec, MailEnvelope};
use crate::protocol::sealed::{self, MinSizePolicy};

/// Topics are at most this many characters
pub const MAX_TOPIC_CHARS: usize = 255;

/// Check that a topic is non-empty, short, and only letters, digits and '-'
pub fn validate_topic(topic: &str) -> Result<(), MailError> {
    let invalid =
        |reason: String| -> Result<(), MailError> { Err(MailError::InvalidTopic { reason }) };

    if topic.trim().is_empty() {
        return invalid("topic must not be blank".to_string());
    }
    if topic.chars().count() > MAX_TOPIC_CHARS {
        return invalid(format!(
            "topic must be shorter than {} characters",
            MAX_TOPIC_CHARS + 1
        ));
    }
    if let Some(c) = topic.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '-')) {
        return invalid(format!(
            "topic may only contain letters, digits and '-', found {:?}",
            c
        ));
    }
    Ok(())
}

/// Outgoing mail for a single topic
#[derive(Debug, Clone)]
pub struct PostOffice {
    topic: String,
    next_sequence: u64,
    codec: MailCodec,
    min_size: MinSizePolicy,
}

impl PostOffice {
    pub fn new(topic: &str) -> Result<Self, MailError> {
        Self::with_codec(topic, MailCodec::default())
    }

    pub fn with_codec(topic: &str, codec: MailCodec) -> Result<Self, MailError> {
        validate_topic(topic)?;
        Ok(Self {
            topic: topic.to_string(),
            next_sequence: 0,
            codec,
            min_size: MinSizePolicy::default(),
        })
    }

    /// Padding applied to bodies passed to [`seal`](Self::seal)
    pub fn with_min_size_policy(mut self, policy: MinSizePolicy) -> Self {
        self.min_size = policy;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn codec(&self) -> &MailCodec {
        &self.codec
    }

    pub fn min_size_policy(&self) -> &MinSizePolicy {
        &self.min_size
    }

    /// Sequence number the next envelope will carry
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Encoded header of the next envelope, for binding into its encryption
    pub fn next_header(&self, envelope: &[u8]) -> Result<Vec<u8>, MailError> {
        self.check_sequence()?;
        self.codec
            .encode_header(&self.topic, self.next_sequence, envelope)
    }

    /// Encode `payload` under the next sequence number
    ///
    /// The sequence only advances once the envelope was encoded.
    pub fn post(&mut self, payload: Vec<u8>) -> Result<Vec<u8>, MailError> {
        self.post_with_envelope(payload, Vec::new())
    }

    /// Like [`post`](Self::post), with a cleartext envelope field
    pub fn post_with_envelope(
        &mut self,
        payload: Vec<u8>,
        envelope: Vec<u8>,
    ) -> Result<Vec<u8>, MailError> {
        self.check_sequence()?;

        let mail = MailEnvelope::new(self.topic.clone(), self.next_sequence, payload)
            .with_envelope(envelope);
        let bytes = self.codec.encode(&mail)?;
        self.next_sequence += 1;
        Ok(bytes)
    }

    /// Encrypt `body` to `destination` as a self-contained mail
    ///
    /// The header, including `envelope`, is authenticated by the handshake
    /// prologue; the recipient learns `sender`'s public key. Bodies are padded
    /// according to the min size policy.
    pub fn seal(
        &mut self,
        destination: &PublicKeyBytes,
        sender: &KeyPair,
        body: &[u8],
        envelope: &[u8],
    ) -> Result<Vec<u8>, EnclaveMailError> {
        let header = self.next_header(envelope)?;
        let min_size = self.min_size.min_size(body.len());

        let padded = body.len().max(min_size);
        if padded > self.codec.max_payload_len() {
            return Err(MailError::EnvelopeTooLarge {
                field: "payload",
                len: padded,
                limit: self.codec.max_payload_len(),
            }
            .into());
        }

        let payload = sealed::seal_payload(&header, destination, sender, body, min_size)?;
        let bytes = self.post_with_envelope(payload, envelope.to_vec())?;
        tracing::debug!(
            "Sealed mail {} on topic {} ({} bytes)",
            self.next_sequence - 1,
            self.topic,
            bytes.len()
        );
        Ok(bytes)
    }

    fn check_sequence(&self) -> Result<(), MailError> {
        if self.next_sequence == u64::MAX {
            return Err(MailError::SequenceExhausted {
                topic: self.topic.clone(),
            });
        }
        Ok(())
    }
}

/// Receiver-side sequence check, one counter per topic
#[derive(Debug, Default, Clone)]
pub struct SequenceTracker {
    expected: HashMap<String, u64>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next sequence number accepted on `topic`
    pub fn expected(&self, topic: &str) -> u64 {
        self.expected.get(topic).copied().unwrap_or(0)
    }

    /// Accept `sequence` on `topic` if and only if it is the next one expected
    pub fn accept(&mut self, topic: &str, sequence: u64) -> Result<(), ProtocolError> {
        self.check(topic, sequence)?;
        self.expected.insert(topic.to_string(), sequence.saturating_add(1));
        Ok(())
    }

    /// Same check as [`accept`](Self::accept) without recording the sequence
    pub fn check(&self, topic: &str, sequence: u64) -> Result<(), ProtocolError> {
        let expected = self.expected(topic);
        if sequence != expected {
            if sequence < expected {
                tracing::warn!(
                    "Sequence {} on topic {} already seen, expecting {}",
                    sequence,
                    topic,
                    expected
                );
            } else {
                tracing::warn!(
                    "Sequence {} on topic {} skips ahead of {}",
                    sequence,
                    topic,
                    expected
                );
            }
            return Err(ProtocolError::ReplayOrGap {
                expected,
                got: sequence,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_validation() {
        assert!(validate_topic("orders").is_ok());
        assert!(validate_topic("client-42").is_ok());
        assert!(validate_topic(&"a".repeat(255)).is_ok());

        for bad in ["", "   ", "with space", "dots.not.allowed", "ünïcode"] {
            assert!(
                matches!(validate_topic(bad), Err(MailError::InvalidTopic { .. })),
                "{:?}",
                bad
            );
        }
        assert!(validate_topic(&"a".repeat(256)).is_err());
    }

    #[test]
    fn test_post_office_numbers_from_zero() {
        let mut office = PostOffice::new("jobs").unwrap();
        let codec = MailCodec::default();

        for expected in 0..3u64 {
            let bytes = office.post(b"work".to_vec()).unwrap();
            let envelope = codec.decode(&bytes).unwrap();
            assert_eq!(envelope.topic, "jobs");
            assert_eq!(envelope.sequence, expected);
        }
        assert_eq!(office.next_sequence(), 3);
    }

    #[test]
    fn test_failed_post_does_not_consume_sequence() {
        let mut office = PostOffice::with_codec("jobs", MailCodec::new(255, 4)).unwrap();
        assert!(office.post(vec![0u8; 5]).is_err());
        assert_eq!(office.next_sequence(), 0);
    }

    #[test]
    fn test_next_header_matches_posted_bytes() {
        let mut office = PostOffice::new("jobs").unwrap();
        office.post(Vec::new()).unwrap();

        let header = office.next_header(b"route").unwrap();
        let bytes = office
            .post_with_envelope(b"body".to_vec(), b"route".to_vec())
            .unwrap();
        assert_eq!(&bytes[..header.len()], header.as_slice());

        let envelope = office.codec().decode(&bytes).unwrap();
        assert_eq!(envelope.sequence, 1);
        assert_eq!(envelope.envelope, b"route");
    }

    #[test]
    fn test_sealed_mail_round_trip() {
        let recipient = KeyPair::generate();
        let sender = KeyPair::generate();
        let mut office = PostOffice::new("orders").unwrap();

        for expected in 0..2u64 {
            let bytes = office
                .seal(recipient.public_key(), &sender, b"buy 10", b"desk-4")
                .unwrap();
            let mail = sealed::open_mail(office.codec(), &recipient, &bytes).unwrap();
            assert_eq!(mail.topic, "orders");
            assert_eq!(mail.sequence, expected);
            assert_eq!(mail.envelope, b"desk-4");
            assert_eq!(mail.body, b"buy 10");
            assert_eq!(mail.sender, *sender.public_key());
        }
    }

    #[test]
    fn test_tampered_header_rejects_sealed_mail() {
        let recipient = KeyPair::generate();
        let sender = KeyPair::generate();
        let mut office = PostOffice::new("orders").unwrap();
        let codec = *office.codec();
        let bytes = office
            .seal(recipient.public_key(), &sender, b"buy 10", b"desk-4")
            .unwrap();
        let genuine = codec.decode(&bytes).unwrap();

        let rewrites = [
            MailEnvelope {
                topic: "refunds".to_string(),
                ..genuine.clone()
            },
            MailEnvelope {
                sequence: 7,
                ..genuine.clone()
            },
            genuine.clone().with_envelope(b"desk-5".to_vec()),
            genuine.clone().with_envelope(Vec::new()),
        ];
        for forged in rewrites {
            let forged_bytes = codec.encode(&forged).unwrap();
            assert!(
                matches!(
                    sealed::open_mail(&codec, &recipient, &forged_bytes),
                    Err(EnclaveMailError::Protocol(ProtocolError::HandshakeFailure))
                ),
                "{:?}",
                forged.topic
            );
        }
        assert!(sealed::open_mail(&codec, &recipient, &bytes).is_ok());
    }

    #[test]
    fn test_min_size_policy_pads_sealed_mail() {
        let recipient = KeyPair::generate();
        let sender = KeyPair::generate();
        let mut office = PostOffice::new("t")
            .unwrap()
            .with_min_size_policy(MinSizePolicy::largest_seen());

        let big = office
            .seal(recipient.public_key(), &sender, &[1u8; 500], b"")
            .unwrap();
        let small = office
            .seal(recipient.public_key(), &sender, b"ok", b"")
            .unwrap();
        assert_eq!(big.len(), small.len());
        assert_eq!(
            sealed::open_mail(office.codec(), &recipient, &small).unwrap().body,
            b"ok"
        );
    }

    #[test]
    fn test_oversized_padding_does_not_consume_sequence() {
        let recipient = KeyPair::generate();
        let mut office = PostOffice::with_codec("t", MailCodec::new(255, 1024))
            .unwrap()
            .with_min_size_policy(MinSizePolicy::fixed(4096));

        assert!(matches!(
            office.seal(recipient.public_key(), &KeyPair::generate(), b"x", b""),
            Err(EnclaveMailError::Mail(MailError::EnvelopeTooLarge { .. }))
        ));
        assert_eq!(office.next_sequence(), 0);
    }

    #[test]
    fn test_tracker_first_must_be_zero() {
        let mut tracker = SequenceTracker::new();
        assert_eq!(
            tracker.accept("t", 1).unwrap_err(),
            ProtocolError::ReplayOrGap {
                expected: 0,
                got: 1
            }
        );
        tracker.accept("t", 0).unwrap();
    }

    #[test]
    fn test_tracker_rejects_duplicates_and_regressions() {
        let mut tracker = SequenceTracker::new();
        tracker.accept("t", 0).unwrap();
        tracker.accept("t", 1).unwrap();

        assert!(tracker.accept("t", 1).is_err());
        assert!(tracker.accept("t", 0).is_err());
        assert!(tracker.accept("t", 3).is_err());
        assert_eq!(tracker.expected("t"), 2);
    }

    #[test]
    fn test_topics_are_independent() {
        let mut tracker = SequenceTracker::new();
        tracker.accept("a", 0).unwrap();
        tracker.accept("a", 1).unwrap();
        tracker.accept("b", 0).unwrap();

        assert_eq!(tracker.expected("a"), 2);
        assert_eq!(tracker.expected("b"), 1);
        assert_eq!(tracker.expected("c"), 0);
    }
}

//! Mail envelope wire format
//!
//! ```text
//! v1: [1][2 BE topic length][topic UTF-8][8 BE sequence][payload]
//! v2: [2][2 BE topic length][topic UTF-8][8 BE sequence][2 BE envelope length][envelope][payload]
//! ```
//!
//! Everything before the payload is the header. It travels in the clear and
//! is authenticated by the layer that encrypts the payload, which binds the
//! bytes from [`MailCodec::encode_header`] into its prologue or associated
//! data. The version is picked by the codec: v2 only when an envelope field
//! is present, so every envelope has exactly one encoding.

use crate::error::MailError;

/// Format version without an envelope field
pub const MAIL_VERSION: u8 = 1;

/// Format version carrying an envelope field
pub const MAIL_VERSION_ENVELOPE: u8 = 2;

/// Default topic length limit in bytes
pub const DEFAULT_MAX_TOPIC_LEN: usize = 255;

/// Default payload limit: one Noise message
pub const DEFAULT_MAX_PAYLOAD_LEN: usize = 65535;

/// Envelope field limit, fixed by its 2-byte length prefix
pub const MAX_ENVELOPE_LEN: usize = u16::MAX as usize;

const VERSION_LEN: usize = 1;
const TOPIC_LEN_LEN: usize = 2;
const SEQUENCE_LEN: usize = 8;
const ENVELOPE_LEN_LEN: usize = 2;

/// Smallest possible envelope (empty topic, empty payload)
pub const MIN_ENVELOPE_LEN: usize = VERSION_LEN + TOPIC_LEN_LEN + SEQUENCE_LEN;

/// A decoded envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailEnvelope {
    pub topic: String,
    pub sequence: u64,
    /// Cleartext application data authenticated along with the payload;
    /// empty when unused
    pub envelope: Vec<u8>,
    pub payload: Vec<u8>,
}

/// Envelope header, readable without touching the payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailHeader {
    pub version: u8,
    pub topic: String,
    pub sequence: u64,
    pub envelope: Vec<u8>,
    pub payload_len: usize,
}

impl MailEnvelope {
    pub fn new(topic: impl Into<String>, sequence: u64, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            sequence,
            envelope: Vec::new(),
            payload,
        }
    }

    pub fn with_envelope(mut self, envelope: Vec<u8>) -> Self {
        self.envelope = envelope;
        self
    }

    /// Format version this envelope encodes to
    pub fn version(&self) -> u8 {
        version_for(&self.envelope)
    }

    /// Read the unauthenticated header of an encoded envelope
    pub fn peek_header(bytes: &[u8]) -> Result<MailHeader, MailError> {
        parse_header(bytes).map(|(header, _)| header)
    }
}

fn version_for(envelope: &[u8]) -> u8 {
    if envelope.is_empty() {
        MAIL_VERSION
    } else {
        MAIL_VERSION_ENVELOPE
    }
}

/// Stateless envelope encoder/decoder with configured size limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailCodec {
    max_topic_len: usize,
    max_payload_len: usize,
}

impl Default for MailCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TOPIC_LEN, DEFAULT_MAX_PAYLOAD_LEN)
    }
}

impl MailCodec {
    /// Topic limits above what the 2-byte length field can carry are clamped
    pub fn new(max_topic_len: usize, max_payload_len: usize) -> Self {
        Self {
            max_topic_len: max_topic_len.min(u16::MAX as usize),
            max_payload_len,
        }
    }

    pub fn max_topic_len(&self) -> usize {
        self.max_topic_len
    }

    pub fn max_payload_len(&self) -> usize {
        self.max_payload_len
    }

    /// Header bytes exactly as [`encode`](Self::encode) writes them
    pub fn encode_header(
        &self,
        topic: &str,
        sequence: u64,
        envelope: &[u8],
    ) -> Result<Vec<u8>, MailError> {
        self.check_header_limits(topic.len(), envelope.len())?;

        let mut out = Vec::with_capacity(header_len(topic.len(), envelope.len()));
        out.push(version_for(envelope));
        out.extend_from_slice(&(topic.len() as u16).to_be_bytes());
        out.extend_from_slice(topic.as_bytes());
        out.extend_from_slice(&sequence.to_be_bytes());
        if !envelope.is_empty() {
            out.extend_from_slice(&(envelope.len() as u16).to_be_bytes());
            out.extend_from_slice(envelope);
        }
        Ok(out)
    }

    pub fn encode(&self, envelope: &MailEnvelope) -> Result<Vec<u8>, MailError> {
        self.check_payload_limit(envelope.payload.len())?;

        let mut out =
            self.encode_header(&envelope.topic, envelope.sequence, &envelope.envelope)?;
        out.reserve(envelope.payload.len());
        out.extend_from_slice(&envelope.payload);
        Ok(out)
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<MailEnvelope, MailError> {
        let (header, offset) = parse_header(bytes)?;
        self.check_header_limits(header.topic.len(), header.envelope.len())?;
        self.check_payload_limit(header.payload_len)?;

        Ok(MailEnvelope {
            topic: header.topic,
            sequence: header.sequence,
            envelope: header.envelope,
            payload: bytes[offset..].to_vec(),
        })
    }

    fn check_header_limits(&self, topic_len: usize, envelope_len: usize) -> Result<(), MailError> {
        if topic_len > self.max_topic_len {
            return Err(MailError::EnvelopeTooLarge {
                field: "topic",
                len: topic_len,
                limit: self.max_topic_len,
            });
        }
        if envelope_len > MAX_ENVELOPE_LEN {
            return Err(MailError::EnvelopeTooLarge {
                field: "envelope",
                len: envelope_len,
                limit: MAX_ENVELOPE_LEN,
            });
        }
        Ok(())
    }

    fn check_payload_limit(&self, payload_len: usize) -> Result<(), MailError> {
        if payload_len > self.max_payload_len {
            return Err(MailError::EnvelopeTooLarge {
                field: "payload",
                len: payload_len,
                limit: self.max_payload_len,
            });
        }
        Ok(())
    }
}

fn header_len(topic_len: usize, envelope_len: usize) -> usize {
    let envelope_field = if envelope_len == 0 {
        0
    } else {
        ENVELOPE_LEN_LEN + envelope_len
    };
    MIN_ENVELOPE_LEN + topic_len + envelope_field
}

/// Parse the header and return it with the payload offset
fn parse_header(bytes: &[u8]) -> Result<(MailHeader, usize), MailError> {
    let malformed = |reason: &str| MailError::MalformedEnvelope {
        reason: reason.to_string(),
    };

    if bytes.len() < MIN_ENVELOPE_LEN {
        return Err(malformed("envelope truncated before end of header"));
    }

    let version = bytes[0];
    if version != MAIL_VERSION && version != MAIL_VERSION_ENVELOPE {
        return Err(MailError::MalformedEnvelope {
            reason: format!("unknown version {}", version),
        });
    }

    let topic_len = u16::from_be_bytes([bytes[1], bytes[2]]) as usize;
    let topic_start = VERSION_LEN + TOPIC_LEN_LEN;
    let topic_end = topic_start + topic_len;
    let sequence_end = topic_end + SEQUENCE_LEN;
    if bytes.len() < sequence_end {
        return Err(malformed("envelope truncated inside topic or sequence"));
    }

    let topic = std::str::from_utf8(&bytes[topic_start..topic_end])
        .map_err(|_| malformed("topic is not valid UTF-8"))?
        .to_string();

    let mut sequence = [0u8; SEQUENCE_LEN];
    sequence.copy_from_slice(&bytes[topic_end..sequence_end]);

    let (envelope, payload_start) = if version == MAIL_VERSION_ENVELOPE {
        let envelope_start = sequence_end + ENVELOPE_LEN_LEN;
        if bytes.len() < envelope_start {
            return Err(malformed("envelope truncated before envelope field length"));
        }
        let envelope_len =
            u16::from_be_bytes([bytes[sequence_end], bytes[sequence_end + 1]]) as usize;
        if envelope_len == 0 {
            return Err(malformed("empty envelope field in version 2"));
        }
        let envelope_end = envelope_start + envelope_len;
        if bytes.len() < envelope_end {
            return Err(malformed("envelope truncated inside envelope field"));
        }
        (bytes[envelope_start..envelope_end].to_vec(), envelope_end)
    } else {
        (Vec::new(), sequence_end)
    };

    Ok((
        MailHeader {
            version,
            topic,
            sequence: u64::from_be_bytes(sequence),
            envelope,
            payload_len: bytes.len() - payload_start,
        },
        payload_start,
    ))
}

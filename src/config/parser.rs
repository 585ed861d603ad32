//! Channel configuration file parser
//!
//! Parses `.conf` files with a `[Channel]` section and an optional
//! `[Attestation]` section.

use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::attestation::ConstraintExpression;
use crate::crypto::KeyPair;
use crate::error::ConfigError;
use crate::protocol::mail::{DEFAULT_MAX_PAYLOAD_LEN, DEFAULT_MAX_TOPIC_LEN};
use crate::protocol::{validate_topic, CipherSuite, MailCodec};

/// Topic used when the config does not name one
pub const DEFAULT_TOPIC: &str = "default";

/// Complete channel configuration
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Local side of the channel
    pub channel: ChannelSection,
    /// How to decide whether the peer is trusted
    pub attestation: Option<AttestationSection>,
}

/// `[Channel]` section
#[derive(Debug, Clone)]
pub struct ChannelSection {
    pub protocol: CipherSuite,
    /// Our static private key, when the pattern needs one
    pub private_key: Option<[u8; 32]>,
    pub topic: String,
    pub prologue: Vec<u8>,
    pub max_topic_len: usize,
    pub max_payload_len: usize,
}

/// `[Attestation]` section
#[derive(Debug, Clone, Default)]
pub struct AttestationSection {
    pub constraint: Option<ConstraintExpression>,
    /// Peer static key trusted without attestation
    pub peer_public_key: Option<[u8; 32]>,
}

impl ChannelConfig {
    /// Parse a channel configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                ConfigError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// Parse a channel configuration from a string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut channel = ChannelBuilder::default();
        let mut attestation: Option<AttestationSection> = None;
        let mut current_section: Option<Section> = None;

        for (line_num, line) in content.lines().enumerate() {
            let line_num = line_num + 1; // 1-indexed
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if line.eq_ignore_ascii_case("[channel]") {
                current_section = Some(Section::Channel);
                continue;
            } else if line.eq_ignore_ascii_case("[attestation]") {
                current_section = Some(Section::Attestation);
                attestation.get_or_insert_with(AttestationSection::default);
                continue;
            } else if line.starts_with('[') {
                return Err(ConfigError::ParseError {
                    line: line_num,
                    message: format!("Unknown section: {}", line),
                });
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError::ParseError {
                    line: line_num,
                    message: format!("Expected 'key = value', got: {}", line),
                });
            };

            let key = key.trim().to_lowercase();
            let value = value.trim();

            match current_section {
                Some(Section::Channel) => {
                    channel.seen = true;
                    match key.as_str() {
                        "protocol" => {
                            channel.protocol = Some(value.parse().map_err(|e| {
                                ConfigError::ParseError {
                                    line: line_num,
                                    message: format!("Invalid Protocol: {}", e),
                                }
                            })?);
                        }
                        "privatekey" => {
                            channel.private_key = Some(parse_key(value, "PrivateKey")?);
                        }
                        "topic" => {
                            validate_topic(value).map_err(|e| ConfigError::ParseError {
                                line: line_num,
                                message: e.to_string(),
                            })?;
                            channel.topic = Some(value.to_string());
                        }
                        "prologue" => {
                            channel.prologue = value.as_bytes().to_vec();
                        }
                        "maxtopiclength" => {
                            channel.max_topic_len = Some(parse_limit(value, "MaxTopicLength")?);
                        }
                        "maxpayloadlength" => {
                            channel.max_payload_len =
                                Some(parse_limit(value, "MaxPayloadLength")?);
                        }
                        _ => {
                            // Unknown key, ignore (forward compatibility)
                            tracing::debug!("Unknown channel key: {}", key);
                        }
                    }
                }
                Some(Section::Attestation) => {
                    let section = attestation.get_or_insert_with(AttestationSection::default);
                    match key.as_str() {
                        "constraint" => {
                            section.constraint = Some(ConstraintExpression::parse(value).map_err(
                                |e| ConfigError::ParseError {
                                    line: line_num,
                                    message: format!("Invalid Constraint: {}", e),
                                },
                            )?);
                        }
                        "peerpublickey" => {
                            section.peer_public_key = Some(parse_key(value, "PeerPublicKey")?);
                        }
                        _ => {
                            tracing::debug!("Unknown attestation key: {}", key);
                        }
                    }
                }
                None => {
                    return Err(ConfigError::ParseError {
                        line: line_num,
                        message: "Configuration value outside of any section".to_string(),
                    });
                }
            }
        }

        Ok(ChannelConfig {
            channel: channel.build()?,
            attestation,
        })
    }

    /// Our static key pair, if a private key was configured
    pub fn keypair(&self) -> Option<KeyPair> {
        self.channel.private_key.map(KeyPair::from_private)
    }

    /// Our static public key derived from the private key
    pub fn public_key(&self) -> Option<[u8; 32]> {
        self.keypair().map(|kp| *kp.public_key())
    }

    /// Envelope codec with the configured limits
    pub fn codec(&self) -> MailCodec {
        MailCodec::new(self.channel.max_topic_len, self.channel.max_payload_len)
    }
}

/// Section type during parsing
#[derive(Clone, Copy)]
enum Section {
    Channel,
    Attestation,
}

/// Builder for ChannelSection during parsing
#[derive(Default)]
struct ChannelBuilder {
    seen: bool,
    protocol: Option<CipherSuite>,
    private_key: Option<[u8; 32]>,
    topic: Option<String>,
    prologue: Vec<u8>,
    max_topic_len: Option<usize>,
    max_payload_len: Option<usize>,
}

impl ChannelBuilder {
    fn build(self) -> Result<ChannelSection, ConfigError> {
        if !self.seen {
            return Err(ConfigError::MissingField {
                field: "[Channel] section".to_string(),
            });
        }
        let protocol = self.protocol.ok_or(ConfigError::MissingField {
            field: "Protocol in [Channel]".to_string(),
        })?;

        Ok(ChannelSection {
            protocol,
            private_key: self.private_key,
            topic: self.topic.unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
            prologue: self.prologue,
            max_topic_len: self.max_topic_len.unwrap_or(DEFAULT_MAX_TOPIC_LEN),
            max_payload_len: self.max_payload_len.unwrap_or(DEFAULT_MAX_PAYLOAD_LEN),
        })
    }
}

/// Parse a base64-encoded 32-byte key
pub fn parse_key(value: &str, field_name: &str) -> Result<[u8; 32], ConfigError> {
    let bytes = BASE64
        .decode(value)
        .map_err(|_| ConfigError::InvalidKey {
            field: field_name.to_string(),
        })?;

    bytes.try_into().map_err(|_| ConfigError::InvalidKey {
        field: field_name.to_string(),
    })
}

/// Parse a positive size limit
fn parse_limit(value: &str, field_name: &str) -> Result<usize, ConfigError> {
    match value.parse::<usize>() {
        Ok(limit) if limit > 0 => Ok(limit),
        _ => Err(ConfigError::InvalidValue {
            field: field_name.to_string(),
            value: value.to_string(),
        }),
    }
}

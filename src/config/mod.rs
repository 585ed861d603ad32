//! Configuration parsing for enclave-mail
//!
//! This module handles parsing of INI-style `.conf` channel configuration files.

mod parser;

pub use parser::{parse_key, AttestationSection, ChannelConfig, ChannelSection, DEFAULT_TOPIC};

//! Attestation constraint language
//!
//! An expression is a space-separated list of `tag:value` clauses, all of
//! which must hold:
//!
//! ```text
//! code-hash:<hex>  signer:<hex>  product-id:<u16>  revocation-level:<u32>
//! security-mode:secure|stale|insecure  max-age:<n>[s|m|h|d]
//! ```
//!
//! Short aliases `C`, `S`, `PROD`, `REVOKE`, `SEC` and `EXPIRE` are accepted.
//! Without a `security-mode` clause the expression requires at least `stale`,
//! so debug enclaves are never accepted unless asked for.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::attestation::report::{AttestationReport, SecurityLevel, TrustedKey};
use crate::error::{ConstraintError, ConstraintViolation};

/// Security level required when the expression does not name one
pub const DEFAULT_SECURITY_LEVEL: SecurityLevel = SecurityLevel::Stale;

/// A single predicate over a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Clause {
    CodeHash([u8; 32]),
    Signer([u8; 32]),
    ProductId(u16),
    /// Minimum revocation level
    RevocationLevel(u32),
    /// Minimum security level; `Insecure` means exactly insecure
    SecurityMode(SecurityLevel),
    /// Maximum age of the evidence in seconds
    MaxAge(u64),
}

impl Clause {
    /// Canonical tag name
    pub fn tag(&self) -> &'static str {
        match self {
            Self::CodeHash(_) => "code-hash",
            Self::Signer(_) => "signer",
            Self::ProductId(_) => "product-id",
            Self::RevocationLevel(_) => "revocation-level",
            Self::SecurityMode(_) => "security-mode",
            Self::MaxAge(_) => "max-age",
        }
    }

    fn parse(token: &str) -> Result<Self, ConstraintError> {
        let (tag, value) = match token.split_once(':') {
            Some((tag, value)) if !tag.is_empty() && !value.contains(':') => (tag, value),
            _ => {
                return Err(ConstraintError::InvalidToken {
                    token: token.to_string(),
                })
            }
        };

        let clause = match tag.to_ascii_lowercase().as_str() {
            "code-hash" | "c" => Self::CodeHash(parse_hash("code-hash", value)?),
            "signer" | "s" => Self::Signer(parse_hash("signer", value)?),
            "product-id" | "prod" => Self::ProductId(parse_number("product-id", value)?),
            "revocation-level" | "revoke" => {
                Self::RevocationLevel(parse_number("revocation-level", value)?)
            }
            "security-mode" | "sec" => Self::SecurityMode(SecurityLevel::from_name(value)?),
            "max-age" | "expire" => Self::MaxAge(parse_age(value)?),
            _ => {
                return Err(ConstraintError::UnknownConstraintTag {
                    tag: tag.to_string(),
                })
            }
        };
        Ok(clause)
    }

    fn check(&self, report: &AttestationReport, now: u64) -> Result<(), ConstraintViolation> {
        let violation = |expected: String, actual: String| ConstraintViolation {
            clause: self.to_string(),
            expected,
            actual,
        };

        match *self {
            Self::CodeHash(hash) => {
                if report.code_hash != hash {
                    return Err(violation(
                        hex::encode_upper(hash),
                        hex::encode_upper(report.code_hash),
                    ));
                }
            }
            Self::Signer(signer) => {
                if report.signer != signer {
                    return Err(violation(
                        hex::encode_upper(signer),
                        hex::encode_upper(report.signer),
                    ));
                }
            }
            Self::ProductId(id) => {
                if report.product_id != id {
                    return Err(violation(id.to_string(), report.product_id.to_string()));
                }
            }
            Self::RevocationLevel(min) => {
                if report.revocation_level < min {
                    return Err(violation(
                        format!(">= {}", min),
                        report.revocation_level.to_string(),
                    ));
                }
            }
            Self::SecurityMode(required) => {
                let actual = report.effective_security();
                // Asking for insecure means insecure only, never a production enclave
                let ok = if required == SecurityLevel::Insecure {
                    actual == SecurityLevel::Insecure
                } else {
                    actual >= required
                };
                if !ok {
                    let expected = if required == SecurityLevel::Insecure {
                        required.to_string()
                    } else {
                        format!(">= {}", required)
                    };
                    return Err(violation(expected, actual.to_string()));
                }
            }
            Self::MaxAge(max) => {
                let age = now.saturating_sub(report.attested_at);
                if age > max {
                    return Err(violation(
                        format!("age <= {}", format_age(max)),
                        format!("age {}s", age),
                    ));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.tag())?;
        match self {
            Self::CodeHash(hash) | Self::Signer(hash) => f.write_str(&hex::encode_upper(hash)),
            Self::ProductId(id) => write!(f, "{}", id),
            Self::RevocationLevel(level) => write!(f, "{}", level),
            Self::SecurityMode(level) => write!(f, "{}", level),
            Self::MaxAge(seconds) => f.write_str(&format_age(*seconds)),
        }
    }
}

/// Parsed, immutable constraint; evaluate it against as many reports as needed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintExpression {
    clauses: Vec<Clause>,
}

impl ConstraintExpression {
    pub fn parse(text: &str) -> Result<Self, ConstraintError> {
        let mut clauses: Vec<Clause> = Vec::new();

        for token in text.split_whitespace() {
            let clause = Clause::parse(token)?;

            match clauses.iter().find(|c| c.tag() == clause.tag()) {
                Some(existing) if *existing == clause => continue,
                Some(existing) => {
                    return Err(ConstraintError::ConflictingConstraint {
                        tag: clause.tag(),
                        first: existing.to_string(),
                        second: clause.to_string(),
                    })
                }
                None => clauses.push(clause),
            }
        }

        let has = |tag: &str| clauses.iter().any(|c| c.tag() == tag);
        if !has("code-hash") && !has("signer") {
            return Err(ConstraintError::IncompleteConstraint {
                reason: "either a code-hash or a signer must be given",
            });
        }
        if has("signer") && !has("product-id") {
            return Err(ConstraintError::IncompleteConstraint {
                reason: "a product-id must be given with a signer",
            });
        }
        if has("product-id") && !has("signer") {
            return Err(ConstraintError::IncompleteConstraint {
                reason: "a signer must be given with a product-id",
            });
        }
        if !has("security-mode") {
            clauses.push(Clause::SecurityMode(DEFAULT_SECURITY_LEVEL));
        }

        Ok(Self { clauses })
    }

    /// Clauses in evaluation order
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// Required security level, explicit or defaulted
    pub fn security_level(&self) -> SecurityLevel {
        self.clauses
            .iter()
            .find_map(|c| match c {
                Clause::SecurityMode(level) => Some(*level),
                _ => None,
            })
            .unwrap_or(DEFAULT_SECURITY_LEVEL)
    }

    /// Evaluate against `report` at the current wall-clock time
    pub fn evaluate(&self, report: &AttestationReport) -> Result<TrustedKey, ConstraintViolation> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.evaluate_at(report, now)
    }

    /// Evaluate against `report` with `now` in Unix seconds
    ///
    /// Stops at the first failing clause and reports it.
    pub fn evaluate_at(
        &self,
        report: &AttestationReport,
        now: u64,
    ) -> Result<TrustedKey, ConstraintViolation> {
        for clause in &self.clauses {
            if let Err(violation) = clause.check(report, now) {
                tracing::warn!("Attestation rejected: {}", violation);
                return Err(violation);
            }
        }

        tracing::debug!("Attestation accepted, key {:02x?}", &report.public_key[..8]);
        Ok(TrustedKey::new(report.public_key))
    }
}

impl FromStr for ConstraintExpression {
    type Err = ConstraintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ConstraintExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, clause) in self.clauses.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", clause)?;
        }
        Ok(())
    }
}

fn parse_hash(tag: &'static str, value: &str) -> Result<[u8; 32], ConstraintError> {
    let invalid = || ConstraintError::InvalidValue {
        tag,
        value: value.to_string(),
    };
    let bytes = hex::decode(value).map_err(|_| invalid())?;
    bytes.try_into().map_err(|_| invalid())
}

fn parse_number<T: FromStr>(tag: &'static str, value: &str) -> Result<T, ConstraintError> {
    value.parse().map_err(|_| ConstraintError::InvalidValue {
        tag,
        value: value.to_string(),
    })
}

/// `<n>` or `<n>s|m|h|d`, in seconds
fn parse_age(value: &str) -> Result<u64, ConstraintError> {
    let invalid = || ConstraintError::InvalidValue {
        tag: "max-age",
        value: value.to_string(),
    };

    let (digits, unit) = match value.char_indices().last() {
        Some((i, c)) if c.is_ascii_alphabetic() => (&value[..i], c.to_ascii_lowercase()),
        _ => (value, 's'),
    };
    let multiplier = match unit {
        's' => 1,
        'm' => 60,
        'h' => 60 * 60,
        'd' => 24 * 60 * 60,
        _ => return Err(invalid()),
    };

    let n: u64 = digits.parse().map_err(|_| invalid())?;
    n.checked_mul(multiplier).ok_or_else(invalid)
}

fn format_age(seconds: u64) -> String {
    for (unit, size) in [('d', 86_400), ('h', 3_600), ('m', 60)] {
        if seconds > 0 && seconds % size == 0 {
            return format!("{}{}", seconds / size, unit);
        }
    }
    format!("{}s", seconds)
}

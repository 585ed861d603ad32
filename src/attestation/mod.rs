//! Attestation evidence and the constraints that decide whether to trust it

pub mod constraint;
pub mod report;

pub use constraint::{Clause, ConstraintExpression, DEFAULT_SECURITY_LEVEL};
pub use report::{AttestationReport, SecurityLevel, TrustedKey};

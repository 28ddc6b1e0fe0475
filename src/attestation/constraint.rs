//! Human-readable policy over attestation records.
//!
//! A constraint is a space-separated list of `KEY:VALUE` tokens in any order:
//!
//! - `S:<hex>`: an acceptable code measurement (repeatable)
//! - `PROD:<n>`: the required product id
//! - `SEC:<level>`: minimum security mode; `SEC:INSECURE` accepts any mode
//!
//! Unknown keys are a syntax error, never skipped.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use super::types::{AttestationRecord, Measurement, SecurityMode};
use crate::error::AttestError;

/// Parsed attestation policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    accepted_measurements: BTreeSet<Measurement>,
    product_id: Option<u16>,
    minimum_security: SecurityMode,
}

impl Default for Constraint {
    /// Accepts nothing.
    fn default() -> Self {
        Self {
            accepted_measurements: BTreeSet::new(),
            product_id: None,
            minimum_security: SecurityMode::Production,
        }
    }
}

impl Constraint {
    pub fn parse(expression: &str) -> Result<Self, AttestError> {
        let mut constraint = Constraint::default();
        let mut seen_sec = false;

        for token in expression.split_whitespace() {
            let (key, value) = token.split_once(':').ok_or_else(|| {
                AttestError::ConstraintSyntax(format!("token {token:?} is not KEY:VALUE"))
            })?;
            if value.is_empty() {
                return Err(AttestError::ConstraintSyntax(format!(
                    "token {token:?} has an empty value"
                )));
            }

            match key {
                "S" => {
                    let measurement = Measurement::from_str(value)?;
                    if !constraint.accepted_measurements.insert(measurement) {
                        return Err(AttestError::ConstraintSyntax(format!(
                            "duplicate measurement S:{measurement}"
                        )));
                    }
                }
                "PROD" => {
                    if constraint.product_id.is_some() {
                        return Err(AttestError::ConstraintSyntax(
                            "duplicate PROD key".into(),
                        ));
                    }
                    let id = value.parse::<u16>().map_err(|e| {
                        AttestError::ConstraintSyntax(format!("invalid product id {value:?}: {e}"))
                    })?;
                    constraint.product_id = Some(id);
                }
                "SEC" => {
                    if seen_sec {
                        return Err(AttestError::ConstraintSyntax("duplicate SEC key".into()));
                    }
                    seen_sec = true;
                    constraint.minimum_security = SecurityMode::from_str(value)?;
                }
                other => {
                    return Err(AttestError::ConstraintSyntax(format!(
                        "unknown constraint key {other:?}"
                    )));
                }
            }
        }

        Ok(constraint)
    }

    /// Check a verified record against this policy.
    pub fn check(&self, record: &AttestationRecord) -> Result<(), AttestError> {
        let violation = |reason: String| AttestError::ConstraintViolation {
            reason,
            attestation: record.to_string(),
        };

        if self.accepted_measurements.is_empty() {
            return Err(violation("constraint accepts no measurements".into()));
        }

        if !self.accepted_measurements.contains(record.measurement()) {
            return Err(violation(format!(
                "measurement {} is not one of the accepted measurements [{}]",
                record.measurement(),
                self.accepted_measurements
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        match self.product_id {
            None => return Err(violation("constraint names no product id (PROD:n)".into())),
            Some(required) if required != record.product_id() => {
                return Err(violation(format!(
                    "product id {} does not match required {required}",
                    record.product_id()
                )));
            }
            Some(_) => {}
        }

        if !record.security_mode().satisfies(self.minimum_security) {
            return Err(violation(format!(
                "security mode {} is below the required minimum {}",
                record.security_mode(),
                self.minimum_security
            )));
        }

        Ok(())
    }

    pub fn accepted_measurements(&self) -> &BTreeSet<Measurement> {
        &self.accepted_measurements
    }

    pub fn product_id(&self) -> Option<u16> {
        self.product_id
    }

    pub fn minimum_security(&self) -> SecurityMode {
        self.minimum_security
    }

    /// True when `SEC:INSECURE` was given.
    pub fn allows_insecure(&self) -> bool {
        self.minimum_security == SecurityMode::Insecure
    }
}

impl FromStr for Constraint {
    type Err = AttestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Canonical token form; parses back to an equal constraint.
impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tokens: Vec<String> = self
            .accepted_measurements
            .iter()
            .map(|m| format!("S:{m}"))
            .collect();
        if let Some(id) = self.product_id {
            tokens.push(format!("PROD:{id}"));
        }
        tokens.push(format!("SEC:{}", self.minimum_security));
        f.write_str(&tokens.join(" "))
    }
}

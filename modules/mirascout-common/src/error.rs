use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseFailureReason {
    MissingField,
    InvalidType,
    OutOfRange,
    /// The document describes a different listing than the one requested.
    IdentityMismatch,
    /// The payload is not the expected format at all (non-JSON body, no envelope).
    Malformed,
}

impl fmt::Display for ParseFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseFailureReason::MissingField => write!(f, "missing field"),
            ParseFailureReason::InvalidType => write!(f, "invalid type"),
            ParseFailureReason::OutOfRange => write!(f, "out of range"),
            ParseFailureReason::IdentityMismatch => write!(f, "identity mismatch"),
            ParseFailureReason::Malformed => write!(f, "malformed payload"),
        }
    }
}

/// A raw payload could not be turned into a listing.
///
/// Always local to one item: callers log it and drop the item.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}{}", describe_field(.field))]
pub struct ParseFailure {
    pub reason: ParseFailureReason,
    pub field: Option<String>,
}

fn describe_field(field: &Option<String>) -> String {
    field.as_deref().map(|f| format!(": {f}")).unwrap_or_default()
}

impl ParseFailure {
    pub fn new(reason: ParseFailureReason, field: impl Into<String>) -> Self {
        Self {
            reason,
            field: Some(field.into()),
        }
    }

    pub fn missing(field: impl Into<String>) -> Self {
        Self::new(ParseFailureReason::MissingField, field)
    }

    pub fn invalid(field: impl Into<String>) -> Self {
        Self::new(ParseFailureReason::InvalidType, field)
    }

    pub fn out_of_range(field: impl Into<String>) -> Self {
        Self::new(ParseFailureReason::OutOfRange, field)
    }

    pub fn identity_mismatch(expected: &str, found: &str) -> Self {
        Self::new(
            ParseFailureReason::IdentityMismatch,
            format!("source_id (expected {expected}, found {found})"),
        )
    }

    pub fn malformed(what: impl Into<String>) -> Self {
        Self::new(ParseFailureReason::Malformed, what)
    }
}

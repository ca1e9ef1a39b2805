//! The module contains the errors the engine can throw.
//!
//! Only boundary violations surface as errors:
//!
//! - [`InvalidMonth`] / [`InvalidDate`] thrown when a month or date string is
//!   malformed.
//! - [`InvalidRecord`] thrown when a persisted shard line cannot be decoded.
//! - [`KeyNotFound`] thrown when an edited or deleted item does not exist.
//! - [`InvalidCategory`] thrown when a category would break the hierarchy.
//!
//! Data anomalies the engine can recover from (an inert recurrence rule, a
//! stale category reference) are logged instead.
//!
//!  [`InvalidMonth`]: EngineError::InvalidMonth
//!  [`InvalidDate`]: EngineError::InvalidDate
//!  [`InvalidRecord`]: EngineError::InvalidRecord
//!  [`KeyNotFound`]: EngineError::KeyNotFound
//!  [`InvalidCategory`]: EngineError::InvalidCategory
use thiserror::Error;

/// Engine custom errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid month: \"{0}\"")]
    InvalidMonth(String),
    #[error("Invalid date: \"{0}\"")]
    InvalidDate(String),
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Invalid record in {name} at line {line}: {reason}")]
    InvalidRecord {
        name: String,
        line: usize,
        reason: String,
    },
    #[error("\"{0}\" key not found!")]
    KeyNotFound(String),
    #[error("\"{0}\" already present!")]
    ExistingKey(String),
    #[error("Invalid category: {0}")]
    InvalidCategory(String),
    #[error("Invalid sort key: \"{0}\"")]
    InvalidSortKey(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PartialEq for EngineError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::InvalidMonth(a), Self::InvalidMonth(b)) => a == b,
            (Self::InvalidDate(a), Self::InvalidDate(b)) => a == b,
            (Self::InvalidAmount(a), Self::InvalidAmount(b)) => a == b,
            (
                Self::InvalidRecord {
                    name: a_name,
                    line: a_line,
                    reason: a_reason,
                },
                Self::InvalidRecord {
                    name: b_name,
                    line: b_line,
                    reason: b_reason,
                },
            ) => a_name == b_name && a_line == b_line && a_reason == b_reason,
            (Self::KeyNotFound(a), Self::KeyNotFound(b)) => a == b,
            (Self::ExistingKey(a), Self::ExistingKey(b)) => a == b,
            (Self::InvalidCategory(a), Self::InvalidCategory(b)) => a == b,
            (Self::InvalidSortKey(a), Self::InvalidSortKey(b)) => a == b,
            (Self::Storage(a), Self::Storage(b)) => a == b,
            (Self::Json(a), Self::Json(b)) => a.to_string() == b.to_string(),
            (Self::Csv(a), Self::Csv(b)) => a.to_string() == b.to_string(),
            (Self::Io(a), Self::Io(b)) => a.kind() == b.kind(),
            _ => false,
        }
    }
}

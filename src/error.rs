//! Error types for the execution engine.
//!
//! The taxonomy decides retry behavior: `Conflict` is retried internally by
//! the transaction executor, everything else is surfaced unchanged.

use thiserror::Error;

use crate::types::RawValue;

#[derive(Error, Debug)]
pub enum Error {
    /// Cannot establish or lost a physical connection. Never retried.
    #[error("connection error: {0}")]
    Connection(String),

    /// Serialization or deadlock failure signaled by the driver.
    /// Retried internally by the executor, never surfaced by default.
    #[error("transaction conflict: {0}")]
    Conflict(String),

    /// Opaque driver-specific failure. Always surfaced, never retried.
    #[error("backend error: {0}")]
    Backend(String),

    /// A row did not match the shape the codec expected. Carries the raw
    /// values so the caller can see what the driver actually produced.
    #[error("row decode failed: expected {expected}: {message}")]
    Parsing {
        expected: String,
        values: Vec<RawValue>,
        message: String,
    },

    /// The pool has been shut down.
    #[error("pool is closed")]
    PoolClosed,

    /// A result stream was read after its transaction ended.
    #[error("result stream used outside its transaction")]
    StreamClosed,

    /// A configuration value was below its documented minimum.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Build a `Parsing` error from the codec's target description and the
    /// offending raw row.
    pub fn parsing(
        expected: impl Into<String>,
        values: &[RawValue],
        message: impl Into<String>,
    ) -> Self {
        Error::Parsing {
            expected: expected.into(),
            values: values.to_vec(),
            message: message.into(),
        }
    }

    /// Whether this error is in the conflict class the executor retries.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

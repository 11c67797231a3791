//! Error taxonomy for the scan pipeline.
//!
//! Every failure in the core maps to one of four kinds, which decides how
//! far it propagates: `Transport` and `Validation` are contained at the
//! smallest unit of work (chunk, chat, health probe), `NotFound` surfaces
//! to the caller immediately, and `Persistence` fails the whole cycle
//! because dedup state can no longer be trusted.

use thiserror::Error;

/// A recoverable or fatal failure inside the scan pipeline.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Network or timeout failure talking to an external capability.
    /// Retryable on the next cycle, never retried within the same unit.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Malformed external response or an invalid request (missing fields,
    /// out-of-enum values, overlapping scan). The offending unit is
    /// discarded, not retried.
    #[error("validation failure: {0}")]
    Validation(String),

    /// A referenced entity does not exist. Caller-level contract violation.
    #[error("not found: {0}")]
    NotFound(String),

    /// The local state store is unavailable or rejected a write.
    /// Escalates to cycle-level failure.
    #[error("state store failure: {0}")]
    Persistence(String),
}

impl ScanError {
    /// Whether this error must abort the whole scan cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ScanError::Persistence(_))
    }

    /// Map a storage-layer error into the taxonomy.
    pub(crate) fn storage(err: impl std::fmt::Display) -> Self {
        ScanError::Persistence(err.to_string())
    }
}

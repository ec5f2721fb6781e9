//! Error types for the job ledger

use mci_storage::StorageError;
use std::fmt;

/// Job ledger errors
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Underlying storage read failed
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// No job stored under this id
    #[error("job not found: {0}")]
    NotFound(String),
}

/// Classifies a step failure as a cancellation or a real failure
///
/// The default implementation matches the textual abort signature
/// (`aborted`, `AbortError`, `cancelled`). Error types that carry an explicit
/// cancellation variant should override it.
pub trait AbortSignature: fmt::Display {
    /// Whether this failure means the step was cancelled
    fn is_abort(&self) -> bool {
        looks_like_abort(&self.to_string())
    }
}

impl AbortSignature for String {}

impl AbortSignature for &str {}

/// Check a message for an abort signature
#[must_use]
pub fn looks_like_abort(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    ["aborted", "aborterror", "cancelled", "canceled"]
        .iter()
        .any(|needle| lower.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_signature_matches_known_phrases() {
        assert!(looks_like_abort("The operation was aborted"));
        assert!(looks_like_abort("AbortError: signal"));
        assert!(looks_like_abort("CANCELLED: user stop"));
        assert!(!looks_like_abort("rate limit exceeded"));
    }

    #[test]
    fn string_uses_default_classifier() {
        assert!("Plan Cancelled".to_string().is_abort());
        assert!(!"boom".is_abort());
    }
}

//! Degraded-durability results
//!
//! A write that loses the race against the write timeout, or that the backend
//! rejects, does not fail the operation. The caller gets the value it asked
//! for plus a flag saying the copy on disk may be stale or missing.

use std::fmt;

/// Why a write was not confirmed durable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DegradedReason {
    /// Timeout won the race; the write may still land later
    TimedOut { timeout_ms: u64 },
    /// Backend or encoding failure
    Failed(String),
}

impl fmt::Display for DegradedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimedOut { timeout_ms } => write!(f, "write timed out after {timeout_ms}ms"),
            Self::Failed(reason) => write!(f, "write failed: {reason}"),
        }
    }
}

/// Outcome of a single best-effort write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Backend confirmed the write
    Durable,
    /// Write unconfirmed; continue with the in-memory value
    Degraded(DegradedReason),
}

impl WriteOutcome {
    /// Check if the backend confirmed the write
    #[inline]
    #[must_use]
    pub fn is_durable(&self) -> bool {
        matches!(self, Self::Durable)
    }

    /// Attach the value the write was for
    #[inline]
    pub fn with_value<T>(self, value: T) -> Persisted<T> {
        match self {
            Self::Durable => Persisted::Durable(value),
            Self::Degraded(reason) => Persisted::Degraded { value, reason },
        }
    }
}

/// A value plus the durability of its last write
#[derive(Debug, Clone, PartialEq)]
pub enum Persisted<T> {
    /// Value is safely stored
    Durable(T),
    /// Value is held in memory; storage may not reflect it
    Degraded { value: T, reason: DegradedReason },
}

impl<T> Persisted<T> {
    /// Borrow the value regardless of durability
    #[inline]
    pub fn value(&self) -> &T {
        match self {
            Self::Durable(value) | Self::Degraded { value, .. } => value,
        }
    }

    /// Take the value regardless of durability
    #[inline]
    pub fn into_value(self) -> T {
        match self {
            Self::Durable(value) | Self::Degraded { value, .. } => value,
        }
    }

    /// Check if the last write was confirmed
    #[inline]
    pub fn is_durable(&self) -> bool {
        matches!(self, Self::Durable(_))
    }

    /// Reason the value is not durable, if any
    #[inline]
    pub fn degraded_reason(&self) -> Option<&DegradedReason> {
        match self {
            Self::Durable(_) => None,
            Self::Degraded { reason, .. } => Some(reason),
        }
    }

    /// Transform the value, keeping the durability flag
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Persisted<U> {
        match self {
            Self::Durable(value) => Persisted::Durable(f(value)),
            Self::Degraded { value, reason } => Persisted::Degraded {
                value: f(value),
                reason,
            },
        }
    }
}

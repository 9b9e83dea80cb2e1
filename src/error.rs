//! # Error Handling
//!
//! A single error enum ([`Error`]) represents every failure mode the core can
//! surface, which keeps the API simple for callers: read-path errors propagate
//! synchronously, while write-pipeline failures are logged and never reach the
//! `put` caller (the call has already returned by then).
//!
//! ## Error Categories
//!
//! | Category | Variants | Typical Response |
//! |----------|----------|------------------|
//! | Backend | `Backend`, `Decode` | Log and investigate; builds downgrade to no-op |
//! | Capacity | `BatchTooLarge` | Lower `group_max_size` below the backend ceiling |
//! | Lifecycle | `Closed` | Stop submitting; the store has shut down |

use thiserror::Error;

/// All errors that can occur in store core operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The backend rejected or failed an operation.
    ///
    /// Wraps whatever the backend collaborator reports: a failed query, a
    /// rejected batch transaction, a lost connection. Inside the write
    /// pipeline this is recovered locally (the build downgrades to a no-op,
    /// a failed batch is dropped); on the read path it propagates to the
    /// caller.
    #[error("backend error: {0}")]
    Backend(String),

    /// A backend row could not be decoded into a value.
    ///
    /// Decoding is the backend collaborator's responsibility; this variant
    /// exists so implementations can distinguish corrupt rows from transport
    /// failures.
    #[error("decode error: {0}")]
    Decode(String),

    /// A sealed batch exceeds the backend's transactional payload ceiling.
    ///
    /// Backends must reject an oversized batch outright rather than apply it
    /// partially. Seeing this in practice means `group_max_size` is
    /// configured above what the backend accepts.
    #[error("batch of {size} operations exceeds backend limit of {limit}")]
    BatchTooLarge {
        /// Number of operations in the rejected batch
        size: usize,
        /// The backend's ceiling
        limit: usize,
    },

    /// The store core has shut down and no longer accepts requests.
    #[error("store core has shut down")]
    Closed,
}

/// A `Result` type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    /// Error messages appear in logs; keep them readable.
    #[test]
    fn test_error_display() {
        let backend = Error::Backend("connection reset".to_string());
        assert_eq!(backend.to_string(), "backend error: connection reset");

        let too_large = Error::BatchTooLarge { size: 64, limit: 30 };
        assert_eq!(
            too_large.to_string(),
            "batch of 64 operations exceeds backend limit of 30"
        );

        assert_eq!(Error::Closed.to_string(), "store core has shut down");
    }
}

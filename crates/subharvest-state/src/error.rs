//! Cursor store error types.

/// Errors produced by [`CursorStore`](crate::CursorStore) operations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// File-system I/O failure (reading or writing a cursor file).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal lock was poisoned by a panicked thread.
    #[error("cursor store lock poisoned")]
    LockPoisoned,
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, StateError>;

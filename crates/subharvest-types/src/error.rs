//! Extraction error taxonomy.
//!
//! [`ExtractError`] classifies every failure a task can hit. The
//! `is_retryable` flag drives the per-request retry loop; rate-limit
//! rejections are deliberately *not* retryable there; the adaptive limiter
//! handles them through pacing instead.

use std::time::Duration;

use crate::ids::{Endpoint, QueryKind};

/// Error produced while extracting one (endpoint, kind) pair.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// No query template exists for this (kind, endpoint) pair.
    #[error("no query defined for {kind} on endpoint {endpoint}")]
    QueryNotFound { kind: QueryKind, endpoint: Endpoint },

    /// Network, timeout, or server-side failure.
    #[error("graphql request failed: {message}")]
    Transport { message: String, retryable: bool },

    /// The gateway rejected the request with a rate-limit status.
    #[error("rate limited by gateway")]
    RateLimited { retry_after: Option<Duration> },

    /// The reply carried no `data` tree at all.
    #[error("response has no data tree")]
    MissingData,

    /// A record could not be handed to the event sink.
    #[error("publish failed for record {key}: {message}")]
    Publish { key: String, message: String },

    /// The cooperative cancellation signal fired.
    #[error("extraction cancelled")]
    Cancelled,
}

impl ExtractError {
    /// Whether the per-request retry loop should try this request again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { retryable, .. } => *retryable,
            Self::MissingData => true,
            Self::QueryNotFound { .. }
            | Self::RateLimited { .. }
            | Self::Publish { .. }
            | Self::Cancelled => false,
        }
    }

    /// Convenience constructor for retryable transport failures.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Convenience constructor for permanent transport failures.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }
}

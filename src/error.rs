//! Coordinator error taxonomy.
//!
//! Every failure path in the pipeline resolves to one of these categories so
//! call sites can match on *kind* instead of inspecting message strings. See
//! the error handling design notes for the retry/fatal discipline attached
//! to each variant.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// RPC connect/read failure. Callers retry with escalating `fail_pause`;
    /// exceeding `opt_retries` promotes this to a fatal shutdown.
    #[error("transport error talking to pool {pool_no}: {source}")]
    Transport {
        pool_no: u32,
        #[source]
        source: reqwest::Error,
    },

    /// Malformed JSON, a missing field, or a non-hex payload. Logged and the
    /// single request fails; it does not cascade into a fatal shutdown.
    #[error("protocol error: {detail}")]
    Protocol { detail: String },

    /// A unit no longer matches the current block, or its age exceeds
    /// scantime.
    #[error("stale work")]
    Stale,

    /// The scanner reported a nonce that fails `fulltest`.
    #[error("hardware error: {detail}")]
    Hardware { detail: String },

    /// A hasher has not reported liveness within the watchdog's window.
    #[error("device {hasher_id} stopped reporting")]
    DeviceHang { hasher_id: u32 },

    /// Unrecoverable: allocation failure, no pools reachable at startup,
    /// transport client construction failure. Logged and the process exits
    /// with status 1.
    #[error("fatal: {detail}")]
    Fatal { detail: String },
}

impl CoordinatorError {
    pub fn protocol(detail: impl Into<String>) -> Self {
        CoordinatorError::Protocol { detail: detail.into() }
    }

    pub fn fatal(detail: impl Into<String>) -> Self {
        CoordinatorError::Fatal { detail: detail.into() }
    }

    /// Whether this error should translate into a fatal shutdown, per §7.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoordinatorError::Fatal { .. })
    }
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;

//! Error types for the forwarder.

use thiserror::Error;

/// Forwarder errors.
///
/// Only startup failures surface through this type. Per-connection dial
/// and copy failures are logged where they happen and never cross into
/// another connection.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// Endpoint string could not be parsed.
    #[error("invalid endpoint {input:?}: {reason}")]
    InvalidEndpoint { input: String, reason: &'static str },

    /// Listening socket could not be bound.
    #[error("failed to bind {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ForwardError {
    pub(crate) fn invalid_endpoint(input: &str, reason: &'static str) -> Self {
        Self::InvalidEndpoint {
            input: input.to_string(),
            reason,
        }
    }
}

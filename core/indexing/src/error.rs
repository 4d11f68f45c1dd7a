use thiserror::Error;

/// Failures of the remote oracles (analysis and embedding) that callers
/// treat as per-item, non-fatal errors.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("{service} API error (status {status}): {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("empty embedding returned from {0}")]
    EmptyEmbedding(&'static str),

    #[error("{service} returned malformed output: {reason}")]
    Malformed {
        service: &'static str,
        reason: String,
    },
}

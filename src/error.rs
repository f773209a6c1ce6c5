use thiserror::Error;

use crate::codec::DecodeError;
use crate::job::JobState;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the client, the claim loop, and the storage adapters.
///
/// Handler failures never show up here: they only drive the retry and
/// dead-letter policy of the dispatcher.
#[derive(Debug, Error)]
pub enum Error {
    #[error("storage error: {0}")]
    Storage(#[from] redis::RedisError),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("invalid store url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("job {0} not found")]
    JobNotFound(u64),
    #[error("invalid job state: {0}")]
    InvalidState(JobState),
    /// The hash stored under `key` could not be turned back into a job.
    #[error("corrupt job at {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: DecodeError,
    },
    #[error("payload serialization failed: {0}")]
    Payload(#[from] serde_json::Error),
}

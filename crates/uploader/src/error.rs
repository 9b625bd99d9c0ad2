//! Upload error types.

use filedrop_transfer::TransferError;

/// Errors produced by an upload.
///
/// [`UploadError::Cancelled`] never reaches callers of
/// [`UploadHandle::result`](crate::UploadHandle::result): an aborted upload
/// settles as [`UploadOutcome::Cancelled`](crate::UploadOutcome::Cancelled).
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("hashing failed: {0}")]
    Hash(String),

    #[error("reading source failed: {0}")]
    Source(String),

    #[error("chunk {index} failed after {attempts} attempt(s): {message}")]
    ChunkTransfer {
        index: u32,
        attempts: u8,
        message: String,
    },

    #[error("chunk {0} was not acknowledged")]
    NotAcknowledged(u32),

    #[error("merge failed after {attempts} attempt(s): {message}")]
    Merge { attempts: u32, message: String },

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("cancelled")]
    Cancelled,
}

impl UploadError {
    /// Returns `true` for transient failures worth another attempt.
    ///
    /// Server errors, timeouts, throttling and dropped connections are
    /// retryable; other 4xx responses and local failures are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            UploadError::Network(_) | UploadError::Timeout | UploadError::NotAcknowledged(_) => {
                true
            }
            UploadError::Http { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            _ => false,
        }
    }

    /// Returns `true` if this error is the cancellation signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, UploadError::Cancelled)
    }

    /// Maps a failure of the hashing pass.
    pub(crate) fn from_hashing(err: TransferError) -> Self {
        match err {
            TransferError::Cancelled => UploadError::Cancelled,
            other => UploadError::Hash(other.to_string()),
        }
    }
}

impl From<TransferError> for UploadError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::Cancelled => UploadError::Cancelled,
            TransferError::InvalidName(_)
            | TransferError::TooLarge { .. }
            | TransferError::KindNotAllowed(_) => UploadError::Validation(err.to_string()),
            TransferError::Io(_) | TransferError::SourceChanged { .. } => {
                UploadError::Source(err.to_string())
            }
        }
    }
}

impl From<reqwest::Error> for UploadError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            UploadError::Timeout
        } else if err.is_decode() {
            UploadError::Protocol(err.to_string())
        } else {
            UploadError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for UploadError {
    fn from(err: serde_json::Error) -> Self {
        UploadError::Protocol(err.to_string())
    }
}

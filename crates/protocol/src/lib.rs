//! Wire types for the filedrop chunked upload protocol.
//!
//! The storage service exposes four operations: init (dedup check and
//! resume state), chunk put, merge, and status. Everything on the wire is
//! camelCase JSON except chunk bodies, which are raw bytes.

pub mod constants;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use messages::{
    ChunkAck, InitUploadRequest, InitUploadResponse, MergeRequest, StatusResponse,
};
pub use types::{ContentHash, FileDescriptor, FileKind};

/// Errors produced when decoding protocol values.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid content hash: {0}")]
    InvalidHash(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

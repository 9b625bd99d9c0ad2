//! Local side of a filedrop upload: byte sources, content hashing,
//! chunk planning and pre-flight validation.
//!
//! Nothing in this crate touches the network.

mod format;
mod hash;
mod kind;
mod plan;
mod source;
mod validation;

pub use format::format_size;
pub use hash::{DEFAULT_HASH_WINDOW, HashCalculator, MAX_HASH_WINDOW, MIN_HASH_WINDOW, hash_bytes};
pub use kind::{classify, content_type_for_name};
pub use plan::{Chunk, ChunkPlan, ChunkStatus, PlanConfig, plan};
pub use source::{ByteSource, FileSource, MemorySource, ReadFuture};
pub use validation::{UploadLimits, validate_file_name, validate_upload};

/// Default chunk size: 5 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Files at or below this size are sent in a single request: 10 MiB.
pub const DEFAULT_CHUNK_THRESHOLD: u64 = 10 * 1024 * 1024;

/// Largest file accepted for upload: 100 MiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("source changed while reading: expected {expected} bytes at offset {offset}, got {actual}")]
    SourceChanged {
        offset: u64,
        expected: u64,
        actual: u64,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("invalid file name: {0}")]
    InvalidName(String),

    #[error("file too large: {size} exceeds the {limit} limit")]
    TooLarge { size: String, limit: String },

    #[error("file type not allowed: {0}")]
    KindNotAllowed(filedrop_protocol::FileKind),
}

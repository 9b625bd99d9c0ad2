//! Resumable, content-addressed chunked uploads.
//!
//! This crate implements the **client side** of a filedrop upload. It has
//! no UI dependencies: applications call [`start_upload`] (or go through an
//! [`UploadManager`]) and consume the returned [`UploadHandle`].
//!
//! # Pipeline
//!
//! 1. **Validate**: name, size ceiling and file kind, before any network call
//! 2. **Hash**: stream the source through MD5 in bounded windows
//! 3. **Init**: dedup check; the server may already hold the content, or
//!    report which chunks of an earlier attempt it kept
//! 4. **Transfer**: single request for small files, otherwise a bounded
//!    pool of concurrent chunk uploads with retry and backoff
//! 5. **Merge**: finalize once every chunk is acknowledged

pub mod config;
pub mod error;
pub mod http;
pub mod manager;
pub mod progress;
pub mod scheduler;
pub mod session;
pub mod task;

#[cfg(test)]
mod testing;

// Re-export primary types for convenience.
pub use config::{RetryPolicy, UploadConfig};
pub use error::UploadError;
pub use http::HttpSession;
pub use manager::{UploadManager, UploadSummary};
pub use progress::{ProgressAggregator, ProgressEvent, Stage};
pub use scheduler::TransferScheduler;
pub use session::{SessionFuture, UploadSession};
pub use task::{TaskState, UploadHandle, UploadOutcome, UploadRequest, UploadTask, start_upload};

pub use filedrop_protocol::{ContentHash, FileDescriptor, FileKind};
pub use filedrop_transfer::{ByteSource, FileSource, MemorySource, format_size};

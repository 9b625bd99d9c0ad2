//! Remote side of an upload.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use filedrop_protocol::{
    ChunkAck, FileDescriptor, InitUploadRequest, InitUploadResponse, MergeRequest, StatusResponse,
};
use tokio_util::sync::CancellationToken;

use crate::error::UploadError;

/// Future returned by [`UploadSession`] calls.
pub type SessionFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, UploadError>> + Send + 'a>>;

/// The four remote operations of the upload protocol.
///
/// Implemented over HTTP by [`HttpSession`](crate::HttpSession); tests
/// plug in scripted backends.
pub trait UploadSession: Send + Sync {
    /// Dedup check; opens or resumes an upload.
    fn init<'a>(&'a self, request: &'a InitUploadRequest) -> SessionFuture<'a, InitUploadResponse>;

    /// Uploads one chunk body.
    fn put_chunk<'a>(
        &'a self,
        upload_id: &'a str,
        index: u32,
        data: Bytes,
    ) -> SessionFuture<'a, ChunkAck>;

    /// Assembles all chunks into the final file.
    fn merge<'a>(&'a self, request: &'a MergeRequest) -> SessionFuture<'a, FileDescriptor>;

    /// Reports which chunks the server currently holds.
    fn status<'a>(&'a self, upload_id: &'a str) -> SessionFuture<'a, StatusResponse>;
}

/// Runs `fut` under a deadline, giving up early if `cancel` fires.
pub(crate) async fn with_deadline<T, F>(
    cancel: &CancellationToken,
    timeout: Duration,
    fut: F,
) -> Result<T, UploadError>
where
    F: Future<Output = Result<T, UploadError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(UploadError::Cancelled),
        result = tokio::time::timeout(timeout, fut) => result.unwrap_or(Err(UploadError::Timeout)),
    }
}

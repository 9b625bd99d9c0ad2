//! In-memory storage backend shared by the uploader tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use filedrop_protocol::{
    ChunkAck, ContentHash, FileDescriptor, InitUploadRequest, InitUploadResponse, MergeRequest,
    StatusResponse,
};
use filedrop_transfer::hash_bytes;

use crate::error::UploadError;
use crate::progress::ProgressEvent;
use crate::session::{SessionFuture, UploadSession};

/// A remote call observed by [`MockBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Call {
    Init,
    Put(u32),
    Merge,
    Status,
}

struct PendingUpload {
    request: InitUploadRequest,
    chunks: BTreeMap<u32, Bytes>,
}

/// Content-addressed store speaking the upload protocol in memory.
///
/// Merge reassembles the chunks and checks them against the declared
/// digest, so a test passes only if every byte arrived at the right index.
#[derive(Default)]
pub(crate) struct MockBackend {
    calls: Mutex<Vec<Call>>,
    stored: Mutex<HashMap<ContentHash, FileDescriptor>>,
    pending: Mutex<HashMap<String, PendingUpload>>,
    merged: Mutex<HashMap<String, FileDescriptor>>,
    next_id: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    put_failures: Mutex<HashMap<u32, (usize, u16)>>,
    merge_failures: Mutex<VecDeque<u16>>,
    lost_chunks: Mutex<(Vec<u32>, usize)>,
    finalize_single: bool,
    hang_init: bool,
    hang_on: Option<u32>,
    put_delay: Duration,
}

impl MockBackend {
    /// Single-shot puts finalize the upload themselves.
    pub fn finalizing_single(mut self) -> Self {
        self.finalize_single = true;
        self
    }

    /// Init calls never complete.
    pub fn hanging_init(mut self) -> Self {
        self.hang_init = true;
        self
    }

    /// Puts of `index` never complete.
    pub fn hanging_on(mut self, index: u32) -> Self {
        self.hang_on = Some(index);
        self
    }

    /// Every put takes `delay`.
    pub fn with_put_delay(mut self, delay: Duration) -> Self {
        self.put_delay = delay;
        self
    }

    /// The next `times` puts of `index` fail with `status`.
    pub fn fail_put(self, index: u32, times: usize, status: u16) -> Self {
        self.put_failures
            .lock()
            .unwrap()
            .insert(index, (times, status));
        self
    }

    /// The next merges fail with these statuses, in order.
    pub fn fail_merge(self, statuses: &[u16]) -> Self {
        self.merge_failures
            .lock()
            .unwrap()
            .extend(statuses.iter().copied());
        self
    }

    /// The next `checks` status calls first drop `indices` from storage.
    pub fn lose_on_status(self, indices: &[u32], checks: usize) -> Self {
        *self.lost_chunks.lock().unwrap() = (indices.to_vec(), checks);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn count(&self, call: Call) -> usize {
        self.calls().iter().filter(|&&c| c == call).count()
    }

    pub fn puts(&self) -> Vec<u32> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Put(index) => Some(index),
                _ => None,
            })
            .collect()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn finalize(&self, upload_id: &str) -> Result<FileDescriptor, UploadError> {
        if let Some(file) = self.merged.lock().unwrap().get(upload_id) {
            return Ok(file.clone());
        }

        let upload = self
            .pending
            .lock()
            .unwrap()
            .remove(upload_id)
            .ok_or(UploadError::Http {
                status: 404,
                body: format!("unknown upload {upload_id}"),
            })?;

        let total = upload.request.total_chunks;
        if (0..total).any(|i| !upload.chunks.contains_key(&i)) {
            let have = upload.chunks.len();
            self.pending
                .lock()
                .unwrap()
                .insert(upload_id.to_string(), upload);
            return Err(UploadError::Http {
                status: 409,
                body: format!("{have} of {total} chunks present"),
            });
        }

        let data: Vec<u8> = upload.chunks.values().flat_map(|c| c.iter().copied()).collect();
        if hash_bytes(&data) != upload.request.content_hash
            || data.len() as u64 != upload.request.file_size
        {
            return Err(UploadError::Http {
                status: 422,
                body: "content does not match declared hash".into(),
            });
        }

        let file = FileDescriptor {
            access_url: format!("https://cdn.test/{}", upload.request.content_hash),
            thumbnail_url: None,
            file_name: upload.request.file_name.clone(),
            file_size: upload.request.file_size,
            file_type: "application/octet-stream".into(),
        };
        self.stored
            .lock()
            .unwrap()
            .insert(upload.request.content_hash, file.clone());
        self.merged
            .lock()
            .unwrap()
            .insert(upload_id.to_string(), file.clone());
        Ok(file)
    }
}

impl UploadSession for MockBackend {
    fn init<'a>(&'a self, request: &'a InitUploadRequest) -> SessionFuture<'a, InitUploadResponse> {
        Box::pin(async move {
            self.record(Call::Init);
            if self.hang_init {
                std::future::pending::<()>().await;
            }

            if let Some(file) = self.stored.lock().unwrap().get(&request.content_hash) {
                return Ok(InitUploadResponse {
                    upload_id: String::new(),
                    already_exists: true,
                    access_url: Some(file.access_url.clone()),
                    thumbnail_url: file.thumbnail_url.clone(),
                    file_type: Some(file.file_type.clone()),
                    acknowledged_chunks: Vec::new(),
                });
            }

            let mut pending = self.pending.lock().unwrap();
            let existing = pending.iter().find(|(_, u)| {
                u.request.content_hash == request.content_hash
                    && u.request.chunk_size == request.chunk_size
            });
            if let Some((id, upload)) = existing {
                return Ok(InitUploadResponse {
                    upload_id: id.clone(),
                    already_exists: false,
                    access_url: None,
                    thumbnail_url: None,
                    file_type: None,
                    acknowledged_chunks: upload.chunks.keys().copied().collect(),
                });
            }

            let id = format!("up-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
            pending.insert(
                id.clone(),
                PendingUpload {
                    request: request.clone(),
                    chunks: BTreeMap::new(),
                },
            );
            Ok(InitUploadResponse {
                upload_id: id,
                already_exists: false,
                access_url: None,
                thumbnail_url: None,
                file_type: None,
                acknowledged_chunks: Vec::new(),
            })
        })
    }

    fn put_chunk<'a>(
        &'a self,
        upload_id: &'a str,
        index: u32,
        data: Bytes,
    ) -> SessionFuture<'a, ChunkAck> {
        Box::pin(async move {
            self.record(Call::Put(index));
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            if self.hang_on == Some(index) {
                std::future::pending::<()>().await;
            }
            tokio::time::sleep(self.put_delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let failure = {
                let mut failures = self.put_failures.lock().unwrap();
                match failures.get_mut(&index) {
                    Some((left, status)) if *left > 0 => {
                        *left -= 1;
                        Some(*status)
                    }
                    _ => None,
                }
            };
            if let Some(status) = failure {
                return Err(UploadError::Http {
                    status,
                    body: "scripted failure".into(),
                });
            }

            if self.merged.lock().unwrap().contains_key(upload_id) {
                return Ok(ChunkAck {
                    acked: true,
                    file: None,
                });
            }

            let single = {
                let mut pending = self.pending.lock().unwrap();
                let upload = pending.get_mut(upload_id).ok_or(UploadError::Http {
                    status: 404,
                    body: format!("unknown upload {upload_id}"),
                })?;
                upload.chunks.insert(index, data);
                upload.request.total_chunks == 1
            };

            let file = if self.finalize_single && single {
                Some(self.finalize(upload_id)?)
            } else {
                None
            };
            Ok(ChunkAck { acked: true, file })
        })
    }

    fn merge<'a>(&'a self, request: &'a MergeRequest) -> SessionFuture<'a, FileDescriptor> {
        Box::pin(async move {
            self.record(Call::Merge);
            if let Some(status) = self.merge_failures.lock().unwrap().pop_front() {
                return Err(UploadError::Http {
                    status,
                    body: "scripted failure".into(),
                });
            }
            self.finalize(&request.upload_id)
        })
    }

    fn status<'a>(&'a self, upload_id: &'a str) -> SessionFuture<'a, StatusResponse> {
        Box::pin(async move {
            self.record(Call::Status);
            let mut pending = self.pending.lock().unwrap();
            let upload = pending.get_mut(upload_id).ok_or(UploadError::Http {
                status: 404,
                body: format!("unknown upload {upload_id}"),
            })?;

            let mut lost = self.lost_chunks.lock().unwrap();
            if lost.1 > 0 {
                lost.1 -= 1;
                for index in &lost.0 {
                    upload.chunks.remove(index);
                }
            }

            Ok(StatusResponse {
                upload_id: upload_id.to_string(),
                acknowledged_chunks: upload.chunks.keys().copied().collect(),
            })
        })
    }
}

/// Deterministic test payload.
pub(crate) fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Everything buffered on a progress receiver.
pub(crate) fn drain(rx: &mut tokio::sync::mpsc::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

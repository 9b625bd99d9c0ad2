//! Registry of running uploads.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use filedrop_transfer::ByteSource;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::UploadConfig;
use crate::error::UploadError;
use crate::progress::ProgressEvent;
use crate::session::UploadSession;
use crate::task::{UploadHandle, UploadRequest, start_upload};

/// Snapshot of one running upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSummary {
    pub id: String,
    pub file_name: String,
    pub progress: ProgressEvent,
}

struct ActiveUpload {
    file_name: String,
    cancel: CancellationToken,
    latest: watch::Receiver<ProgressEvent>,
}

impl ActiveUpload {
    fn summary(&self, id: &str) -> UploadSummary {
        UploadSummary {
            id: id.to_string(),
            file_name: self.file_name.clone(),
            progress: self.latest.borrow().clone(),
        }
    }
}

type Registry = Arc<Mutex<HashMap<String, ActiveUpload>>>;

/// Starts uploads against one session and tracks them until they settle.
///
/// Uploads leave the registry on their own once they reach a terminal
/// state; nothing has to be unregistered by hand.
pub struct UploadManager {
    session: Arc<dyn UploadSession>,
    config: UploadConfig,
    uploads: Registry,
}

impl UploadManager {
    /// Creates a manager; `config` applies to every upload it starts.
    pub fn new(session: Arc<dyn UploadSession>, config: UploadConfig) -> Self {
        Self {
            session,
            config,
            uploads: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Starts an upload with the manager's configuration.
    pub fn start(
        &self,
        source: Arc<dyn ByteSource>,
        request: UploadRequest,
    ) -> Result<UploadHandle, UploadError> {
        self.start_with_config(source, request, self.config.clone())
    }

    /// Starts an upload with its own configuration.
    pub fn start_with_config(
        &self,
        source: Arc<dyn ByteSource>,
        request: UploadRequest,
        config: UploadConfig,
    ) -> Result<UploadHandle, UploadError> {
        let handle = start_upload(source, Arc::clone(&self.session), request, config)?;
        let id = handle.id().to_string();
        let mut latest = handle.subscribe();

        lock(&self.uploads).insert(
            id.clone(),
            ActiveUpload {
                file_name: handle.file_name().to_string(),
                cancel: handle.cancel_token(),
                latest: latest.clone(),
            },
        );
        info!(task = %id, file = %handle.file_name(), "upload registered");

        let uploads = Arc::clone(&self.uploads);
        tokio::spawn(async move {
            loop {
                if latest.borrow_and_update().stage.is_terminal() {
                    break;
                }
                if latest.changed().await.is_err() {
                    break;
                }
            }
            lock(&uploads).remove(&id);
            debug!(task = %id, "upload settled; unregistered");
        });

        Ok(handle)
    }

    /// Snapshots every running upload, ordered by id.
    pub fn list(&self) -> Vec<UploadSummary> {
        let uploads = lock(&self.uploads);
        let mut list: Vec<_> = uploads
            .iter()
            .map(|(id, upload)| upload.summary(id))
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    /// Snapshot of one upload, if it is still running.
    pub fn get(&self, id: &str) -> Option<UploadSummary> {
        lock(&self.uploads).get(id).map(|upload| upload.summary(id))
    }

    /// Aborts one upload. Returns `false` if no such upload is running.
    pub fn cancel(&self, id: &str) -> bool {
        match lock(&self.uploads).get(id) {
            Some(upload) => {
                info!(task = %id, "cancelling upload");
                upload.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Aborts every running upload and returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let uploads = lock(&self.uploads);
        for upload in uploads.values() {
            upload.cancel.cancel();
        }
        if !uploads.is_empty() {
            info!(count = uploads.len(), "cancelling all uploads");
        }
        uploads.len()
    }

    /// Number of running uploads.
    pub fn len(&self) -> usize {
        lock(&self.uploads).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.uploads).is_empty()
    }
}

fn lock(uploads: &Registry) -> MutexGuard<'_, HashMap<String, ActiveUpload>> {
    uploads.lock().unwrap_or_else(PoisonError::into_inner)
}

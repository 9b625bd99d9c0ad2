//! One upload, from hashing to merge.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use filedrop_protocol::{
    ChunkAck, ContentHash, FileDescriptor, FileKind, InitUploadRequest, MergeRequest,
};
use filedrop_transfer::{
    ByteSource, ChunkPlan, ChunkStatus, HashCalculator, classify, content_type_for_name, plan,
    validate_upload,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::UploadConfig;
use crate::error::UploadError;
use crate::progress::{ProgressAggregator, ProgressEvent};
use crate::scheduler::{TransferScheduler, send_chunk};
use crate::session::{UploadSession, with_deadline};

/// Business context of an upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadRequest {
    /// Business category the file belongs to (e.g. `"avatar"`, `"chat"`).
    pub biz_type: String,
    /// Owning entity within the category; may be empty.
    pub biz_id: String,
    /// Overrides the source's own file name.
    pub file_name: Option<String>,
    /// Overrides the source's declared MIME type.
    pub content_type: Option<String>,
}

impl UploadRequest {
    pub fn new(biz_type: impl Into<String>) -> Self {
        Self {
            biz_type: biz_type.into(),
            ..Default::default()
        }
    }

    pub fn with_biz_id(mut self, biz_id: impl Into<String>) -> Self {
        self.biz_id = biz_id.into();
        self
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Lifecycle of an [`UploadTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Created,
    Hashing,
    /// The server already held the content.
    Deduped,
    Transferring,
    Merging,
    Done,
    Failed,
    Aborted,
}

impl TaskState {
    /// Returns `true` for states with no way out.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Done | TaskState::Failed | TaskState::Aborted)
    }

    /// Returns `true` if the state machine allows moving to `next`.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        match (self, next) {
            (Created, Hashing) => true,
            (Hashing, Deduped | Transferring) => true,
            (Deduped, Done) => true,
            // Done directly when a single-shot put finalizes the upload.
            (Transferring, Merging | Done) => true,
            (Merging, Done) => true,
            (state, Failed | Aborted) => !state.is_terminal(),
            _ => false,
        }
    }
}

/// How an upload settled.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    /// Stored (or found already stored); the descriptor points at it.
    Completed(FileDescriptor),
    /// Aborted by the caller before completion.
    Cancelled,
}

impl UploadOutcome {
    /// The stored file, if the upload completed.
    pub fn file(&self) -> Option<&FileDescriptor> {
        match self {
            UploadOutcome::Completed(file) => Some(file),
            UploadOutcome::Cancelled => None,
        }
    }
}

/// State machine driving one file through validate, hash, init, transfer
/// and merge.
///
/// Validation happens in [`UploadTask::new`], so a rejected file never
/// produces a network call.
pub struct UploadTask {
    id: String,
    source: Arc<dyn ByteSource>,
    session: Arc<dyn UploadSession>,
    request: UploadRequest,
    config: UploadConfig,
    file_name: String,
    content_type: String,
    kind: FileKind,
    plan: ChunkPlan,
    state: TaskState,
    content_hash: Option<ContentHash>,
    upload_id: Option<String>,
    cancel: CancellationToken,
    progress: ProgressAggregator,
}

impl UploadTask {
    /// Validates the upload and plans its chunks.
    pub fn new(
        source: Arc<dyn ByteSource>,
        session: Arc<dyn UploadSession>,
        request: UploadRequest,
        config: UploadConfig,
        progress: ProgressAggregator,
    ) -> Result<Self, UploadError> {
        config.validate()?;

        if request.biz_type.trim().is_empty() {
            return Err(UploadError::Validation("biz_type is required".into()));
        }

        let file_name = request
            .file_name
            .clone()
            .unwrap_or_else(|| source.name().to_string());
        let content_type = request
            .content_type
            .clone()
            .or_else(|| source.content_type().map(str::to_string))
            .unwrap_or_else(|| content_type_for_name(&file_name));
        let kind = classify(Some(&content_type), &file_name);

        validate_upload(&file_name, source.size(), kind, &config.limits())?;

        let plan = plan(source.size(), &config.plan_config());

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            source,
            session,
            request,
            config,
            file_name,
            content_type,
            kind,
            plan,
            state: TaskState::Created,
            content_hash: None,
            upload_id: None,
            cancel: CancellationToken::new(),
            progress,
        })
    }

    /// Local task id (not the server's upload id).
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn plan(&self) -> &ChunkPlan {
        &self.plan
    }

    /// Digest of the source, once hashing finished.
    pub fn content_hash(&self) -> Option<ContentHash> {
        self.content_hash
    }

    /// Server-side upload id, once init returned one.
    pub fn upload_id(&self) -> Option<&str> {
        self.upload_id.as_deref()
    }

    /// Token that aborts this task when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Subscribes to the latest progress snapshot.
    pub fn subscribe(&self) -> watch::Receiver<ProgressEvent> {
        self.progress.subscribe()
    }

    /// Drives the task to a terminal state.
    ///
    /// Cancellation settles as `Ok(UploadOutcome::Cancelled)`. A task runs
    /// once; running it again returns [`UploadError::Protocol`] without
    /// touching the network.
    pub async fn run(&mut self) -> Result<UploadOutcome, UploadError> {
        if self.state != TaskState::Created {
            warn!(task = %self.id, state = ?self.state, "task already ran");
            return Err(UploadError::Protocol(format!(
                "task {} already ran (state {:?})",
                self.id, self.state
            )));
        }

        info!(
            task = %self.id,
            file = %self.file_name,
            size = self.plan.file_size,
            chunks = self.plan.total_chunks(),
            kind = %self.kind,
            "upload started"
        );

        match self.execute().await {
            Ok(file) => {
                self.transition(TaskState::Done)?;
                self.progress.done(file.access_url.clone());
                info!(task = %self.id, url = %file.access_url, "upload complete");
                Ok(UploadOutcome::Completed(file))
            }
            Err(UploadError::Cancelled) => {
                self.transition(TaskState::Aborted)?;
                self.progress.cancelled();
                info!(task = %self.id, "upload aborted");
                Ok(UploadOutcome::Cancelled)
            }
            Err(e) => {
                self.transition(TaskState::Failed)?;
                self.progress.failed(e.to_string());
                error!(task = %self.id, error = %e, "upload failed");
                Err(e)
            }
        }
    }

    async fn execute(&mut self) -> Result<FileDescriptor, UploadError> {
        self.transition(TaskState::Hashing)?;
        let hash = self.hash().await?;
        self.content_hash = Some(hash);

        let request = InitUploadRequest {
            content_hash: hash,
            file_name: self.file_name.clone(),
            file_size: self.plan.file_size,
            total_chunks: self.plan.total_chunks(),
            chunk_size: self.plan.chunk_size,
            biz_type: self.request.biz_type.clone(),
            biz_id: self.request.biz_id.clone(),
        };
        let init = with_deadline(
            &self.cancel,
            self.config.call_timeout,
            self.session.init(&request),
        )
        .await?;

        if init.already_exists {
            self.transition(TaskState::Deduped)?;
            let access_url = init
                .access_url
                .filter(|url| !url.is_empty())
                .ok_or_else(|| UploadError::Protocol("dedup hit without an access URL".into()))?;
            info!(task = %self.id, hash = %hash, "content already stored; skipping transfer");
            return Ok(FileDescriptor {
                access_url,
                thumbnail_url: init.thumbnail_url,
                file_name: self.file_name.clone(),
                file_size: self.plan.file_size,
                file_type: init
                    .file_type
                    .unwrap_or_else(|| self.content_type.clone()),
            });
        }

        if init.upload_id.is_empty() {
            return Err(UploadError::Protocol("init returned no upload id".into()));
        }
        let upload_id = init.upload_id;
        self.upload_id = Some(upload_id.clone());
        self.transition(TaskState::Transferring)?;

        let resumed = self.plan.mark_acked(init.acknowledged_chunks.iter().copied());
        if resumed > 0 {
            info!(
                task = %self.id,
                upload_id = %upload_id,
                resumed,
                total = self.plan.total_chunks(),
                "resuming upload"
            );
        }
        self.progress
            .uploading(self.plan.acked_count(), self.plan.total_chunks());

        if self.plan.single_shot {
            if !self.plan.is_complete() {
                let ack = self.send_single(&upload_id).await?;
                self.plan.set_status(0, ChunkStatus::Acked);
                self.progress.uploading(1, 1);
                if let Some(file) = ack.file {
                    debug!(task = %self.id, "single-shot put finalized the upload");
                    return Ok(file);
                }
            }
        } else {
            self.transfer_chunks(&upload_id).await?;
            if self.config.reconcile_before_merge {
                self.reconcile(&upload_id).await?;
            }
        }

        if !self.plan.is_complete() {
            return Err(UploadError::Protocol(format!(
                "only {} of {} chunks acknowledged",
                self.plan.acked_count(),
                self.plan.total_chunks()
            )));
        }
        if self.cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        self.transition(TaskState::Merging)?;
        self.progress.merging();
        self.merge(&upload_id).await
    }

    async fn hash(&mut self) -> Result<ContentHash, UploadError> {
        let calculator = HashCalculator::new(self.config.hash_window);
        let progress = &mut self.progress;
        calculator
            .compute(self.source.as_ref(), &self.cancel, |hashed, total| {
                progress.hashing(hashed, total)
            })
            .await
            .map_err(UploadError::from_hashing)
    }

    async fn transfer_chunks(&mut self, upload_id: &str) -> Result<(), UploadError> {
        let scheduler = TransferScheduler::new(&self.config);
        let progress = &mut self.progress;
        scheduler
            .run(
                &mut self.plan,
                Arc::clone(&self.session),
                Arc::clone(&self.source),
                upload_id,
                &self.cancel,
                |acked, total| progress.uploading(acked, total),
            )
            .await
    }

    /// Puts the whole file as chunk 0, with the chunk retry budget.
    async fn send_single(&mut self, upload_id: &str) -> Result<ChunkAck, UploadError> {
        let max_attempts = self.config.max_chunk_retries.saturating_add(1);
        let upload_id: Arc<str> = Arc::from(upload_id);

        loop {
            if self.cancel.is_cancelled() {
                return Err(UploadError::Cancelled);
            }
            self.plan.set_status(0, ChunkStatus::InFlight);
            let attempt = self.plan.record_attempt(0);

            let (_, result) = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(UploadError::Cancelled),
                outcome = send_chunk(
                    Arc::clone(&self.session),
                    Arc::clone(&self.source),
                    Arc::clone(&upload_id),
                    0,
                    0,
                    self.plan.file_size,
                    self.config.call_timeout,
                ) => outcome,
            };

            match result {
                Ok(ack) => return Ok(ack),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.config.retry.delay_for_attempt(u32::from(attempt));
                    warn!(task = %self.id, attempt, ?delay, error = %e, "upload failed; retrying");
                    self.plan.set_status(0, ChunkStatus::Pending);
                    self.backoff(delay).await?;
                }
                Err(e) => {
                    self.plan.set_status(0, ChunkStatus::Failed);
                    return Err(UploadError::ChunkTransfer {
                        index: 0,
                        attempts: attempt,
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    /// Compares the local bitmap with the server's before merging.
    ///
    /// Chunks the server lacks are sent once more; if they are still
    /// missing afterwards the upload fails without merging. A failed status call
    /// is not fatal: merge validates on its own.
    async fn reconcile(&mut self, upload_id: &str) -> Result<(), UploadError> {
        for pass in 0..2 {
            let status = match with_deadline(
                &self.cancel,
                self.config.call_timeout,
                self.session.status(upload_id),
            )
            .await
            {
                Ok(status) => status,
                Err(UploadError::Cancelled) => return Err(UploadError::Cancelled),
                Err(e) => {
                    warn!(task = %self.id, error = %e, "status check failed; merging on local state");
                    return Ok(());
                }
            };

            let held: HashSet<u32> = status.acknowledged_chunks.iter().copied().collect();
            let missing: Vec<u32> = (0..self.plan.total_chunks())
                .filter(|index| !held.contains(index))
                .collect();
            if missing.is_empty() {
                return Ok(());
            }
            if pass > 0 {
                return Err(UploadError::Protocol(format!(
                    "server still missing chunks {missing:?} after re-send"
                )));
            }

            warn!(
                task = %self.id,
                upload_id,
                ?missing,
                "server is missing chunks; re-sending"
            );
            self.plan.reconcile(held);
            self.progress
                .uploading(self.plan.acked_count(), self.plan.total_chunks());
            self.transfer_chunks(upload_id).await?;
        }
        Ok(())
    }

    async fn merge(&self, upload_id: &str) -> Result<FileDescriptor, UploadError> {
        let request = MergeRequest {
            upload_id: upload_id.to_string(),
        };
        let max_attempts = self.config.max_merge_retries.saturating_add(1);
        let mut attempt = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(UploadError::Cancelled);
            }
            attempt += 1;
            let result = with_deadline(
                &self.cancel,
                self.config.call_timeout,
                self.session.merge(&request),
            )
            .await;

            match result {
                Ok(file) => return Ok(file),
                Err(UploadError::Cancelled) => return Err(UploadError::Cancelled),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.config.retry.delay_for_attempt(attempt);
                    warn!(task = %self.id, attempt, ?delay, error = %e, "merge failed; retrying");
                    self.backoff(delay).await?;
                }
                Err(e) => {
                    return Err(UploadError::Merge {
                        attempts: attempt,
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    async fn backoff(&self, delay: Duration) -> Result<(), UploadError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(UploadError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    fn transition(&mut self, next: TaskState) -> Result<(), UploadError> {
        if !self.state.can_transition_to(next) {
            return Err(UploadError::Protocol(format!(
                "invalid state transition {:?} -> {:?}",
                self.state, next
            )));
        }
        debug!(task = %self.id, from = ?self.state, to = ?next, "state transition");
        self.state = next;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Caller's side of a running upload.
///
/// Dropping the handle does not stop the upload; call [`abort`](Self::abort).
pub struct UploadHandle {
    id: String,
    file_name: String,
    cancel: CancellationToken,
    events: Option<mpsc::Receiver<ProgressEvent>>,
    latest: watch::Receiver<ProgressEvent>,
    join: JoinHandle<Result<UploadOutcome, UploadError>>,
}

impl UploadHandle {
    /// Local task id.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Takes the progress event receiver. Returns `None` after the first call.
    pub fn progress(&mut self) -> Option<mpsc::Receiver<ProgressEvent>> {
        self.events.take()
    }

    /// Latest progress snapshot.
    pub fn latest(&self) -> ProgressEvent {
        self.latest.borrow().clone()
    }

    /// Subscribes to the latest progress snapshot.
    pub fn subscribe(&self) -> watch::Receiver<ProgressEvent> {
        self.latest.clone()
    }

    /// Requests cancellation. The upload settles as
    /// [`UploadOutcome::Cancelled`] unless it already finished.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Returns `true` once the upload has settled.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Waits for the upload to settle.
    pub async fn result(self) -> Result<UploadOutcome, UploadError> {
        match self.join.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Ok(UploadOutcome::Cancelled),
            Err(e) => Err(UploadError::Protocol(format!("upload task panicked: {e}"))),
        }
    }
}

/// Validates, then starts an upload on the current tokio runtime.
///
/// Validation and configuration errors are returned here, before anything
/// touches the network.
pub fn start_upload(
    source: Arc<dyn ByteSource>,
    session: Arc<dyn UploadSession>,
    request: UploadRequest,
    config: UploadConfig,
) -> Result<UploadHandle, UploadError> {
    let (progress, events, latest) = ProgressAggregator::channel(config.progress_buffer);
    let mut task = UploadTask::new(source, session, request, config, progress)?;

    let id = task.id().to_string();
    let file_name = task.file_name().to_string();
    let cancel = task.cancel_token();
    let join = tokio::spawn(async move { task.run().await });

    Ok(UploadHandle {
        id,
        file_name,
        cancel,
        events: Some(events),
        latest,
        join,
    })
}

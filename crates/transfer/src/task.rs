//! Transfer of one file: fetch, split, upload parts in order, commit.

use std::sync::Arc;

use bucketferry_protocol::{FailureRecord, ObjectInfo};
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Buffering, TransferConfig};
use crate::error::{FetchError, StoreError, TransferError};
use crate::part::PartUploader;
use crate::plan::{ChunkRange, plan};
use crate::source::{Source, SourceBody};
use crate::split::ChunkSplitter;
use crate::store::{MultipartSession, ObjectStore};
use crate::types::{PartRecord, TransferEvent, TransferOutcome, TransferRequest, TransferStatus};

/// Lifecycle of a [`FileTransferTask`]. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Created,
    Fetching,
    Planning,
    UploadingParts { part_index: u64 },
    Committing,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Moves a single file into the store.
///
/// Parts are uploaded strictly one after another, so part records are
/// collected in ascending index order.
pub struct FileTransferTask {
    request: TransferRequest,
    source: Arc<dyn Source>,
    store: Arc<dyn ObjectStore>,
    config: Arc<TransferConfig>,
    uploader: PartUploader,
    cancel: CancellationToken,
    events: Option<mpsc::Sender<TransferEvent>>,
    state: TaskState,
    total: Option<u64>,
    transferred: u64,
    parts_sent: u64,
}

impl FileTransferTask {
    pub fn new(
        request: TransferRequest,
        source: Arc<dyn Source>,
        store: Arc<dyn ObjectStore>,
        config: Arc<TransferConfig>,
    ) -> Self {
        let uploader = PartUploader::new(config.part_timeout());
        Self {
            request,
            source,
            store,
            config,
            uploader,
            cancel: CancellationToken::new(),
            events: None,
            state: TaskState::Created,
            total: None,
            transferred: 0,
            parts_sent: 0,
        }
    }

    /// Observes `cancel` between stages.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Reports progress on `events`. Events are dropped when the channel is full.
    pub fn with_events(mut self, events: mpsc::Sender<TransferEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Runs the task to a terminal state and returns its outcome.
    pub async fn run(&mut self) -> TransferOutcome {
        if self.state.is_terminal() {
            return self.outcome(Err(TransferError::Internal(
                "task already finished".into(),
            )));
        }

        self.emit(TransferEvent::Started {
            destination: self.request.destination.clone(),
        });

        let result = self.execute().await;
        match &result {
            Ok(info) => {
                self.transition(TaskState::Completed);
                info!(
                    destination = %self.request.destination,
                    bytes = self.transferred,
                    parts = self.parts_sent,
                    etag = %info.etag,
                    "transfer completed"
                );
                self.emit(TransferEvent::Completed {
                    destination: self.request.destination.clone(),
                    bytes: self.transferred,
                    parts: self.parts_sent,
                });
            }
            Err(e) => {
                self.transition(TaskState::Failed);
                error!(
                    destination = %self.request.destination,
                    source = %self.request.source,
                    kind = %e.kind(),
                    error = %e,
                    "transfer failed"
                );
                self.emit(TransferEvent::Failed {
                    destination: self.request.destination.clone(),
                    kind: e.kind(),
                    error: e.to_string(),
                });
            }
        }
        self.outcome(result)
    }

    async fn execute(&mut self) -> Result<ObjectInfo, TransferError> {
        self.check_cancelled()?;
        self.transition(TaskState::Fetching);

        let body = self
            .source
            .fetch(&self.request.source)
            .await
            .map_err(|source| self.fetch_failed(source))?;

        match self.config.buffering {
            Buffering::Whole => self.transfer_whole(body).await,
            Buffering::Streaming => self.transfer_streaming(body).await,
        }
    }

    /// Reads the full body, plans it, then uploads zero-copy slices.
    async fn transfer_whole(&mut self, body: SourceBody) -> Result<ObjectInfo, TransferError> {
        let content = body.collect().await.map_err(|source| self.fetch_failed(source))?;

        self.transition(TaskState::Planning);
        self.total = Some(content.len() as u64);
        let ranges = plan(content.len() as u64, self.config.chunk_size);
        debug!(
            destination = %self.request.destination,
            bytes = content.len(),
            parts = ranges.len(),
            "planned parts"
        );

        let guard = self.open_session().await?;
        let parts = self.upload_planned(&guard, &content, ranges).await;
        self.finish(guard, parts).await
    }

    async fn upload_planned(
        &mut self,
        guard: &SessionGuard,
        content: &Bytes,
        ranges: Vec<ChunkRange>,
    ) -> Result<Vec<PartRecord>, TransferError> {
        let mut parts = Vec::with_capacity(ranges.len());
        for range in ranges {
            self.check_cancelled()?;
            // Ranges come from `plan` over `content.len()`, so they are in bounds.
            let data = content.slice(range.start as usize..range.end as usize);
            parts.push(self.upload_part(guard, range, data).await?);
        }
        Ok(parts)
    }

    /// Uploads each chunk as soon as the stream has filled it.
    async fn transfer_streaming(&mut self, body: SourceBody) -> Result<ObjectInfo, TransferError> {
        self.transition(TaskState::Planning);
        self.total = body.content_length;
        let mut splitter = ChunkSplitter::new(body, self.config.chunk_size);

        let guard = self.open_session().await?;
        let parts = self.upload_streamed(&guard, &mut splitter).await;
        self.finish(guard, parts).await
    }

    async fn upload_streamed(
        &mut self,
        guard: &SessionGuard,
        splitter: &mut ChunkSplitter,
    ) -> Result<Vec<PartRecord>, TransferError> {
        let mut parts = Vec::new();
        loop {
            self.check_cancelled()?;
            let next = splitter
                .next_chunk()
                .await
                .map_err(|source| self.fetch_failed(source))?;
            let Some((range, data)) = next else {
                return Ok(parts);
            };
            parts.push(self.upload_part(guard, range, data).await?);
        }
    }

    async fn upload_part(
        &mut self,
        guard: &SessionGuard,
        range: ChunkRange,
        data: Bytes,
    ) -> Result<PartRecord, TransferError> {
        self.transition(TaskState::UploadingParts {
            part_index: range.part_index,
        });
        let record = self
            .uploader
            .upload_part(guard.session(), &range, data)
            .await?;

        self.transferred += range.len();
        self.parts_sent += 1;
        self.emit(TransferEvent::PartUploaded {
            destination: self.request.destination.clone(),
            part_index: range.part_index,
            bytes: range.len(),
            transferred: self.transferred,
            total: self.total,
        });
        Ok(record)
    }

    async fn open_session(&mut self) -> Result<SessionGuard, TransferError> {
        let session = self
            .store
            .create_session(&self.request.destination)
            .await
            .map_err(|source| TransferError::SessionCreateFailed {
                destination: self.request.destination.clone(),
                source,
            })?;
        debug!(
            destination = %self.request.destination,
            upload_id = %session.upload_id(),
            "multipart session created"
        );
        Ok(SessionGuard::new(session, self.config.abort_on_failure))
    }

    /// Commits on success; releases the session on any failure.
    async fn finish(
        &mut self,
        mut guard: SessionGuard,
        parts: Result<Vec<PartRecord>, TransferError>,
    ) -> Result<ObjectInfo, TransferError> {
        let parts = match parts.and_then(|parts| self.check_cancelled().map(|()| parts)) {
            Ok(parts) => parts,
            Err(e) => {
                guard.release().await;
                return Err(e);
            }
        };

        self.transition(TaskState::Committing);
        match guard.commit(parts).await {
            Ok(info) => Ok(info),
            Err(source) => {
                guard.release().await;
                Err(TransferError::CommitFailed { source })
            }
        }
    }

    fn check_cancelled(&self) -> Result<(), TransferError> {
        if self.cancel.is_cancelled() {
            Err(TransferError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn fetch_failed(&self, source: FetchError) -> TransferError {
        TransferError::FetchFailed {
            locator: self.request.source.clone(),
            source,
        }
    }

    fn transition(&mut self, next: TaskState) {
        if self.state.is_terminal() {
            return;
        }
        debug!(
            destination = %self.request.destination,
            from = ?self.state,
            to = ?next,
            "task state"
        );
        self.state = next;
    }

    fn emit(&self, event: TransferEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.try_send(event);
        }
    }

    fn outcome(&self, result: Result<ObjectInfo, TransferError>) -> TransferOutcome {
        let status = match result {
            Ok(_) => TransferStatus::Succeeded,
            Err(e) => TransferStatus::Failed(FailureRecord {
                destination: self.request.destination.clone(),
                source: self.request.source.clone(),
                kind: e.kind(),
                message: e.to_string(),
            }),
        };
        TransferOutcome {
            destination: self.request.destination.clone(),
            source: self.request.source.clone(),
            status,
            bytes_transferred: self.transferred,
            part_count: self.parts_sent,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionGuard
// ---------------------------------------------------------------------------

/// Owns an open multipart session until it is committed or released.
///
/// Dropping an armed guard (task cancelled or panicked) spawns the abort on
/// the current runtime.
struct SessionGuard {
    session: Arc<dyn MultipartSession>,
    abort_on_failure: bool,
    armed: bool,
}

impl SessionGuard {
    fn new(session: Box<dyn MultipartSession>, abort_on_failure: bool) -> Self {
        Self {
            session: Arc::from(session),
            abort_on_failure,
            armed: true,
        }
    }

    fn session(&self) -> &dyn MultipartSession {
        self.session.as_ref()
    }

    /// Commits; the guard stays armed if the backend refuses.
    async fn commit(&mut self, parts: Vec<PartRecord>) -> Result<ObjectInfo, StoreError> {
        let info = self.session.commit(parts).await?;
        self.armed = false;
        Ok(info)
    }

    /// Aborts the session, or leaves it open when aborting is disabled.
    async fn release(mut self) {
        self.armed = false;
        let destination = self.session.destination().to_string();
        let upload_id = self.session.upload_id().to_string();

        if !self.abort_on_failure {
            warn!(%destination, %upload_id, "multipart session left open");
            return;
        }
        match self.session.abort().await {
            Ok(()) => warn!(%destination, %upload_id, "multipart session aborted"),
            Err(e) => warn!(%destination, %upload_id, error = %e, "multipart abort failed"),
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if !self.armed || !self.abort_on_failure {
            return;
        }
        let session = Arc::clone(&self.session);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = session.abort().await {
                        warn!(
                            destination = %session.destination(),
                            error = %e,
                            "multipart abort after drop failed"
                        );
                    }
                });
            }
            Err(_) => warn!(
                destination = %self.session.destination(),
                "no runtime to abort dropped multipart session"
            ),
        }
    }
}

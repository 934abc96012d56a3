//! Runs one [`FileTransferTask`] per request and aggregates the outcomes.
//!
//! Every task runs to completion: a failing file never stops its siblings,
//! and files committed before a sibling fails stay committed.

use std::sync::Arc;

use bucketferry_protocol::{BatchResponse, FailureRecord, ObjectInfo};
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::TransferConfig;
use crate::error::TransferError;
use crate::source::Source;
use crate::store::ObjectStore;
use crate::task::FileTransferTask;
use crate::types::{TransferEvent, TransferOutcome, TransferRequest, TransferStatus};

/// Capacity of the progress event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Batch-level verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchResult {
    /// Every file was committed; `objects` is the listing taken afterwards.
    Success { objects: Vec<ObjectInfo> },
    /// At least one file failed, or the final listing failed.
    ///
    /// `message` is derived from the first failure in request order;
    /// `failures` holds all of them.
    Failure {
        message: String,
        failures: Vec<FailureRecord>,
    },
}

impl BatchResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

impl From<BatchResult> for BatchResponse {
    fn from(result: BatchResult) -> Self {
        match result {
            BatchResult::Success { objects } => BatchResponse::Success { objects },
            BatchResult::Failure { message, failures } => {
                BatchResponse::Failure { message, failures }
            }
        }
    }
}

/// Outcomes in request order plus the aggregate verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub outcomes: Vec<TransferOutcome>,
    pub result: BatchResult,
}

/// Fans a batch out into concurrent file transfers.
pub struct TransferBatchCoordinator {
    source: Arc<dyn Source>,
    store: Arc<dyn ObjectStore>,
    config: Arc<TransferConfig>,
    events_tx: mpsc::Sender<TransferEvent>,
    events_rx: Option<mpsc::Receiver<TransferEvent>>,
    cancel: CancellationToken,
}

impl TransferBatchCoordinator {
    pub fn new(
        source: Arc<dyn Source>,
        store: Arc<dyn ObjectStore>,
        config: TransferConfig,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            source,
            store,
            config: Arc::new(config),
            events_tx,
            events_rx: Some(events_rx),
            cancel: CancellationToken::new(),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<TransferEvent>> {
        self.events_rx.take()
    }

    /// Returns a token that cancels every task of this coordinator.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Transfers every request and waits for all of them to finish.
    ///
    /// With `max_concurrency` set, at most that many files are in flight.
    pub async fn run(&self, requests: Vec<TransferRequest>) -> BatchReport {
        info!(
            files = requests.len(),
            max_concurrency = ?self.config.max_concurrency,
            "batch started"
        );

        let limiter = self
            .config
            .max_concurrency
            .map(|n| Arc::new(Semaphore::new(n.get())));

        let mut handles = Vec::with_capacity(requests.len());
        for request in &requests {
            let mut task = FileTransferTask::new(
                request.clone(),
                Arc::clone(&self.source),
                Arc::clone(&self.store),
                Arc::clone(&self.config),
            )
            .with_cancel(self.cancel.clone())
            .with_events(self.events_tx.clone());
            let limiter = limiter.clone();

            handles.push(tokio::spawn(async move {
                let _permit = match limiter {
                    Some(sem) => sem.acquire_owned().await.ok(),
                    None => None,
                };
                task.run().await
            }));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (request, handle) in requests.iter().zip(handles) {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(destination = %request.destination, error = %e, "transfer task aborted");
                    internal_failure(request, &e.to_string())
                }
            };
            outcomes.push(outcome);
        }

        let result = self.aggregate(&outcomes).await;
        match &result {
            BatchResult::Success { objects } => {
                info!(files = outcomes.len(), objects = objects.len(), "batch succeeded")
            }
            BatchResult::Failure { failures, .. } => warn!(
                files = outcomes.len(),
                failed = failures.len(),
                "batch failed"
            ),
        }
        BatchReport { outcomes, result }
    }

    async fn aggregate(&self, outcomes: &[TransferOutcome]) -> BatchResult {
        let failures: Vec<FailureRecord> = outcomes
            .iter()
            .filter_map(|o| o.failure().cloned())
            .collect();

        if let Some(first) = failures.first() {
            return BatchResult::Failure {
                message: format!("File transfer failed: {}", first.message),
                failures,
            };
        }

        match self.store.list_objects().await {
            Ok(objects) => BatchResult::Success { objects },
            Err(source) => {
                let err = TransferError::ListFailed { source };
                error!(error = %err, "listing after batch failed");
                BatchResult::Failure {
                    message: err.to_string(),
                    failures: vec![FailureRecord {
                        destination: String::new(),
                        source: String::new(),
                        kind: err.kind(),
                        message: err.to_string(),
                    }],
                }
            }
        }
    }
}

fn internal_failure(request: &TransferRequest, reason: &str) -> TransferOutcome {
    let err = TransferError::Internal(reason.to_string());
    TransferOutcome {
        destination: request.destination.clone(),
        source: request.source.clone(),
        status: TransferStatus::Failed(FailureRecord {
            destination: request.destination.clone(),
            source: request.source.clone(),
            kind: err.kind(),
            message: err.to_string(),
        }),
        bytes_transferred: 0,
        part_count: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemorySource, MemoryStore};
    use bucketferry_protocol::FailureKind;
    use std::num::{NonZeroU64, NonZeroUsize};
    use std::time::Duration;

    fn config(chunk: u64) -> TransferConfig {
        TransferConfig {
            chunk_size: NonZeroU64::new(chunk).unwrap(),
            ..TransferConfig::default()
        }
    }

    fn coordinator(
        source: &MemorySource,
        store: &MemoryStore,
        config: TransferConfig,
    ) -> TransferBatchCoordinator {
        TransferBatchCoordinator::new(Arc::new(source.clone()), Arc::new(store.clone()), config)
    }

    fn three_files(source: &MemorySource) -> Vec<TransferRequest> {
        (1..=3)
            .map(|i| {
                let locator = format!("mem://src/{i}");
                source.insert(&locator, vec![i as u8; 10]);
                TransferRequest::new(locator, format!("file-{i}.bin"))
            })
            .collect()
    }

    #[tokio::test]
    async fn empty_batch_returns_listing() {
        let source = MemorySource::new();
        let store = MemoryStore::new();
        store.put_object("existing.txt", &b"hi"[..]);

        let report = coordinator(&source, &store, config(4)).run(Vec::new()).await;

        assert!(report.outcomes.is_empty());
        match report.result {
            BatchResult::Success { objects } => {
                assert_eq!(objects.len(), 1);
                assert_eq!(objects[0].key, "existing.txt");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(source.fetches().is_empty());
    }

    #[tokio::test]
    async fn all_success_lists_new_objects() {
        let source = MemorySource::new();
        let store = MemoryStore::new();
        let requests = three_files(&source);

        let report = coordinator(&source, &store, config(4)).run(requests).await;

        assert!(report.outcomes.iter().all(TransferOutcome::is_success));
        let BatchResult::Success { objects } = report.result else {
            panic!("batch should succeed");
        };
        let keys: Vec<_> = objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["file-1.bin", "file-2.bin", "file-3.bin"]);
        assert!(objects.iter().all(|o| o.size == 10));
    }

    #[tokio::test]
    async fn one_failed_part_fails_batch_but_keeps_siblings() {
        let source = MemorySource::new();
        let store = MemoryStore::new();
        let requests = three_files(&source);
        store.fail_part("file-2.bin", 2);

        let report = coordinator(&source, &store, config(4)).run(requests).await;

        assert!(report.outcomes[0].is_success());
        assert!(!report.outcomes[1].is_success());
        assert!(report.outcomes[2].is_success());
        assert_eq!(report.outcomes[1].destination, "file-2.bin");

        let BatchResult::Failure { message, failures } = &report.result else {
            panic!("batch should fail");
        };
        assert!(message.starts_with("File transfer failed: "));
        assert!(message.contains("part 2"));
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].kind, FailureKind::PartUploadFailed);

        // Committed siblings are not rolled back.
        assert!(store.object("file-1.bin").is_some());
        assert!(store.object("file-3.bin").is_some());
        assert!(store.object("file-2.bin").is_none());
    }

    #[tokio::test]
    async fn every_failure_is_reported_in_request_order() {
        let source = MemorySource::new();
        let store = MemoryStore::new();
        let requests = three_files(&source);
        source.fail_with_status("mem://src/1", 404);
        store.fail_commit("file-3.bin");

        let report = coordinator(&source, &store, config(4)).run(requests).await;

        let BatchResult::Failure { message, failures } = report.result else {
            panic!("batch should fail");
        };
        assert!(message.contains("mem://src/1"));
        let kinds: Vec<_> = failures.iter().map(|f| f.kind).collect();
        assert_eq!(kinds, vec![FailureKind::FetchFailed, FailureKind::CommitFailed]);
        assert_eq!(failures[1].destination, "file-3.bin");
    }

    #[tokio::test]
    async fn rerun_after_partial_failure_repeats_succeeded_files() {
        let source = MemorySource::new();
        let store = MemoryStore::new();
        let requests = three_files(&source);
        store.fail_part("file-2.bin", 1);
        let coordinator = coordinator(&source, &store, config(4));

        let first = coordinator.run(requests.clone()).await;
        assert!(!first.result.is_success());

        store.clear_failures();
        let second = coordinator.run(requests).await;

        assert!(second.result.is_success());
        assert_eq!(source.fetch_count("mem://src/1"), 2);
        assert_eq!(source.fetch_count("mem://src/3"), 2);
        assert_eq!(store.commits("file-1.bin").len(), 2);
        assert_eq!(store.commits("file-3.bin").len(), 2);
    }

    #[tokio::test]
    async fn listing_failure_fails_batch() {
        let source = MemorySource::new();
        let store = MemoryStore::new();
        let requests = three_files(&source);
        store.fail_list();

        let report = coordinator(&source, &store, config(4)).run(requests).await;

        assert!(report.outcomes.iter().all(TransferOutcome::is_success));
        let BatchResult::Failure { failures, .. } = report.result else {
            panic!("batch should fail");
        };
        assert_eq!(failures[0].kind, FailureKind::ListFailed);
    }

    #[tokio::test]
    async fn unbounded_batch_overlaps_all_files() {
        let source = MemorySource::new();
        let store = MemoryStore::new().with_part_delay(Duration::from_millis(20));
        let requests: Vec<_> = (0..6)
            .map(|i| {
                let locator = format!("mem://{i}");
                source.insert(&locator, vec![0u8; 8]);
                TransferRequest::new(locator, format!("{i}.bin"))
            })
            .collect();

        let report = coordinator(&source, &store, config(4)).run(requests).await;

        assert!(report.result.is_success());
        assert_eq!(store.peak_open_sessions(), 6);
    }

    #[tokio::test]
    async fn max_concurrency_bounds_open_sessions() {
        let source = MemorySource::new();
        let store = MemoryStore::new().with_part_delay(Duration::from_millis(20));
        let requests: Vec<_> = (0..6)
            .map(|i| {
                let locator = format!("mem://{i}");
                source.insert(&locator, vec![0u8; 8]);
                TransferRequest::new(locator, format!("{i}.bin"))
            })
            .collect();

        let config = TransferConfig {
            max_concurrency: NonZeroUsize::new(2),
            ..config(4)
        };
        let report = coordinator(&source, &store, config).run(requests).await;

        assert!(report.result.is_success());
        assert!(store.peak_open_sessions() <= 2);
        assert_eq!(store.open_sessions(), 0);
    }

    #[tokio::test]
    async fn cancelled_batch_fails_every_file() {
        let source = MemorySource::new();
        let store = MemoryStore::new();
        let requests = three_files(&source);
        let coordinator = coordinator(&source, &store, config(4));
        coordinator.cancel_token().cancel();

        let report = coordinator.run(requests).await;

        assert!(
            report
                .outcomes
                .iter()
                .all(|o| o.failure().map(|f| f.kind) == Some(FailureKind::Cancelled))
        );
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn events_cover_every_file() {
        let source = MemorySource::new();
        let store = MemoryStore::new();
        let requests = three_files(&source);
        let mut coordinator = coordinator(&source, &store, config(4));
        let mut events = coordinator.take_events().unwrap();
        assert!(coordinator.take_events().is_none());

        coordinator.run(requests).await;

        let mut completed = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let TransferEvent::Completed { destination, parts, .. } = event {
                assert_eq!(parts, 3);
                completed.push(destination);
            }
        }
        completed.sort();
        assert_eq!(completed, vec!["file-1.bin", "file-2.bin", "file-3.bin"]);
    }

    /// Delegates to a [`MemorySource`] but panics when fetching `poisoned`.
    struct PanickingSource {
        inner: MemorySource,
        poisoned: &'static str,
    }

    impl Source for PanickingSource {
        fn fetch<'a>(&'a self, locator: &'a str) -> crate::source::FetchFuture<'a> {
            if locator == self.poisoned {
                panic!("source blew up on {locator}");
            }
            self.inner.fetch(locator)
        }
    }

    #[tokio::test]
    async fn panicking_task_becomes_internal_failure() {
        let inner = MemorySource::new();
        let store = MemoryStore::new();
        let requests = three_files(&inner);
        let source = PanickingSource {
            inner,
            poisoned: "mem://src/2",
        };

        let report = TransferBatchCoordinator::new(
            Arc::new(source),
            Arc::new(store.clone()),
            config(4),
        )
        .run(requests)
        .await;

        assert!(report.outcomes[0].is_success());
        assert!(report.outcomes[2].is_success());
        let failed = report.outcomes[1].failure().unwrap();
        assert_eq!(failed.kind, FailureKind::Internal);
        assert_eq!(failed.destination, "file-2.bin");
        assert!(store.object("file-1.bin").is_some());
        assert!(store.object("file-3.bin").is_some());

        let BatchResult::Failure { failures, .. } = report.result else {
            panic!("batch should fail");
        };
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].kind, FailureKind::Internal);
    }

    #[test]
    fn result_converts_to_response() {
        let response: BatchResponse = BatchResult::Failure {
            message: "File transfer failed: x".into(),
            failures: Vec::new(),
        }
        .into();
        assert!(!response.is_success());
    }
}

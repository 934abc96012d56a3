//! Batch transfer pipeline: fetch a source, split it into parts, upload the
//! parts through a multipart session, commit.
//!
//! The pipeline is backend-agnostic. Sources implement [`Source`], stores
//! implement [`ObjectStore`] and [`MultipartSession`]. [`memory`] provides
//! in-memory versions of both.

mod batch;
mod config;
mod error;
pub mod integrity;
pub mod memory;
mod part;
pub mod plan;
mod source;
mod split;
mod store;
mod task;
mod types;

pub use batch::{BatchReport, BatchResult, TransferBatchCoordinator};
pub use config::{Buffering, TransferConfig};
pub use error::{FetchError, StoreError, TransferError};
pub use part::PartUploader;
pub use plan::{ChunkRange, part_count};
pub use source::{ByteStream, FetchFuture, Source, SourceBody};
pub use split::ChunkSplitter;
pub use store::{MultipartSession, ObjectStore, StoreFuture};
pub use task::{FileTransferTask, TaskState};
pub use types::{PartRecord, TransferEvent, TransferOutcome, TransferRequest, TransferStatus};

/// Default part size: 5 MiB, the smallest non-final part S3 accepts.
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

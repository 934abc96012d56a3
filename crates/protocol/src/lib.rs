//! Wire types for bucketferry batch transfers.
//!
//! A batch request lists `(url, filename)` pairs; a batch response is either
//! the destination listing or a failure report.

pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use messages::{BatchResponse, PayloadError, TransferBatchRequest, TransferItem};
pub use types::{FailureKind, FailureRecord, ObjectInfo};

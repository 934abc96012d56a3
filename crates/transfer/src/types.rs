//! Data types shared by the pipeline stages.

use bucketferry_protocol::{FailureKind, FailureRecord, TransferItem};

/// One file to transfer: where to read it and what to name it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub source: String,
    pub destination: String,
}

impl TransferRequest {
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }
}

impl From<TransferItem> for TransferRequest {
    fn from(item: TransferItem) -> Self {
        Self {
            source: item.url,
            destination: item.filename,
        }
    }
}

/// Backend confirmation of one uploaded part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartRecord {
    pub part_index: u64,
    /// Opaque tag (an ETag for S3-like backends) required at commit time.
    pub integrity_tag: String,
}

/// Final status of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    Succeeded,
    Failed(FailureRecord),
}

/// Result of one file transfer, immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub destination: String,
    pub source: String,
    pub status: TransferStatus,
    pub bytes_transferred: u64,
    pub part_count: u64,
}

impl TransferOutcome {
    /// Returns `true` if the file was committed.
    pub fn is_success(&self) -> bool {
        matches!(self.status, TransferStatus::Succeeded)
    }

    /// Returns the failure record, if any.
    pub fn failure(&self) -> Option<&FailureRecord> {
        match &self.status {
            TransferStatus::Succeeded => None,
            TransferStatus::Failed(record) => Some(record),
        }
    }
}

/// Progress event emitted while a batch runs.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    /// A file task started fetching.
    Started { destination: String },
    /// One part was accepted by the backend.
    PartUploaded {
        destination: String,
        part_index: u64,
        bytes: u64,
        /// Bytes sent so far for this file.
        transferred: u64,
        /// Source length, when the source advertised one.
        total: Option<u64>,
    },
    /// The file was committed.
    Completed {
        destination: String,
        bytes: u64,
        parts: u64,
    },
    /// The file failed.
    Failed {
        destination: String,
        kind: FailureKind,
        error: String,
    },
}

impl TransferEvent {
    /// Returns the destination this event refers to.
    pub fn destination(&self) -> &str {
        match self {
            Self::Started { destination }
            | Self::PartUploaded { destination, .. }
            | Self::Completed { destination, .. }
            | Self::Failed { destination, .. } => destination,
        }
    }

    /// Fraction of the file sent, when the total is known.
    pub fn progress(&self) -> Option<f64> {
        match self {
            Self::PartUploaded {
                transferred,
                total: Some(total),
                ..
            } if *total > 0 => Some(*transferred as f64 / *total as f64),
            Self::Completed { .. } => Some(1.0),
            _ => None,
        }
    }
}

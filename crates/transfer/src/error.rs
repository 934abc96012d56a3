//! Error types for the transfer pipeline.

use std::time::Duration;

use bucketferry_protocol::FailureKind;

/// Errors produced by a [`Source`](crate::Source).
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("server returned status {status}")]
    Status { locator: String, status: u16 },

    #[error("invalid source locator: {0}")]
    InvalidLocator(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("body truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: u64, actual: u64 },
}

/// Errors produced by an [`ObjectStore`](crate::ObjectStore) or its sessions.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("backend rejected request: {0}")]
    Rejected(String),

    #[error("session {0} is no longer open")]
    SessionClosed(String),

    #[error("invalid part: {0}")]
    InvalidPart(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Terminal error of one file transfer.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("failed to fetch {locator}: {source}")]
    FetchFailed { locator: String, source: FetchError },

    #[error("failed to create multipart session for {destination}: {source}")]
    SessionCreateFailed {
        destination: String,
        source: StoreError,
    },

    #[error("part {part_index} upload failed: {source}")]
    PartUploadFailed { part_index: u64, source: StoreError },

    #[error("commit failed: {source}")]
    CommitFailed { source: StoreError },

    #[error("cancelled")]
    Cancelled,

    #[error("listing failed: {source}")]
    ListFailed { source: StoreError },

    #[error("internal error: {0}")]
    Internal(String),
}

impl TransferError {
    /// Returns the wire-level failure kind.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::FetchFailed { .. } => FailureKind::FetchFailed,
            Self::SessionCreateFailed { .. } => FailureKind::SessionCreateFailed,
            Self::PartUploadFailed { .. } => FailureKind::PartUploadFailed,
            Self::CommitFailed { .. } => FailureKind::CommitFailed,
            Self::Cancelled => FailureKind::Cancelled,
            Self::ListFailed { .. } => FailureKind::ListFailed,
            Self::Internal(_) => FailureKind::Internal,
        }
    }
}

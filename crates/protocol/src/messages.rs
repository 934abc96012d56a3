use serde::{Deserialize, Serialize};

use crate::types::{FailureRecord, ObjectInfo};

/// Errors raised while decoding a batch request body.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("entry {index}: url is empty")]
    EmptyUrl { index: usize },

    #[error("entry {index}: filename is empty")]
    EmptyFilename { index: usize },
}

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// One file to transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferItem {
    /// Source locator fetched over HTTP(S).
    pub url: String,
    /// Destination object name.
    pub filename: String,
}

/// Batch request body: `{"urls":[{"url":..., "filename":...}]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferBatchRequest {
    #[serde(default)]
    pub urls: Vec<TransferItem>,
}

impl TransferBatchRequest {
    /// Decodes and validates a request body.
    ///
    /// Duplicate filenames are accepted; the caller owns their uniqueness.
    pub fn from_slice(body: &[u8]) -> Result<Self, PayloadError> {
        let req: Self = serde_json::from_slice(body)?;
        for (index, item) in req.urls.iter().enumerate() {
            if item.url.trim().is_empty() {
                return Err(PayloadError::EmptyUrl { index });
            }
            if item.filename.trim().is_empty() {
                return Err(PayloadError::EmptyFilename { index });
            }
        }
        Ok(req)
    }
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Batch response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum BatchResponse {
    /// Every file was committed; `objects` is the listing taken afterwards.
    #[serde(rename = "success")]
    Success { objects: Vec<ObjectInfo> },
    /// At least one file failed.
    #[serde(rename = "failure")]
    Failure {
        message: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        failures: Vec<FailureRecord>,
    },
}

impl BatchResponse {
    /// Returns `true` for the success variant.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

//! Uploads a single planned part.

use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use crate::error::{StoreError, TransferError};
use crate::plan::ChunkRange;
use crate::store::MultipartSession;
use crate::types::PartRecord;

/// Sends one part through a session, with an optional timeout. No retries.
#[derive(Debug, Clone, Copy, Default)]
pub struct PartUploader {
    timeout: Option<Duration>,
}

impl PartUploader {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    /// Uploads `data` as the part described by `range`.
    ///
    /// `data` must be exactly `range.len()` bytes; a mismatch fails the part
    /// without contacting the backend.
    pub async fn upload_part(
        &self,
        session: &dyn MultipartSession,
        range: &ChunkRange,
        data: Bytes,
    ) -> Result<PartRecord, TransferError> {
        let part_index = range.part_index;
        let fail = |source| TransferError::PartUploadFailed { part_index, source };

        if data.len() as u64 != range.len() {
            return Err(fail(StoreError::InvalidPart(format!(
                "part {part_index} carries {} bytes, range [{}, {}) needs {}",
                data.len(),
                range.start,
                range.end,
                range.len()
            ))));
        }

        let bytes = data.len();
        let upload = session.upload_part(part_index, data);
        let record = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, upload)
                .await
                .map_err(|_| fail(StoreError::Timeout(limit)))?,
            None => upload.await,
        }
        .map_err(fail)?;

        if record.part_index != part_index {
            return Err(fail(StoreError::InvalidPart(format!(
                "backend confirmed part {} for part {part_index}",
                record.part_index
            ))));
        }

        debug!(
            destination = %session.destination(),
            part = part_index,
            bytes,
            tag = %record.integrity_tag,
            "part uploaded"
        );
        Ok(record)
    }
}

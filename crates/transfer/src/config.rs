//! Transfer tuning knobs.

use std::num::{NonZeroU64, NonZeroUsize};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::DEFAULT_CHUNK_SIZE;

/// How source bodies are held before being split into parts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Buffering {
    /// Read the whole body, then plan and slice it.
    Whole,
    /// Fill one chunk-sized buffer at a time and upload it as soon as it is full.
    #[default]
    Streaming,
}

/// Configuration shared by every task in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Size of every part except the last.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: NonZeroU64,

    /// Maximum number of files in flight (unset = unbounded).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<NonZeroUsize>,

    #[serde(default)]
    pub buffering: Buffering,

    /// Abort the multipart session of a file that fails after session creation.
    #[serde(default = "default_true")]
    pub abort_on_failure: bool,

    /// Per-part upload timeout in seconds (unset = no timeout).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_timeout_secs: Option<u64>,
}

fn default_chunk_size() -> NonZeroU64 {
    NonZeroU64::new(DEFAULT_CHUNK_SIZE).unwrap_or(NonZeroU64::MIN)
}

fn default_true() -> bool {
    true
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_concurrency: None,
            buffering: Buffering::default(),
            abort_on_failure: default_true(),
            part_timeout_secs: None,
        }
    }
}

impl TransferConfig {
    /// Returns the per-part timeout, if configured.
    pub fn part_timeout(&self) -> Option<Duration> {
        self.part_timeout_secs.map(Duration::from_secs)
    }
}

//! Fixed-size part planning.

use std::num::NonZeroU64;

/// Byte range `[start, end)` of one part. Part indices start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkRange {
    pub part_index: u64,
    pub start: u64,
    pub end: u64,
}

impl ChunkRange {
    /// Length of the range in bytes.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Always `false` for planned ranges; present for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

/// Number of parts needed to cover `total_len` bytes.
pub fn part_count(total_len: u64, chunk_size: NonZeroU64) -> u64 {
    total_len.div_ceil(chunk_size.get())
}

/// Plans the parts covering `[0, total_len)` exactly once.
///
/// A zero-length input yields no parts.
pub fn plan(total_len: u64, chunk_size: NonZeroU64) -> Vec<ChunkRange> {
    let size = chunk_size.get();
    (0..part_count(total_len, chunk_size))
        .map(|i| {
            let start = i * size;
            ChunkRange {
                part_index: i + 1,
                start,
                end: start.saturating_add(size).min(total_len),
            }
        })
        .collect()
}

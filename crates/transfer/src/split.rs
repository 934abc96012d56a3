//! Splits a byte stream into fixed-size parts without reading it whole.

use std::num::NonZeroU64;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;

use crate::error::FetchError;
use crate::plan::ChunkRange;
use crate::source::{ByteStream, MAX_PREALLOC, SourceBody, check_length};

/// Reads a [`SourceBody`] one part at a time.
///
/// Emits the same ranges [`plan`](crate::plan::plan) would produce for the
/// final body length. Holds at most one part's worth of bytes.
pub struct ChunkSplitter {
    stream: ByteStream,
    content_length: Option<u64>,
    chunk_len: usize,
    buf: BytesMut,
    pending: Bytes,
    offset: u64,
    next_index: u64,
    exhausted: bool,
}

impl ChunkSplitter {
    pub fn new(body: SourceBody, chunk_size: NonZeroU64) -> Self {
        Self {
            stream: body.stream,
            content_length: body.content_length,
            chunk_len: usize::try_from(chunk_size.get()).unwrap_or(usize::MAX),
            buf: BytesMut::new(),
            pending: Bytes::new(),
            offset: 0,
            next_index: 1,
            exhausted: false,
        }
    }

    /// Returns the next part, or `None` once the body is fully consumed.
    pub async fn next_chunk(&mut self) -> Result<Option<(ChunkRange, Bytes)>, FetchError> {
        loop {
            // Whole part available in the pending piece: hand it out without copying.
            if self.buf.is_empty() && self.pending.len() >= self.chunk_len {
                let data = self.pending.split_to(self.chunk_len);
                return Ok(Some(self.emit(data)));
            }

            if !self.pending.is_empty() {
                let take = (self.chunk_len - self.buf.len()).min(self.pending.len());
                if self.buf.capacity() == 0 {
                    self.buf.reserve(self.chunk_len.min(MAX_PREALLOC));
                }
                self.buf.extend_from_slice(&self.pending.split_to(take));
                if self.buf.len() == self.chunk_len {
                    let data = self.buf.split().freeze();
                    return Ok(Some(self.emit(data)));
                }
                continue;
            }

            if self.exhausted {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                let data = self.buf.split().freeze();
                return Ok(Some(self.emit(data)));
            }

            match self.stream.next().await {
                Some(Ok(piece)) => self.pending = piece,
                Some(Err(e)) => return Err(e),
                None => {
                    let received = self.offset + self.buf.len() as u64;
                    check_length(self.content_length, received)?;
                    self.exhausted = true;
                }
            }
        }
    }

    /// Bytes handed out so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn emit(&mut self, data: Bytes) -> (ChunkRange, Bytes) {
        let start = self.offset;
        self.offset += data.len() as u64;
        let range = ChunkRange {
            part_index: self.next_index,
            start,
            end: self.offset,
        };
        self.next_index += 1;
        (range, data)
    }
}

//! Fetch capability consumed by the pipeline.

use std::future::Future;
use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};

use crate::error::FetchError;

/// Upper bound on buffer space reserved up front from an advertised length.
pub(crate) const MAX_PREALLOC: usize = 16 * 1024 * 1024;

/// Body of a successful fetch, delivered in arbitrarily sized pieces.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, FetchError>> + Send>>;

/// Boxed future returned by [`Source::fetch`].
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<SourceBody, FetchError>> + Send + 'a>>;

/// A successful fetch: optional advertised length plus the body stream.
pub struct SourceBody {
    pub content_length: Option<u64>,
    pub stream: ByteStream,
}

impl std::fmt::Debug for SourceBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceBody")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

impl SourceBody {
    /// Reads the whole body into memory.
    ///
    /// Fails with [`FetchError::Truncated`] if the body is shorter or longer
    /// than the advertised length.
    pub async fn collect(mut self) -> Result<Bytes, FetchError> {
        let capacity = self
            .content_length
            .map_or(0, |n| usize::try_from(n).unwrap_or(usize::MAX))
            .min(MAX_PREALLOC);
        let mut buf = BytesMut::with_capacity(capacity);
        while let Some(piece) = self.stream.next().await {
            buf.extend_from_slice(&piece?);
        }
        check_length(self.content_length, buf.len() as u64)?;
        Ok(buf.freeze())
    }
}

/// Verifies a received byte count against an advertised length.
pub(crate) fn check_length(expected: Option<u64>, actual: u64) -> Result<(), FetchError> {
    match expected {
        Some(expected) if expected != actual => Err(FetchError::Truncated { expected, actual }),
        _ => Ok(()),
    }
}

/// Outbound fetch transport.
///
/// A non-success response must be reported as [`FetchError::Status`], never
/// as an empty body.
pub trait Source: Send + Sync {
    fn fetch<'a>(&'a self, locator: &'a str) -> FetchFuture<'a>;
}

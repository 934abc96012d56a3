//! Object-store capability consumed by the pipeline.
//!
//! Backends implement these traits; the pipeline never sees their transport.
//! Implementations must be safe to share between concurrent sessions.

use std::future::Future;
use std::pin::Pin;

use bucketferry_protocol::ObjectInfo;
use bytes::Bytes;

use crate::error::StoreError;
use crate::types::PartRecord;

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// A multipart-capable object store.
pub trait ObjectStore: Send + Sync {
    /// Opens a multipart session that will produce `destination` on commit.
    fn create_session<'a>(
        &'a self,
        destination: &'a str,
    ) -> StoreFuture<'a, Box<dyn MultipartSession>>;

    /// Lists every committed object.
    fn list_objects(&self) -> StoreFuture<'_, Vec<ObjectInfo>>;
}

/// One open multipart upload.
///
/// A session ends with exactly one of [`commit`](Self::commit) or
/// [`abort`](Self::abort); later calls fail with [`StoreError::SessionClosed`].
pub trait MultipartSession: Send + Sync {
    /// Destination object name.
    fn destination(&self) -> &str;

    /// Backend-assigned upload id.
    fn upload_id(&self) -> &str;

    /// Uploads one part.
    fn upload_part(&self, part_index: u64, data: Bytes) -> StoreFuture<'_, PartRecord>;

    /// Assembles the listed parts, in order, into the destination object.
    fn commit(&self, parts: Vec<PartRecord>) -> StoreFuture<'_, ObjectInfo>;

    /// Discards the session and every part uploaded under it.
    fn abort(&self) -> StoreFuture<'_, ()>;
}

//! In-memory store and source.
//!
//! Both record every call and accept injected failures, so they double as
//! test fixtures for code built on the pipeline.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bucketferry_protocol::ObjectInfo;
use bytes::Bytes;
use futures_util::stream;

use crate::error::{FetchError, StoreError};
use crate::integrity::{multipart_etag, part_etag};
use crate::source::{FetchFuture, Source, SourceBody};
use crate::store::{MultipartSession, ObjectStore, StoreFuture};
use crate::types::PartRecord;

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// One call observed by a [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    CreateSession { destination: String },
    UploadPart { destination: String, part_index: u64, len: usize },
    Commit { destination: String, parts: Vec<u64> },
    Abort { destination: String },
    List,
}

#[derive(Default)]
struct StoreInner {
    objects: BTreeMap<String, (Bytes, String)>,
    uploads: HashMap<String, PendingUpload>,
    next_upload: u64,
    calls: Vec<StoreCall>,
    open: usize,
    peak_open: usize,
    fail_create: HashSet<String>,
    fail_parts: HashSet<(String, u64)>,
    fail_commit: HashSet<String>,
    fail_list: bool,
}

struct PendingUpload {
    destination: String,
    parts: BTreeMap<u64, (Bytes, String)>,
}

/// Multipart object store held entirely in memory.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<StoreInner>>,
    part_delay: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every part upload, to keep sessions open long enough to overlap.
    pub fn with_part_delay(mut self, delay: Duration) -> Self {
        self.part_delay = Some(delay);
        self
    }

    /// Makes `create_session` fail for `destination`.
    pub fn fail_create(&self, destination: &str) {
        self.lock().fail_create.insert(destination.to_string());
    }

    /// Makes uploads of `part_index` fail for `destination`.
    pub fn fail_part(&self, destination: &str, part_index: u64) {
        self.lock()
            .fail_parts
            .insert((destination.to_string(), part_index));
    }

    /// Makes `commit` fail for `destination`.
    pub fn fail_commit(&self, destination: &str) {
        self.lock().fail_commit.insert(destination.to_string());
    }

    /// Makes `list_objects` fail.
    pub fn fail_list(&self) {
        self.lock().fail_list = true;
    }

    /// Removes every injected failure.
    pub fn clear_failures(&self) {
        let mut inner = self.lock();
        inner.fail_create.clear();
        inner.fail_parts.clear();
        inner.fail_commit.clear();
        inner.fail_list = false;
    }

    /// Stores an object directly, bypassing multipart.
    pub fn put_object(&self, key: &str, data: impl Into<Bytes>) {
        let data = data.into();
        let etag = part_etag(&data);
        self.lock().objects.insert(key.to_string(), (data, etag));
    }

    /// Returns a committed object's content.
    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.lock().objects.get(key).map(|(data, _)| data.clone())
    }

    /// Every call in arrival order.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone()
    }

    /// Number of `create_session` calls for `destination`.
    pub fn sessions_created(&self, destination: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, StoreCall::CreateSession { destination: d } if d == destination))
            .count()
    }

    /// Part indices uploaded for `destination`, in call order.
    pub fn uploaded_parts(&self, destination: &str) -> Vec<u64> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                StoreCall::UploadPart {
                    destination: d,
                    part_index,
                    ..
                } if d == destination => Some(*part_index),
                _ => None,
            })
            .collect()
    }

    /// Part lists passed to `commit` for `destination`.
    pub fn commits(&self, destination: &str) -> Vec<Vec<u64>> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                StoreCall::Commit {
                    destination: d,
                    parts,
                } if d == destination => Some(parts.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of `abort` calls for `destination`.
    pub fn aborts(&self, destination: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, StoreCall::Abort { destination: d } if d == destination))
            .count()
    }

    /// Sessions neither committed nor aborted.
    pub fn open_sessions(&self) -> usize {
        self.lock().open
    }

    /// Highest number of simultaneously open sessions.
    pub fn peak_open_sessions(&self) -> usize {
        self.lock().peak_open
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        lock(&self.inner)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ObjectStore for MemoryStore {
    fn create_session<'a>(
        &'a self,
        destination: &'a str,
    ) -> StoreFuture<'a, Box<dyn MultipartSession>> {
        Box::pin(async move {
            let mut inner = self.lock();
            inner.calls.push(StoreCall::CreateSession {
                destination: destination.to_string(),
            });
            if destination.is_empty() {
                return Err(StoreError::InvalidKey("empty key".into()));
            }
            if inner.fail_create.contains(destination) {
                return Err(StoreError::Rejected(format!(
                    "create refused for {destination}"
                )));
            }

            inner.next_upload += 1;
            let upload_id = format!("mem-{}", inner.next_upload);
            inner.uploads.insert(
                upload_id.clone(),
                PendingUpload {
                    destination: destination.to_string(),
                    parts: BTreeMap::new(),
                },
            );
            inner.open += 1;
            inner.peak_open = inner.peak_open.max(inner.open);

            let session: Box<dyn MultipartSession> = Box::new(MemorySession {
                inner: Arc::clone(&self.inner),
                upload_id,
                destination: destination.to_string(),
                part_delay: self.part_delay,
            });
            Ok(session)
        })
    }

    fn list_objects(&self) -> StoreFuture<'_, Vec<ObjectInfo>> {
        Box::pin(async move {
            let mut inner = self.lock();
            inner.calls.push(StoreCall::List);
            if inner.fail_list {
                return Err(StoreError::Rejected("list refused".into()));
            }
            Ok(inner
                .objects
                .iter()
                .map(|(key, (data, etag))| ObjectInfo {
                    key: key.clone(),
                    size: data.len() as u64,
                    etag: etag.clone(),
                })
                .collect())
        })
    }
}

struct MemorySession {
    inner: Arc<Mutex<StoreInner>>,
    upload_id: String,
    destination: String,
    part_delay: Option<Duration>,
}

impl MemorySession {
    fn closed(&self) -> StoreError {
        StoreError::SessionClosed(self.upload_id.clone())
    }
}

impl MultipartSession for MemorySession {
    fn destination(&self) -> &str {
        &self.destination
    }

    fn upload_id(&self) -> &str {
        &self.upload_id
    }

    fn upload_part(&self, part_index: u64, data: Bytes) -> StoreFuture<'_, PartRecord> {
        Box::pin(async move {
            if let Some(delay) = self.part_delay {
                tokio::time::sleep(delay).await;
            }

            let mut inner = lock(&self.inner);
            inner.calls.push(StoreCall::UploadPart {
                destination: self.destination.clone(),
                part_index,
                len: data.len(),
            });
            if part_index == 0 {
                return Err(StoreError::InvalidPart("part numbers start at 1".into()));
            }
            if inner
                .fail_parts
                .contains(&(self.destination.clone(), part_index))
            {
                return Err(StoreError::Rejected(format!(
                    "part {part_index} refused for {}",
                    self.destination
                )));
            }

            let tag = part_etag(&data);
            let upload = inner
                .uploads
                .get_mut(&self.upload_id)
                .ok_or_else(|| self.closed())?;
            upload.parts.insert(part_index, (data, tag.clone()));

            Ok(PartRecord {
                part_index,
                integrity_tag: tag,
            })
        })
    }

    fn commit(&self, parts: Vec<PartRecord>) -> StoreFuture<'_, ObjectInfo> {
        Box::pin(async move {
            let mut inner = lock(&self.inner);
            inner.calls.push(StoreCall::Commit {
                destination: self.destination.clone(),
                parts: parts.iter().map(|p| p.part_index).collect(),
            });
            if inner.fail_commit.contains(&self.destination) {
                return Err(StoreError::Rejected(format!(
                    "commit refused for {}",
                    self.destination
                )));
            }

            let upload = inner
                .uploads
                .get(&self.upload_id)
                .ok_or_else(|| self.closed())?;
            let data = assemble(&upload.parts, &parts)?;
            let destination = upload.destination.clone();

            inner.uploads.remove(&self.upload_id);
            inner.open -= 1;

            let tags: Vec<&str> = parts.iter().map(|p| p.integrity_tag.as_str()).collect();
            let etag = multipart_etag(&tags);
            let info = ObjectInfo {
                key: destination.clone(),
                size: data.len() as u64,
                etag: etag.clone(),
            };
            inner.objects.insert(destination, (data, etag));
            Ok(info)
        })
    }

    fn abort(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut inner = lock(&self.inner);
            inner.calls.push(StoreCall::Abort {
                destination: self.destination.clone(),
            });
            if inner.uploads.remove(&self.upload_id).is_none() {
                return Err(self.closed());
            }
            inner.open -= 1;
            Ok(())
        })
    }
}

/// Concatenates the listed parts, checking order and tags.
fn assemble(
    uploaded: &BTreeMap<u64, (Bytes, String)>,
    parts: &[PartRecord],
) -> Result<Bytes, StoreError> {
    let mut out = Vec::new();
    let mut previous = 0;
    for part in parts {
        if part.part_index <= previous {
            return Err(StoreError::InvalidPart(format!(
                "part {} listed out of order",
                part.part_index
            )));
        }
        previous = part.part_index;

        let (data, tag) = uploaded.get(&part.part_index).ok_or_else(|| {
            StoreError::InvalidPart(format!("part {} was never uploaded", part.part_index))
        })?;
        if *tag != part.integrity_tag {
            return Err(StoreError::InvalidPart(format!(
                "part {} tag mismatch",
                part.part_index
            )));
        }
        out.extend_from_slice(data);
    }
    Ok(Bytes::from(out))
}

// ---------------------------------------------------------------------------
// MemorySource
// ---------------------------------------------------------------------------

enum SourceEntry {
    Body(Bytes),
    Status(u16),
    /// Sends the prefix, then fails the stream.
    Broken(Bytes),
}

/// Source serving registered bodies, split into fixed-size pieces.
#[derive(Clone)]
pub struct MemorySource {
    entries: Arc<Mutex<HashMap<String, SourceEntry>>>,
    fetches: Arc<Mutex<Vec<String>>>,
    piece_len: usize,
    advertise_length: bool,
}

impl Default for MemorySource {
    fn default() -> Self {
        Self {
            entries: Arc::default(),
            fetches: Arc::default(),
            piece_len: 64 * 1024,
            advertise_length: true,
        }
    }
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the size of the pieces the body is delivered in.
    pub fn with_piece_len(mut self, piece_len: usize) -> Self {
        self.piece_len = piece_len.max(1);
        self
    }

    /// Omits the content length, as a chunked HTTP response would.
    pub fn without_length(mut self) -> Self {
        self.advertise_length = false;
        self
    }

    /// Serves `data` at `locator`.
    pub fn insert(&self, locator: &str, data: impl Into<Bytes>) {
        lock(&self.entries).insert(locator.to_string(), SourceEntry::Body(data.into()));
    }

    /// Answers `locator` with a non-success status.
    pub fn fail_with_status(&self, locator: &str, status: u16) {
        lock(&self.entries).insert(locator.to_string(), SourceEntry::Status(status));
    }

    /// Sends `prefix` for `locator`, then breaks the body stream.
    pub fn break_after(&self, locator: &str, prefix: impl Into<Bytes>) {
        lock(&self.entries).insert(locator.to_string(), SourceEntry::Broken(prefix.into()));
    }

    /// Every fetched locator, in call order.
    pub fn fetches(&self) -> Vec<String> {
        lock(&self.fetches).clone()
    }

    /// Number of fetches of `locator`.
    pub fn fetch_count(&self, locator: &str) -> usize {
        lock(&self.fetches).iter().filter(|l| *l == locator).count()
    }

    fn pieces(&self, data: &Bytes) -> Vec<Result<Bytes, FetchError>> {
        let mut pieces = Vec::new();
        let mut offset = 0;
        while offset < data.len() {
            let end = (offset + self.piece_len).min(data.len());
            pieces.push(Ok(data.slice(offset..end)));
            offset = end;
        }
        pieces
    }
}

impl Source for MemorySource {
    fn fetch<'a>(&'a self, locator: &'a str) -> FetchFuture<'a> {
        Box::pin(async move {
            lock(&self.fetches).push(locator.to_string());

            let entries = lock(&self.entries);
            match entries.get(locator) {
                None => Err(FetchError::Status {
                    locator: locator.to_string(),
                    status: 404,
                }),
                Some(SourceEntry::Status(status)) => Err(FetchError::Status {
                    locator: locator.to_string(),
                    status: *status,
                }),
                Some(SourceEntry::Body(data)) => Ok(SourceBody {
                    content_length: self.advertise_length.then_some(data.len() as u64),
                    stream: Box::pin(stream::iter(self.pieces(data))),
                }),
                Some(SourceEntry::Broken(prefix)) => {
                    let mut pieces = self.pieces(prefix);
                    pieces.push(Err(FetchError::Transport("connection reset".into())));
                    Ok(SourceBody {
                        content_length: None,
                        stream: Box::pin(stream::iter(pieces)),
                    })
                }
            }
        })
    }
}

//! Directory-backed multipart object store.
//!
//! Objects live at `<root>/<key>`. Each session stages its parts under
//! `<root>/.uploads/<upload id>/`; commit concatenates them into a temporary
//! file inside the staging directory and renames it into place, so readers
//! never observe a partially assembled object.

mod key;

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use bucketferry_protocol::ObjectInfo;
use bucketferry_transfer::integrity::{multipart_etag, part_etag};
use bucketferry_transfer::{MultipartSession, ObjectStore, PartRecord, StoreError, StoreFuture};
use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::key::{STAGING_DIR, key_to_path, path_to_key};

/// Object store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Opens a store at `root`, creating the directory if needed.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join(STAGING_DIR)).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn walk(&self) -> Result<Vec<ObjectInfo>, StoreError> {
        let mut objects = Vec::new();
        let mut pending = vec![PathBuf::new()];

        while let Some(rel_dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(self.root.join(&rel_dir)).await?;
            while let Some(entry) = entries.next_entry().await? {
                let rel = rel_dir.join(entry.file_name());
                if rel.as_os_str() == STAGING_DIR {
                    continue;
                }
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(rel);
                } else if file_type.is_file() {
                    let meta = entry.metadata().await?;
                    objects.push(ObjectInfo {
                        key: path_to_key(&rel),
                        size: meta.len(),
                        etag: String::new(),
                    });
                }
            }
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }
}

impl ObjectStore for FsObjectStore {
    fn create_session<'a>(
        &'a self,
        destination: &'a str,
    ) -> StoreFuture<'a, Box<dyn MultipartSession>> {
        Box::pin(async move {
            let rel = key_to_path(destination)?;
            let upload_id = Uuid::new_v4().to_string();
            let staging = self.root.join(STAGING_DIR).join(&upload_id);
            tokio::fs::create_dir_all(&staging).await?;

            debug!(destination, upload_id = %upload_id, "staging directory created");
            let session: Box<dyn MultipartSession> = Box::new(FsSession {
                destination: destination.to_string(),
                upload_id,
                target: self.root.join(rel),
                staging,
                closed: AtomicBool::new(false),
            });
            Ok(session)
        })
    }

    fn list_objects(&self) -> StoreFuture<'_, Vec<ObjectInfo>> {
        Box::pin(self.walk())
    }
}

struct FsSession {
    destination: String,
    upload_id: String,
    target: PathBuf,
    staging: PathBuf,
    closed: AtomicBool,
}

impl FsSession {
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::SessionClosed(self.upload_id.clone()));
        }
        Ok(())
    }

    fn part_path(&self, part_index: u64) -> PathBuf {
        self.staging.join(format!("part-{part_index:06}"))
    }

    /// Concatenates the listed parts into `out`, returning the byte count.
    async fn assemble(&self, parts: &[PartRecord], out: &Path) -> Result<u64, StoreError> {
        let mut file = tokio::fs::File::create(out).await?;
        let mut size = 0u64;
        let mut previous = 0u64;

        for part in parts {
            if part.part_index <= previous {
                return Err(StoreError::InvalidPart(format!(
                    "part {} listed out of order",
                    part.part_index
                )));
            }
            previous = part.part_index;

            let data = match tokio::fs::read(self.part_path(part.part_index)).await {
                Ok(data) => data,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return Err(StoreError::InvalidPart(format!(
                        "part {} was never uploaded",
                        part.part_index
                    )));
                }
                Err(e) => return Err(e.into()),
            };
            if part_etag(&data) != part.integrity_tag {
                return Err(StoreError::InvalidPart(format!(
                    "part {} tag mismatch",
                    part.part_index
                )));
            }

            file.write_all(&data).await?;
            size += data.len() as u64;
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(size)
    }

    async fn remove_staging(&self) -> Result<(), StoreError> {
        match tokio::fs::remove_dir_all(&self.staging).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl MultipartSession for FsSession {
    fn destination(&self) -> &str {
        &self.destination
    }

    fn upload_id(&self) -> &str {
        &self.upload_id
    }

    fn upload_part(&self, part_index: u64, data: Bytes) -> StoreFuture<'_, PartRecord> {
        Box::pin(async move {
            self.ensure_open()?;
            if part_index == 0 {
                return Err(StoreError::InvalidPart("part numbers start at 1".into()));
            }

            let integrity_tag = part_etag(&data);
            tokio::fs::write(self.part_path(part_index), &data).await?;
            Ok(PartRecord {
                part_index,
                integrity_tag,
            })
        })
    }

    fn commit(&self, parts: Vec<PartRecord>) -> StoreFuture<'_, ObjectInfo> {
        Box::pin(async move {
            self.ensure_open()?;

            let assembled = self.staging.join("object");
            let size = self.assemble(&parts, &assembled).await?;

            if let Some(parent) = self.target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::rename(&assembled, &self.target).await?;
            self.closed.store(true, Ordering::Release);

            if let Err(e) = self.remove_staging().await {
                warn!(upload_id = %self.upload_id, error = %e, "failed to remove staging directory");
            }

            let tags: Vec<&str> = parts.iter().map(|p| p.integrity_tag.as_str()).collect();
            Ok(ObjectInfo {
                key: self.destination.clone(),
                size,
                etag: multipart_etag(&tags),
            })
        })
    }

    fn abort(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            if self.closed.swap(true, Ordering::AcqRel) {
                return Err(StoreError::SessionClosed(self.upload_id.clone()));
            }
            self.remove_staging().await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroU64;
    use std::sync::Arc;

    use bucketferry_transfer::memory::MemorySource;
    use bucketferry_transfer::{
        BatchResult, Buffering, TransferBatchCoordinator, TransferConfig, TransferRequest,
    };

    async fn store() -> (tempfile::TempDir, FsObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::open(dir.path()).await.unwrap();
        (dir, store)
    }

    async fn staged_uploads(store: &FsObjectStore) -> usize {
        let mut entries = tokio::fs::read_dir(store.root().join(STAGING_DIR))
            .await
            .unwrap();
        let mut count = 0;
        while entries.next_entry().await.unwrap().is_some() {
            count += 1;
        }
        count
    }

    #[tokio::test]
    async fn commit_assembles_parts_in_order() {
        let (dir, store) = store().await;
        let session = store.create_session("out/a.bin").await.unwrap();

        let p1 = session.upload_part(1, Bytes::from_static(b"hello ")).await.unwrap();
        let p2 = session.upload_part(2, Bytes::from_static(b"world")).await.unwrap();
        let info = session.commit(vec![p1.clone(), p2.clone()]).await.unwrap();

        assert_eq!(info.key, "out/a.bin");
        assert_eq!(info.size, 11);
        assert_eq!(
            info.etag,
            multipart_etag(&[p1.integrity_tag, p2.integrity_tag])
        );
        let content = tokio::fs::read(dir.path().join("out").join("a.bin"))
            .await
            .unwrap();
        assert_eq!(content, b"hello world");
        assert_eq!(staged_uploads(&store).await, 0);
    }

    #[tokio::test]
    async fn zero_part_commit_creates_empty_object() {
        let (dir, store) = store().await;
        let session = store.create_session("empty.bin").await.unwrap();

        let info = session.commit(Vec::new()).await.unwrap();

        assert_eq!(info.size, 0);
        assert!(info.etag.ends_with("-0"));
        let meta = tokio::fs::metadata(dir.path().join("empty.bin")).await.unwrap();
        assert_eq!(meta.len(), 0);
    }

    #[tokio::test]
    async fn commit_rejects_missing_or_tampered_parts() {
        let (dir, store) = store().await;
        let session = store.create_session("a.bin").await.unwrap();
        let p1 = session.upload_part(1, Bytes::from_static(b"abc")).await.unwrap();

        let missing = PartRecord {
            part_index: 2,
            integrity_tag: part_etag(b"def"),
        };
        let err = session.commit(vec![p1.clone(), missing]).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidPart(_)));

        let tampered = PartRecord {
            part_index: 1,
            integrity_tag: part_etag(b"xyz"),
        };
        let err = session.commit(vec![tampered]).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidPart(_)));

        let err = session.commit(vec![p1.clone(), p1]).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidPart(_)));

        assert!(!dir.path().join("a.bin").exists());
        // A failed commit leaves the session open for abort.
        session.abort().await.unwrap();
        assert_eq!(staged_uploads(&store).await, 0);
    }

    #[tokio::test]
    async fn abort_discards_staged_parts() {
        let (dir, store) = store().await;
        let session = store.create_session("a.bin").await.unwrap();
        session.upload_part(1, Bytes::from_static(b"abc")).await.unwrap();
        assert_eq!(staged_uploads(&store).await, 1);

        session.abort().await.unwrap();

        assert_eq!(staged_uploads(&store).await, 0);
        assert!(!dir.path().join("a.bin").exists());
        assert!(matches!(
            session.upload_part(2, Bytes::from_static(b"d")).await,
            Err(StoreError::SessionClosed(_))
        ));
        assert!(matches!(
            session.abort().await,
            Err(StoreError::SessionClosed(_))
        ));
    }

    #[tokio::test]
    async fn committed_session_is_closed() {
        let (_dir, store) = store().await;
        let session = store.create_session("a.bin").await.unwrap();
        session.commit(Vec::new()).await.unwrap();

        assert!(matches!(
            session.commit(Vec::new()).await,
            Err(StoreError::SessionClosed(_))
        ));
    }

    #[tokio::test]
    async fn rejects_part_zero_and_bad_keys() {
        let (_dir, store) = store().await;
        let session = store.create_session("a.bin").await.unwrap();
        assert!(matches!(
            session.upload_part(0, Bytes::from_static(b"x")).await,
            Err(StoreError::InvalidPart(_))
        ));

        for key in ["../escape", "/abs", ".uploads/x"] {
            assert!(matches!(
                store.create_session(key).await,
                Err(StoreError::InvalidKey(_))
            ));
        }
    }

    #[tokio::test]
    async fn listing_skips_staging_area() {
        let (_dir, store) = store().await;
        let open = store.create_session("pending.bin").await.unwrap();
        open.upload_part(1, Bytes::from_static(b"zz")).await.unwrap();

        for (key, body) in [("b.bin", &b"bb"[..]), ("a/c.bin", &b"ccc"[..])] {
            let session = store.create_session(key).await.unwrap();
            let part = session.upload_part(1, Bytes::copy_from_slice(body)).await.unwrap();
            session.commit(vec![part]).await.unwrap();
        }

        let objects = store.list_objects().await.unwrap();
        let listed: Vec<_> = objects.iter().map(|o| (o.key.as_str(), o.size)).collect();
        assert_eq!(listed, vec![("a/c.bin", 3), ("b.bin", 2)]);
    }

    #[tokio::test]
    async fn concurrent_sessions_for_same_key_do_not_collide() {
        let (dir, store) = store().await;
        let first = store.create_session("a.bin").await.unwrap();
        let second = store.create_session("a.bin").await.unwrap();
        assert_ne!(first.upload_id(), second.upload_id());

        let p = first.upload_part(1, Bytes::from_static(b"one")).await.unwrap();
        let q = second.upload_part(1, Bytes::from_static(b"two")).await.unwrap();
        first.commit(vec![p]).await.unwrap();
        second.commit(vec![q]).await.unwrap();

        let content = tokio::fs::read(dir.path().join("a.bin")).await.unwrap();
        assert_eq!(content, b"two");
    }

    #[tokio::test]
    async fn batch_writes_identical_objects_in_both_modes() {
        let (_dir, store) = store().await;
        let source = MemorySource::new().with_piece_len(7);
        let payload: Vec<u8> = (0..100u8).collect();
        source.insert("mem://payload", payload.clone());

        for (buffering, key) in [(Buffering::Whole, "whole.bin"), (Buffering::Streaming, "stream.bin")] {
            let config = TransferConfig {
                chunk_size: NonZeroU64::new(30).unwrap(),
                buffering,
                ..TransferConfig::default()
            };
            let coordinator = TransferBatchCoordinator::new(
                Arc::new(source.clone()),
                Arc::new(store.clone()),
                config,
            );
            let report = coordinator
                .run(vec![TransferRequest::new("mem://payload", key)])
                .await;
            assert_eq!(report.outcomes[0].part_count, 4);
            assert!(report.result.is_success());
        }

        let whole = tokio::fs::read(store.root().join("whole.bin")).await.unwrap();
        let stream = tokio::fs::read(store.root().join("stream.bin")).await.unwrap();
        assert_eq!(whole, payload);
        assert_eq!(stream, payload);

        let report = TransferBatchCoordinator::new(
            Arc::new(source),
            Arc::new(store.clone()),
            TransferConfig::default(),
        )
        .run(Vec::new())
        .await;
        let BatchResult::Success { objects } = report.result else {
            panic!("listing should succeed");
        };
        assert_eq!(objects.len(), 2);
    }
}

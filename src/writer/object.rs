//! # Object Storage
//!
//! External storage (`s3://bucket/prefix`) is reached through the
//! [`ObjectStore`] trait. The writer keeps encoded frames in memory and
//! uploads one sealed segment object per file type on every `flush_log`;
//! objects are immutable once put.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use uuid::Uuid;

use crate::model::{ChangefeedId, Ts};

use super::backend::{LogMeta, RedoLogWriter};
use super::errors::{WriterError, WriterResult};
use super::record::{RecordKind, RedoRecord};
use super::segment::{belongs_to, meta_file_name, sealed_segment_name, FileType, SegmentName};

/// Minimal object storage interface
pub trait ObjectStore: Send + Sync + std::fmt::Debug {
    /// Store `data` under `key`, replacing any previous object
    fn put(&self, key: &str, data: &[u8]) -> WriterResult<()>;

    fn get(&self, key: &str) -> WriterResult<Vec<u8>>;

    fn delete(&self, key: &str) -> WriterResult<()>;

    /// Keys directly under `prefix` (`prefix/<name>`)
    fn list(&self, prefix: &str) -> WriterResult<Vec<String>>;
}

/// Join a key prefix and an object name
pub fn object_key(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

/// Last path component of a key
pub fn object_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Objects as files under a root directory
#[derive(Debug)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn full_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl ObjectStore for FsObjectStore {
    fn put(&self, key: &str, data: &[u8]) -> WriterResult<()> {
        let full_path = self.full_path(key);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| WriterError::Storage(format!("put {}: {}", key, e)))?;
        }
        // Write then rename, so a reader never sees half an object
        let tmp = full_path.with_extension("uploading");
        fs::write(&tmp, data)
            .and_then(|_| fs::rename(&tmp, &full_path))
            .map_err(|e| WriterError::Storage(format!("put {}: {}", key, e)))
    }

    fn get(&self, key: &str) -> WriterResult<Vec<u8>> {
        fs::read(self.full_path(key)).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                WriterError::ObjectNotFound(key.to_string())
            } else {
                WriterError::Storage(format!("get {}: {}", key, e))
            }
        })
    }

    fn delete(&self, key: &str) -> WriterResult<()> {
        fs::remove_file(self.full_path(key)).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                WriterError::ObjectNotFound(key.to_string())
            } else {
                WriterError::Storage(format!("delete {}: {}", key, e))
            }
        })
    }

    fn list(&self, prefix: &str) -> WriterResult<Vec<String>> {
        let full_path = self.full_path(prefix);
        let mut keys = Vec::new();
        if !full_path.is_dir() {
            return Ok(keys);
        }
        let entries = fs::read_dir(&full_path)
            .map_err(|e| WriterError::Storage(format!("list {}: {}", prefix, e)))?;
        for entry in entries.flatten() {
            if !entry.path().is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.ends_with(".uploading") {
                    keys.push(object_key(prefix, name));
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// In-memory objects; for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> WriterResult<MutexGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.objects
            .lock()
            .map_err(|_| WriterError::LockPoisoned("memory object store"))
    }
}

impl ObjectStore for MemoryObjectStore {
    fn put(&self, key: &str, data: &[u8]) -> WriterResult<()> {
        self.lock()?.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> WriterResult<Vec<u8>> {
        self.lock()?
            .get(key)
            .cloned()
            .ok_or_else(|| WriterError::ObjectNotFound(key.to_string()))
    }

    fn delete(&self, key: &str) -> WriterResult<()> {
        self.lock()?
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| WriterError::ObjectNotFound(key.to_string()))
    }

    fn list(&self, prefix: &str) -> WriterResult<Vec<String>> {
        let dir = if prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", prefix)
        };
        Ok(self
            .lock()?
            .keys()
            .filter(|k| k.starts_with(&dir) && !k[dir.len()..].contains('/'))
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default)]
struct PendingObject {
    frames: Vec<u8>,
    max_commit_ts: Ts,
}

#[derive(Debug, Default)]
struct ObjectState {
    row: PendingObject,
    ddl: PendingObject,
    meta: LogMeta,
}

impl ObjectState {
    fn pending(&mut self, file_type: FileType) -> &mut PendingObject {
        match file_type {
            FileType::Row => &mut self.row,
            FileType::Ddl => &mut self.ddl,
        }
    }
}

/// Segment writer over an [`ObjectStore`]
#[derive(Debug)]
pub struct ObjectStoreWriter {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    changefeed: ChangefeedId,
    state: Mutex<ObjectState>,
    closed: AtomicBool,
}

impl ObjectStoreWriter {
    /// `prefix` is the key prefix inside the bucket the store is bound to
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>, changefeed: ChangefeedId) -> WriterResult<Self> {
        let prefix = prefix.into().trim_matches('/').to_string();
        let meta = match store.get(&object_key(&prefix, &meta_file_name(&changefeed))) {
            Ok(data) => serde_json::from_slice(&data).map_err(|e| WriterError::Codec(e.to_string()))?,
            Err(WriterError::ObjectNotFound(_)) => LogMeta::default(),
            Err(e) => return Err(e),
        };

        Ok(Self {
            store,
            prefix,
            changefeed,
            state: Mutex::new(ObjectState {
                meta,
                ..ObjectState::default()
            }),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> WriterResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WriterError::Closed);
        }
        Ok(())
    }

    fn lock_state(&self) -> WriterResult<MutexGuard<'_, ObjectState>> {
        self.state
            .lock()
            .map_err(|_| WriterError::LockPoisoned("object writer state"))
    }

    /// Upload pending frames as sealed objects. A failed upload keeps its
    /// frames so the next flush retries them.
    fn upload_pending(&self, state: &mut ObjectState) -> WriterResult<()> {
        for file_type in FileType::ALL {
            let pending = state.pending(file_type);
            if pending.frames.is_empty() {
                continue;
            }
            let uuid = Uuid::new_v4().to_string();
            let name = sealed_segment_name(&self.changefeed, file_type, pending.max_commit_ts, &uuid);
            self.store.put(&object_key(&self.prefix, &name), &pending.frames)?;
            *pending = PendingObject::default();
        }
        Ok(())
    }

    fn list_names(&self) -> WriterResult<Vec<String>> {
        Ok(self
            .store
            .list(&self.prefix)?
            .iter()
            .map(|key| object_name(key).to_string())
            .collect())
    }

    fn delete_ignoring_missing(&self, name: &str) -> WriterResult<bool> {
        match self.store.delete(&object_key(&self.prefix, name)) {
            Ok(()) => Ok(true),
            Err(WriterError::ObjectNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl RedoLogWriter for ObjectStoreWriter {
    fn write_log(&self, records: &[RedoRecord]) -> WriterResult<()> {
        self.ensure_open()?;
        let mut state = self.lock_state()?;
        for record in records {
            let frame = record.encode()?;
            let file_type = match record.kind() {
                RecordKind::Row => FileType::Row,
                RecordKind::Ddl => FileType::Ddl,
            };
            let pending = state.pending(file_type);
            pending.frames.extend_from_slice(&frame);
            pending.max_commit_ts = pending.max_commit_ts.max(record.commit_ts());
        }
        Ok(())
    }

    fn flush_log(&self) -> WriterResult<()> {
        self.ensure_open()?;
        let mut state = self.lock_state()?;
        self.upload_pending(&mut state)
    }

    fn save_meta(&self, meta: &LogMeta) -> WriterResult<()> {
        self.ensure_open()?;
        let mut state = self.lock_state()?;
        let merged = state.meta.merge(meta);
        let data = serde_json::to_vec(&merged).map_err(|e| WriterError::Codec(e.to_string()))?;
        self.store
            .put(&object_key(&self.prefix, &meta_file_name(&self.changefeed)), &data)?;
        state.meta = merged;
        Ok(())
    }

    fn gc(&self, up_to_ts: Ts) -> WriterResult<usize> {
        self.ensure_open()?;
        let mut removed = 0;
        for name in self.list_names()? {
            let Some(segment) = SegmentName::parse(&name) else {
                continue;
            };
            if segment.is_for(&self.changefeed)
                && segment.max_commit_ts < up_to_ts
                && self.delete_ignoring_missing(&name)?
            {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn delete_all_logs(&self) -> WriterResult<()> {
        self.ensure_open()?;
        let mut state = self.lock_state()?;
        *state = ObjectState::default();
        for name in self.list_names()? {
            if belongs_to(&name, &self.changefeed) {
                self.delete_ignoring_missing(&name)?;
            }
        }
        Ok(())
    }

    fn close(&self) -> WriterResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut state = self.lock_state()?;
        self.upload_pending(&mut state)
    }

    fn kind(&self) -> &'static str {
        "s3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DdlEvent, RowChangedEvent, TableName};
    use tempfile::TempDir;

    fn cf() -> ChangefeedId {
        ChangefeedId::new("default", "s3-test")
    }

    fn row(ts: Ts) -> RedoRecord {
        RedoRecord::Row(RowChangedEvent::new(ts, TableName::from_id(7)))
    }

    #[test]
    fn test_fs_store_put_get_delete() {
        let temp = TempDir::new().unwrap();
        let store = FsObjectStore::new(temp.path().to_path_buf());

        store.put("redo/a.log", b"hello").unwrap();
        assert_eq!(store.get("redo/a.log").unwrap(), b"hello");
        assert_eq!(store.list("redo").unwrap(), vec!["redo/a.log".to_string()]);

        store.delete("redo/a.log").unwrap();
        assert!(matches!(store.get("redo/a.log"), Err(WriterError::ObjectNotFound(_))));
        assert!(store.list("missing").unwrap().is_empty());
    }

    #[test]
    fn test_memory_store_lists_one_level() {
        let store = MemoryObjectStore::new();
        store.put("p/a", b"1").unwrap();
        store.put("p/b", b"2").unwrap();
        store.put("p/nested/c", b"3").unwrap();
        store.put("q/d", b"4").unwrap();

        assert_eq!(store.list("p").unwrap(), vec!["p/a".to_string(), "p/b".to_string()]);
        assert!(matches!(store.delete("p/zz"), Err(WriterError::ObjectNotFound(_))));
    }

    #[test]
    fn test_one_object_per_flush_per_file_type() {
        let store = Arc::new(MemoryObjectStore::new());
        let writer = ObjectStoreWriter::new(store.clone(), "redo", cf()).unwrap();

        writer
            .write_log(&[row(100), row(110), RedoRecord::Ddl(DdlEvent::new(90, 105, "alter table t"))])
            .unwrap();
        assert!(store.is_empty());

        writer.flush_log().unwrap();
        assert_eq!(store.len(), 2);

        // Nothing pending: no new object
        writer.flush_log().unwrap();
        assert_eq!(store.len(), 2);

        writer.write_log(&[row(120)]).unwrap();
        writer.flush_log().unwrap();
        assert_eq!(store.len(), 3);

        let row_segments: Vec<_> = store
            .list("redo")
            .unwrap()
            .iter()
            .filter_map(|k| SegmentName::parse(object_name(k)))
            .filter(|s| s.file_type == FileType::Row)
            .map(|s| s.max_commit_ts)
            .collect();
        assert_eq!(row_segments.len(), 2);
        assert!(row_segments.contains(&110));
        assert!(row_segments.contains(&120));
    }

    #[test]
    fn test_gc_and_delete_all() {
        let store = Arc::new(MemoryObjectStore::new());
        let writer = ObjectStoreWriter::new(store.clone(), "redo", cf()).unwrap();

        for ts in [100, 200] {
            writer.write_log(&[row(ts)]).unwrap();
            writer.flush_log().unwrap();
        }
        writer.save_meta(&LogMeta::new(100, 200)).unwrap();
        assert_eq!(store.len(), 3);

        assert_eq!(writer.gc(150).unwrap(), 1);
        assert_eq!(store.len(), 2);

        writer.delete_all_logs().unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_meta_survives_new_writer() {
        let temp = TempDir::new().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(temp.path().to_path_buf()));

        let writer = ObjectStoreWriter::new(store.clone(), "bucket-prefix", cf()).unwrap();
        writer.save_meta(&LogMeta::new(50, 60)).unwrap();
        writer.close().unwrap();

        let reopened = ObjectStoreWriter::new(store.clone(), "bucket-prefix", cf()).unwrap();
        reopened.save_meta(&LogMeta::new(40, 55)).unwrap();

        let data = store
            .get(&object_key("bucket-prefix", &meta_file_name(&cf())))
            .unwrap();
        let meta: LogMeta = serde_json::from_slice(&data).unwrap();
        assert_eq!(meta, LogMeta::new(50, 60));
    }

    #[test]
    fn test_close_uploads_pending() {
        let store = Arc::new(MemoryObjectStore::new());
        let writer = ObjectStoreWriter::new(store.clone(), "", cf()).unwrap();
        writer.write_log(&[row(1)]).unwrap();
        writer.close().unwrap();
        assert_eq!(store.len(), 1);
        assert!(matches!(writer.write_log(&[row(2)]), Err(WriterError::Closed)));
    }
}

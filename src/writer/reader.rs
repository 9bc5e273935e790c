//! # Redo Log Reader
//!
//! Reads back what a writer left in storage: the meta file and every
//! segment of one changefeed, sealed or still open. Records are returned
//! ordered by commit ts; records with equal commit ts keep their write
//! order. Corrupted frames fail the read instead of being skipped.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::config::{StorageScheme, StorageUri};
use crate::model::{ChangefeedId, DdlEvent, RowChangedEvent, Ts, MAX_TS};

use super::backend::LogMeta;
use super::errors::{WriterError, WriterResult};
use super::file::read_meta_file;
use super::object::{object_key, object_name, ObjectStore};
use super::record::RedoRecord;
use super::segment::{file_prefix, meta_file_name, FileType, SegmentName, TMP_EXT};

/// Commit ts window `(after, up_to]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRange {
    pub after: Ts,
    pub up_to: Ts,
}

impl ReadRange {
    pub fn all() -> Self {
        Self {
            after: 0,
            up_to: MAX_TS,
        }
    }

    /// Everything after the checkpoint that is covered by the resolved ts
    pub fn from_meta(meta: &LogMeta) -> Self {
        Self {
            after: meta.checkpoint_ts,
            up_to: meta.resolved_ts,
        }
    }

    pub fn contains(&self, ts: Ts) -> bool {
        ts > self.after && ts <= self.up_to
    }
}

/// A segment found in storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentInfo {
    pub name: String,
    pub file_type: &'static str,
    /// `None` while the segment is still open
    pub max_commit_ts: Option<Ts>,
}

#[derive(Debug)]
enum LogSource {
    Dir(PathBuf),
    Objects {
        store: Arc<dyn ObjectStore>,
        prefix: String,
    },
}

#[derive(Debug)]
pub struct RedoLogReader {
    source: LogSource,
    changefeed: ChangefeedId,
}

impl RedoLogReader {
    pub fn from_dir(dir: &Path, changefeed: ChangefeedId) -> Self {
        Self {
            source: LogSource::Dir(dir.to_path_buf()),
            changefeed,
        }
    }

    pub fn from_object_store(
        store: Arc<dyn ObjectStore>,
        prefix: impl Into<String>,
        changefeed: ChangefeedId,
    ) -> Self {
        Self {
            source: LogSource::Objects {
                store,
                prefix: prefix.into().trim_matches('/').to_string(),
            },
            changefeed,
        }
    }

    /// Reader for a storage URI. `s3://` needs `object_store`; blackhole
    /// storage keeps nothing to read.
    pub fn open(
        uri: &StorageUri,
        changefeed: ChangefeedId,
        object_store: Option<Arc<dyn ObjectStore>>,
    ) -> WriterResult<Self> {
        match uri.scheme() {
            StorageScheme::Local | StorageScheme::Nfs => {
                let dir = uri
                    .path()
                    .ok_or_else(|| WriterError::Storage(format!("no directory in {}", uri)))?;
                Ok(Self::from_dir(&dir, changefeed))
            }
            StorageScheme::S3 => {
                let store = object_store.ok_or_else(|| {
                    WriterError::Storage(format!("no object store configured for {}", uri))
                })?;
                let prefix = uri.bucket_and_prefix().map_or("", |(_, prefix)| prefix);
                Ok(Self::from_object_store(store, prefix, changefeed))
            }
            StorageScheme::BlackHole => Err(WriterError::Storage(
                "blackhole storage keeps no redo logs".to_string(),
            )),
        }
    }

    pub fn read_meta(&self) -> WriterResult<Option<LogMeta>> {
        let name = meta_file_name(&self.changefeed);
        match &self.source {
            LogSource::Dir(dir) => read_meta_file(&dir.join(name)),
            LogSource::Objects { store, prefix } => match store.get(&object_key(prefix, &name)) {
                Ok(data) => serde_json::from_slice(&data)
                    .map(Some)
                    .map_err(|e| WriterError::Codec(format!("meta {}: {}", name, e))),
                Err(WriterError::ObjectNotFound(_)) => Ok(None),
                Err(e) => Err(e),
            },
        }
    }

    /// Range implied by the meta file, or everything when there is none
    pub fn default_range(&self) -> WriterResult<ReadRange> {
        Ok(self
            .read_meta()?
            .map(|meta| ReadRange::from_meta(&meta))
            .unwrap_or_else(ReadRange::all))
    }

    fn list_names(&self) -> WriterResult<Vec<String>> {
        match &self.source {
            LogSource::Dir(dir) => {
                let entries = match fs::read_dir(dir) {
                    Ok(entries) => entries,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                    Err(e) => {
                        return Err(WriterError::io(format!("list {}", dir.display()), e))
                    }
                };
                let mut names = Vec::new();
                for entry in entries {
                    let entry =
                        entry.map_err(|e| WriterError::io(format!("list {}", dir.display()), e))?;
                    if let Some(name) = entry.file_name().to_str() {
                        names.push(name.to_string());
                    }
                }
                Ok(names)
            }
            LogSource::Objects { store, prefix } => Ok(store
                .list(prefix)?
                .iter()
                .map(|key| object_name(key).to_string())
                .collect()),
        }
    }

    fn read_bytes(&self, name: &str) -> WriterResult<Vec<u8>> {
        match &self.source {
            LogSource::Dir(dir) => {
                let path = dir.join(name);
                fs::read(&path).map_err(|e| WriterError::io(format!("read {}", path.display()), e))
            }
            LogSource::Objects { store, prefix } => store.get(&object_key(prefix, name)),
        }
    }

    /// Segments of this changefeed: sealed ones by max commit ts, then open ones
    pub fn segments(&self) -> WriterResult<Vec<SegmentInfo>> {
        let prefix = file_prefix(&self.changefeed);
        let mut sealed = Vec::new();
        let mut open = Vec::new();

        for name in self.list_names()? {
            if let Some(segment) = SegmentName::parse(&name) {
                if segment.prefix == prefix {
                    sealed.push((segment.max_commit_ts, name, segment.file_type));
                }
                continue;
            }
            if let Some(stem) = name.strip_suffix(TMP_EXT) {
                let mut parts = stem.rsplitn(3, '_');
                let _uuid = parts.next();
                let file_type = parts.next().and_then(FileType::parse);
                if let (Some(file_type), Some(p)) = (file_type, parts.next()) {
                    if p == prefix {
                        open.push((name.clone(), file_type));
                    }
                }
            }
        }

        sealed.sort();
        open.sort();

        let mut segments: Vec<SegmentInfo> = sealed
            .into_iter()
            .map(|(ts, name, file_type)| SegmentInfo {
                name,
                file_type: file_type.as_str(),
                max_commit_ts: Some(ts),
            })
            .collect();
        segments.extend(open.into_iter().map(|(name, file_type)| SegmentInfo {
            name,
            file_type: file_type.as_str(),
            max_commit_ts: None,
        }));
        Ok(segments)
    }

    /// Every record of one file type inside `range`
    pub fn read_records(&self, file_type: FileType, range: ReadRange) -> WriterResult<Vec<RedoRecord>> {
        let mut records = Vec::new();
        for segment in self.segments()? {
            if segment.file_type != file_type.as_str() {
                continue;
            }
            // Sealed segments entirely at or below the range start hold nothing to replay
            if matches!(segment.max_commit_ts, Some(max) if max <= range.after) {
                continue;
            }
            let data = self.read_bytes(&segment.name)?;
            records.extend(
                RedoRecord::decode_all(&data, &segment.name)?
                    .into_iter()
                    .filter(|r| range.contains(r.commit_ts())),
            );
        }
        records.sort_by_key(RedoRecord::commit_ts);
        Ok(records)
    }

    pub fn read_rows(&self, range: ReadRange) -> WriterResult<Vec<RowChangedEvent>> {
        Ok(self
            .read_records(FileType::Row, range)?
            .into_iter()
            .filter_map(|record| match record {
                RedoRecord::Row(row) => Some(row),
                RedoRecord::Ddl(_) => None,
            })
            .collect())
    }

    pub fn read_ddls(&self, range: ReadRange) -> WriterResult<Vec<DdlEvent>> {
        Ok(self
            .read_records(FileType::Ddl, range)?
            .into_iter()
            .filter_map(|record| match record {
                RedoRecord::Ddl(ddl) => Some(ddl),
                RedoRecord::Row(_) => None,
            })
            .collect())
    }
}

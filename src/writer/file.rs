//! # File Writer
//!
//! Writes redo segments into a directory (`local://` and `nfs://`).
//!
//! - One open segment per file type, named `*.log.tmp`
//! - `flush_log` flushes and fsyncs open segments
//! - A segment reaching `max_log_size` is sealed: fsynced, then renamed to
//!   carry its max commit ts
//! - `close` seals whatever is open
//! - On nfs the directory is fsynced after every rename so the new name is
//!   durable too

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use uuid::Uuid;

use crate::model::{ChangefeedId, Ts};
use crate::observability::{log_event, Event, Severity};

use super::backend::{LogMeta, RedoLogWriter};
use super::errors::{WriterError, WriterResult};
use super::record::{RecordKind, RedoRecord};
use super::segment::{
    belongs_to, meta_file_name, sealed_segment_name, tmp_segment_name, FileType, SegmentName,
};

#[derive(Debug)]
struct OpenSegment {
    file_type: FileType,
    path: PathBuf,
    uuid: String,
    file: BufWriter<File>,
    size: u64,
    max_commit_ts: Ts,
}

#[derive(Debug, Default)]
struct FileState {
    row: Option<OpenSegment>,
    ddl: Option<OpenSegment>,
    meta: LogMeta,
}

impl FileState {
    fn slot(&mut self, file_type: FileType) -> &mut Option<OpenSegment> {
        match file_type {
            FileType::Row => &mut self.row,
            FileType::Ddl => &mut self.ddl,
        }
    }
}

/// Segment writer over a local or NFS-mounted directory
#[derive(Debug)]
pub struct FileWriter {
    dir: PathBuf,
    changefeed: ChangefeedId,
    max_log_size: u64,
    sync_dir: bool,
    state: Mutex<FileState>,
    closed: AtomicBool,
}

impl FileWriter {
    /// Writer for a local directory
    pub fn local(dir: &Path, changefeed: ChangefeedId, max_log_size: u64) -> WriterResult<Self> {
        Self::open(dir, changefeed, max_log_size, false)
    }

    /// Writer for an NFS-mounted directory
    pub fn nfs(dir: &Path, changefeed: ChangefeedId, max_log_size: u64) -> WriterResult<Self> {
        Self::open(dir, changefeed, max_log_size, true)
    }

    fn open(
        dir: &Path,
        changefeed: ChangefeedId,
        max_log_size: u64,
        sync_dir: bool,
    ) -> WriterResult<Self> {
        fs::create_dir_all(dir).map_err(|e| {
            WriterError::io(format!("create redo directory {}", dir.display()), e)
        })?;

        // Meta left by an earlier writer is the floor for this one
        let meta = read_meta_file(&dir.join(meta_file_name(&changefeed)))?.unwrap_or_default();

        Ok(Self {
            dir: dir.to_path_buf(),
            changefeed,
            max_log_size: max_log_size.max(1),
            sync_dir,
            state: Mutex::new(FileState {
                meta,
                ..FileState::default()
            }),
            closed: AtomicBool::new(false),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn ensure_open(&self) -> WriterResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WriterError::Closed);
        }
        Ok(())
    }

    fn lock_state(&self) -> WriterResult<MutexGuard<'_, FileState>> {
        self.state
            .lock()
            .map_err(|_| WriterError::LockPoisoned("file writer state"))
    }

    fn create_segment(&self, file_type: FileType) -> WriterResult<OpenSegment> {
        let uuid = Uuid::new_v4().to_string();
        let path = self
            .dir
            .join(tmp_segment_name(&self.changefeed, file_type, &uuid));
        let file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)
            .map_err(|e| WriterError::io(format!("create segment {}", path.display()), e))?;

        Ok(OpenSegment {
            file_type,
            path,
            uuid,
            file: BufWriter::new(file),
            size: 0,
            max_commit_ts: 0,
        })
    }

    fn sync_segment(segment: &mut OpenSegment) -> WriterResult<()> {
        segment.file.flush().map_err(|e| {
            WriterError::io(format!("flush segment {}", segment.path.display()), e)
        })?;
        segment.file.get_ref().sync_data().map_err(|e| {
            WriterError::io(format!("fsync segment {}", segment.path.display()), e)
        })
    }

    /// fsync, then rename to the sealed name
    fn seal(&self, mut segment: OpenSegment) -> WriterResult<()> {
        Self::sync_segment(&mut segment)?;

        let sealed = self.dir.join(sealed_segment_name(
            &self.changefeed,
            segment.file_type,
            segment.max_commit_ts,
            &segment.uuid,
        ));
        fs::rename(&segment.path, &sealed).map_err(|e| {
            WriterError::io(format!("seal segment {}", segment.path.display()), e)
        })?;
        self.sync_dir_if_needed()?;

        if let Some(name) = sealed.file_name().and_then(|n| n.to_str()) {
            let changefeed = self.changefeed.to_string();
            let size = segment.size.to_string();
            log_event(
                Severity::Trace,
                Event::SegmentSealed,
                &[
                    ("changefeed", changefeed.as_str()),
                    ("segment", name),
                    ("size", size.as_str()),
                ],
            );
        }
        Ok(())
    }

    fn sync_dir_if_needed(&self) -> WriterResult<()> {
        if !self.sync_dir {
            return Ok(());
        }
        File::open(&self.dir)
            .and_then(|d| d.sync_all())
            .map_err(|e| WriterError::io(format!("fsync directory {}", self.dir.display()), e))
    }

    fn list_names(&self) -> WriterResult<Vec<String>> {
        let entries = fs::read_dir(&self.dir).map_err(|e| {
            WriterError::io(format!("list redo directory {}", self.dir.display()), e)
        })?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                WriterError::io(format!("list redo directory {}", self.dir.display()), e)
            })?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    fn remove(&self, name: &str) -> WriterResult<bool> {
        let path = self.dir.join(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(WriterError::io(format!("remove {}", path.display()), e)),
        }
    }
}

fn file_type_of(record: &RedoRecord) -> FileType {
    match record.kind() {
        RecordKind::Row => FileType::Row,
        RecordKind::Ddl => FileType::Ddl,
    }
}

/// Read a JSON meta file; a missing file is `None`
pub(crate) fn read_meta_file(path: &Path) -> WriterResult<Option<LogMeta>> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(WriterError::io(format!("read meta {}", path.display()), e)),
    };
    serde_json::from_slice(&data)
        .map(Some)
        .map_err(|e| WriterError::Codec(format!("meta {}: {}", path.display(), e)))
}

impl RedoLogWriter for FileWriter {
    fn write_log(&self, records: &[RedoRecord]) -> WriterResult<()> {
        self.ensure_open()?;
        let mut state = self.lock_state()?;

        for record in records {
            let frame = record.encode()?;
            let file_type = file_type_of(record);
            let slot = state.slot(file_type);
            if slot.is_none() {
                *slot = Some(self.create_segment(file_type)?);
            }

            let mut rotate = false;
            if let Some(segment) = slot.as_mut() {
                segment.file.write_all(&frame).map_err(|e| {
                    WriterError::io(format!("write segment {}", segment.path.display()), e)
                })?;
                segment.size += frame.len() as u64;
                segment.max_commit_ts = segment.max_commit_ts.max(record.commit_ts());
                rotate = segment.size >= self.max_log_size;
            }
            if rotate {
                if let Some(segment) = slot.take() {
                    self.seal(segment)?;
                }
            }
        }
        Ok(())
    }

    fn flush_log(&self) -> WriterResult<()> {
        self.ensure_open()?;
        let mut state = self.lock_state()?;
        for file_type in FileType::ALL {
            if let Some(segment) = state.slot(file_type).as_mut() {
                Self::sync_segment(segment)?;
            }
        }
        Ok(())
    }

    fn save_meta(&self, meta: &LogMeta) -> WriterResult<()> {
        self.ensure_open()?;
        let mut state = self.lock_state()?;
        let merged = state.meta.merge(meta);

        let path = self.dir.join(meta_file_name(&self.changefeed));
        let tmp = path.with_extension("meta.tmp");
        let data = serde_json::to_vec(&merged).map_err(|e| WriterError::Codec(e.to_string()))?;
        let mut file = File::create(&tmp)
            .map_err(|e| WriterError::io(format!("create meta {}", tmp.display()), e))?;
        file.write_all(&data)
            .and_then(|_| file.sync_all())
            .map_err(|e| WriterError::io(format!("write meta {}", tmp.display()), e))?;
        fs::rename(&tmp, &path)
            .map_err(|e| WriterError::io(format!("rename meta {}", path.display()), e))?;
        self.sync_dir_if_needed()?;

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
                && self.remove(&name)?
            {
                removed += 1;
            }
        }
        if removed > 0 {
            self.sync_dir_if_needed()?;
        }
        Ok(removed)
    }

    fn delete_all_logs(&self) -> WriterResult<()> {
        self.ensure_open()?;
        let mut state = self.lock_state()?;
        // Open segments are discarded, not sealed
        state.row = None;
        state.ddl = None;
        state.meta = LogMeta::default();

        for name in self.list_names()? {
            if belongs_to(&name, &self.changefeed) {
                self.remove(&name)?;
            }
        }
        self.sync_dir_if_needed()
    }

    fn close(&self) -> WriterResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut state = self.lock_state()?;
        for file_type in FileType::ALL {
            if let Some(segment) = state.slot(file_type).take() {
                self.seal(segment)?;
            }
        }
        Ok(())
    }

    fn kind(&self) -> &'static str {
        if self.sync_dir {
            "nfs"
        } else {
            "local"
        }
    }
}

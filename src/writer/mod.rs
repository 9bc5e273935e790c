//! Redo log writers
//!
//! A writer persists redo records for one changefeed:
//! - `blackhole`: discards (redo disabled, tests)
//! - `local` / `nfs`: segment files in a directory
//! - `s3`: one object per flush through an [`ObjectStore`]
//!
//! Writers are shared between managers of the same changefeed through the
//! [`WriterRegistry`]. [`RedoLogReader`] reads the logs back.

mod backend;
mod blackhole;
mod checksum;
mod errors;
mod file;
mod object;
mod reader;
mod record;
mod registry;
mod segment;

use std::sync::Arc;

pub use backend::{LogMeta, RedoLogWriter};
pub use blackhole::{BlackHoleWriter, FaultPlan};
pub use errors::{WriterError, WriterResult};
pub use file::FileWriter;
pub use object::{object_key, FsObjectStore, MemoryObjectStore, ObjectStore, ObjectStoreWriter};
pub use reader::{ReadRange, RedoLogReader, SegmentInfo};
pub use record::{RecordKind, RedoRecord};
pub use registry::{SharedWriter, WriterKey, WriterRegistry};
pub use segment::{meta_file_name, sealed_segment_name, FileType, SegmentName};

use crate::config::{StorageScheme, StorageUri};
use crate::model::ChangefeedId;

/// Build the writer for a storage target
pub fn open_writer(
    uri: &StorageUri,
    changefeed: &ChangefeedId,
    max_log_size: u64,
    object_store: Option<Arc<dyn ObjectStore>>,
) -> WriterResult<Arc<dyn RedoLogWriter>> {
    match uri.scheme() {
        StorageScheme::BlackHole => Ok(Arc::new(BlackHoleWriter::new())),
        StorageScheme::Local => {
            let dir = uri
                .path()
                .ok_or_else(|| WriterError::Storage(format!("no directory in {}", uri)))?;
            Ok(Arc::new(FileWriter::local(&dir, changefeed.clone(), max_log_size)?))
        }
        StorageScheme::Nfs => {
            let dir = uri
                .path()
                .ok_or_else(|| WriterError::Storage(format!("no directory in {}", uri)))?;
            Ok(Arc::new(FileWriter::nfs(&dir, changefeed.clone(), max_log_size)?))
        }
        StorageScheme::S3 => {
            let store = object_store.ok_or_else(|| {
                WriterError::Storage(format!("no object store configured for {}", uri))
            })?;
            let prefix = uri.bucket_and_prefix().map_or("", |(_, prefix)| prefix);
            Ok(Arc::new(ObjectStoreWriter::new(
                store,
                prefix,
                changefeed.clone(),
            )?))
        }
    }
}

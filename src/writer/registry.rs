//! # Writer Registry
//!
//! Managers of the same changefeed on the same storage share one writer.
//! The registry tracks the owners per `(storage, changefeed)` key; the last
//! owner to release closes the writer.
//!
//! Owners also share the segment set and the meta file, so each owner
//! records the progress it has published here. Meta and GC only advance to
//! the field-wise minimum over live owners, and not at all while an owner
//! has yet to publish.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use crate::model::ChangefeedId;
use crate::observability::{log_event, Event, Severity};

use super::backend::{LogMeta, RedoLogWriter};
use super::errors::{WriterError, WriterResult};

static GLOBAL: OnceLock<Arc<WriterRegistry>> = OnceLock::new();

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WriterKey {
    pub storage: String,
    pub changefeed: ChangefeedId,
}

impl WriterKey {
    pub fn new(storage: impl Into<String>, changefeed: ChangefeedId) -> Self {
        Self {
            storage: storage.into(),
            changefeed,
        }
    }
}

#[derive(Debug)]
struct Entry {
    writer: Arc<dyn RedoLogWriter>,
    /// Owner id to its last published progress
    owners: HashMap<u64, Option<LogMeta>>,
}

impl Entry {
    fn floor(&self) -> Option<LogMeta> {
        let mut published = self.owners.values();
        let first = (*published.next()?)?;
        published.try_fold(first, |floor, meta| Some(floor.lower(&(*meta)?)))
    }
}

#[derive(Debug, Default)]
pub struct WriterRegistry {
    entries: Mutex<HashMap<WriterKey, Entry>>,
    next_owner: AtomicU64,
}

impl WriterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry
    pub fn global() -> Arc<WriterRegistry> {
        GLOBAL.get_or_init(|| Arc::new(WriterRegistry::new())).clone()
    }

    fn lock(&self) -> WriterResult<MutexGuard<'_, HashMap<WriterKey, Entry>>> {
        self.entries
            .lock()
            .map_err(|_| WriterError::LockPoisoned("writer registry"))
    }

    /// Attach to the writer for `key`, building it with `factory` if no
    /// owner holds one yet
    pub fn acquire<F>(self: &Arc<Self>, key: WriterKey, factory: F) -> WriterResult<SharedWriter>
    where
        F: FnOnce() -> WriterResult<Arc<dyn RedoLogWriter>>,
    {
        let mut entries = self.lock()?;
        let changefeed = key.changefeed.to_string();
        let owner = self.next_owner.fetch_add(1, Ordering::Relaxed);

        let writer = match entries.get_mut(&key) {
            Some(entry) => {
                entry.owners.insert(owner, None);
                let owners = entry.owners.len().to_string();
                log_event(
                    Severity::Info,
                    Event::WriterShared,
                    &[
                        ("changefeed", changefeed.as_str()),
                        ("storage", key.storage.as_str()),
                        ("owners", owners.as_str()),
                    ],
                );
                entry.writer.clone()
            }
            None => {
                let writer = factory()?;
                log_event(
                    Severity::Info,
                    Event::WriterOpened,
                    &[
                        ("changefeed", changefeed.as_str()),
                        ("storage", key.storage.as_str()),
                        ("kind", writer.kind()),
                    ],
                );
                entries.insert(
                    key.clone(),
                    Entry {
                        writer: writer.clone(),
                        owners: HashMap::from([(owner, None)]),
                    },
                );
                writer
            }
        };

        Ok(SharedWriter {
            key: Some(key),
            owner,
            writer,
            registry: Some(self.clone()),
            released: AtomicBool::new(false),
        })
    }

    /// Current owner count for `key`
    pub fn owners(&self, key: &WriterKey) -> usize {
        self.lock()
            .map(|entries| entries.get(key).map_or(0, |e| e.owners.len()))
            .unwrap_or(0)
    }

    fn publish(
        &self,
        key: &WriterKey,
        owner: u64,
        meta: LogMeta,
    ) -> WriterResult<Option<LogMeta>> {
        let mut entries = self.lock()?;
        let Some(entry) = entries.get_mut(key) else {
            return Ok(None);
        };
        if let Some(slot) = entry.owners.get_mut(&owner) {
            *slot = Some(meta);
        }
        Ok(entry.floor())
    }

    /// Drop one owner; closes the writer when it was the last
    fn release(&self, key: &WriterKey, owner: u64) -> WriterResult<()> {
        let last = {
            let mut entries = self.lock()?;
            let Some(entry) = entries.get_mut(key) else {
                return Ok(());
            };
            entry.owners.remove(&owner);
            if entry.owners.is_empty() {
                entries.remove(key).map(|e| e.writer)
            } else {
                None
            }
        };

        // Close outside the lock; sealing segments does I/O
        if let Some(writer) = last {
            writer.close()?;
            log_closed(key);
        }
        Ok(())
    }

    /// Drop one owner; when it was the last, delete every log and close the
    /// writer. Returns whether the logs were deleted.
    fn release_and_delete(&self, key: &WriterKey, owner: u64) -> WriterResult<bool> {
        let mut entries = self.lock()?;
        let Some(entry) = entries.get_mut(key) else {
            return Ok(false);
        };
        entry.owners.remove(&owner);
        if !entry.owners.is_empty() {
            return Ok(false);
        }

        // Under the lock, so no new owner can attach to logs being deleted
        let deleted = entry.writer.delete_all_logs();
        let closed = entry.writer.close();
        entries.remove(key);
        drop(entries);

        deleted?;
        closed?;
        log_closed(key);
        Ok(true)
    }
}

fn log_closed(key: &WriterKey) {
    let changefeed = key.changefeed.to_string();
    log_event(
        Severity::Info,
        Event::WriterClosed,
        &[
            ("changefeed", changefeed.as_str()),
            ("storage", key.storage.as_str()),
        ],
    );
}

/// One owner's handle on a writer
#[derive(Debug)]
pub struct SharedWriter {
    key: Option<WriterKey>,
    owner: u64,
    writer: Arc<dyn RedoLogWriter>,
    registry: Option<Arc<WriterRegistry>>,
    released: AtomicBool,
}

impl SharedWriter {
    /// A handle that is not registered anywhere; release closes the writer
    pub fn unshared(writer: Arc<dyn RedoLogWriter>) -> Self {
        Self {
            key: None,
            owner: 0,
            writer,
            registry: None,
            released: AtomicBool::new(false),
        }
    }

    pub fn writer(&self) -> &Arc<dyn RedoLogWriter> {
        &self.writer
    }

    /// Record the progress this owner has published. Returns what every
    /// live owner has reached, or `None` while some owner has not
    /// published yet.
    pub fn publish(&self, meta: LogMeta) -> WriterResult<Option<LogMeta>> {
        if self.released.load(Ordering::Acquire) {
            return Ok(None);
        }
        match (&self.registry, &self.key) {
            (Some(registry), Some(key)) => registry.publish(key, self.owner, meta),
            _ => Ok(Some(meta)),
        }
    }

    /// Give up ownership. Only the first call has an effect.
    pub fn release(&self) -> WriterResult<()> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        match (&self.registry, &self.key) {
            (Some(registry), Some(key)) => registry.release(key, self.owner),
            _ => self.writer.close(),
        }
    }

    /// Give up ownership and, if no other owner holds the writer, delete
    /// every log of the changefeed. Returns whether the logs were deleted.
    pub fn release_and_delete(&self) -> WriterResult<bool> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        match (&self.registry, &self.key) {
            (Some(registry), Some(key)) => registry.release_and_delete(key, self.owner),
            _ => {
                let deleted = self.writer.delete_all_logs();
                let closed = self.writer.close();
                deleted?;
                closed?;
                Ok(true)
            }
        }
    }
}

impl Drop for SharedWriter {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

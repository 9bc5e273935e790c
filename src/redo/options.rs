//! Manager options and lifecycle state

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::writer::{ObjectStore, RedoLogWriter, WriterRegistry};

use super::errors::RedoError;

/// Knobs for building a [`RedoManager`](super::RedoManager)
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Run the periodic flush loop; when off, drive `flush_cycle` by hand
    pub enable_flush_loop: bool,
    pub enable_gc_loop: bool,
    /// Receives the writer error that stops the manager
    pub error_tx: Option<mpsc::Sender<RedoError>>,
    /// Writer registry; the process-wide one when `None`
    pub registry: Option<Arc<WriterRegistry>>,
    /// Backing store for `s3://` storage
    pub object_store: Option<Arc<dyn ObjectStore>>,
    /// Overrides the config's GC interval
    pub gc_interval: Option<Duration>,
    /// Use this writer instead of one built from the storage URI
    pub writer: Option<Arc<dyn RedoLogWriter>>,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            enable_flush_loop: true,
            enable_gc_loop: true,
            error_tx: None,
            registry: None,
            object_store: None,
            gc_interval: None,
            writer: None,
        }
    }
}

impl ManagerOptions {
    /// No background loops
    pub fn manual() -> Self {
        Self {
            enable_flush_loop: false,
            enable_gc_loop: false,
            ..Self::default()
        }
    }

    pub fn with_error_tx(mut self, error_tx: mpsc::Sender<RedoError>) -> Self {
        self.error_tx = Some(error_tx);
        self
    }

    pub fn with_registry(mut self, registry: Arc<WriterRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.object_store = Some(store);
        self
    }

    pub fn with_gc_interval(mut self, interval: Duration) -> Self {
        self.gc_interval = Some(interval);
        self
    }

    pub fn with_writer(mut self, writer: Arc<dyn RedoLogWriter>) -> Self {
        self.writer = Some(writer);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ManagerState {
    /// Accepting calls, loops running
    Running = 0,
    /// Level `none`: calls accepted and ignored
    Disabled = 1,
    /// A writer error stopped the flush loop
    Failed = 2,
    /// Cleaned up
    Closed = 3,
}

impl ManagerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ManagerState::Running,
            1 => ManagerState::Disabled,
            2 => ManagerState::Failed,
            _ => ManagerState::Closed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ManagerState::Running => "running",
            ManagerState::Disabled => "disabled",
            ManagerState::Failed => "failed",
            ManagerState::Closed => "closed",
        }
    }

    /// Whether mutating calls are refused
    pub fn is_terminal(&self) -> bool {
        matches!(self, ManagerState::Failed | ManagerState::Closed)
    }
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared, lock-free manager state
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(state: ManagerState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn get(&self) -> ManagerState {
        ManagerState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to Failed unless already terminal. Returns whether this call
    /// made the transition.
    pub(crate) fn fail(&self) -> bool {
        self.transition_to(ManagerState::Failed)
    }

    /// Move to Closed from any state but Closed
    pub(crate) fn close(&self) -> bool {
        self.0.swap(ManagerState::Closed as u8, Ordering::AcqRel) != ManagerState::Closed as u8
    }

    fn transition_to(&self, target: ManagerState) -> bool {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if ManagerState::from_u8(current).is_terminal() {
                return false;
            }
            match self.0.compare_exchange(
                current,
                target as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

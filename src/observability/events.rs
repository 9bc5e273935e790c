//! Observable redo events
//!
//! Events are explicit and typed; every log line the subsystem emits names
//! one of these.

use std::fmt;

/// Observable events of the redo subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Manager lifecycle
    /// Manager constructed and loops started
    ManagerStart,
    /// Manager constructed with redo disabled
    ManagerDisabled,
    /// Cleanup requested
    ManagerCleanup,
    /// Manager fully stopped
    ManagerClosed,

    // Table lifecycle
    /// Span started being tracked
    TableAdded,
    /// Span stopped being tracked
    TableRemoved,

    // Flush loop
    /// One flush cycle finished
    FlushCycle,
    /// Flush loop hit a writer error and stopped (FATAL)
    FlushFailed,
    /// Flush loop stopped on shutdown
    FlushLoopExit,

    // GC loop
    /// Segments reclaimed
    GcComplete,
    /// GC attempt failed, retried next tick
    GcFailed,
    /// GC loop stopped on shutdown
    GcLoopExit,

    // Writer
    /// Writer created for a storage target
    WriterOpened,
    /// A manager attached to an existing writer
    WriterShared,
    /// Last owner released the writer
    WriterClosed,
    /// Segment sealed under its final name
    SegmentSealed,
    /// All logs of a changefeed deleted
    LogsDeleted,
    /// Error channel full or gone; error dropped
    ErrorDropped,
}

impl Event {
    /// Returns the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ManagerStart => "REDO_MANAGER_START",
            Event::ManagerDisabled => "REDO_MANAGER_DISABLED",
            Event::ManagerCleanup => "REDO_MANAGER_CLEANUP",
            Event::ManagerClosed => "REDO_MANAGER_CLOSED",
            Event::TableAdded => "REDO_TABLE_ADDED",
            Event::TableRemoved => "REDO_TABLE_REMOVED",
            Event::FlushCycle => "REDO_FLUSH_CYCLE",
            Event::FlushFailed => "REDO_FLUSH_FAILED",
            Event::FlushLoopExit => "REDO_FLUSH_LOOP_EXIT",
            Event::GcComplete => "REDO_GC_COMPLETE",
            Event::GcFailed => "REDO_GC_FAILED",
            Event::GcLoopExit => "REDO_GC_LOOP_EXIT",
            Event::WriterOpened => "REDO_WRITER_OPENED",
            Event::WriterShared => "REDO_WRITER_SHARED",
            Event::WriterClosed => "REDO_WRITER_CLOSED",
            Event::SegmentSealed => "REDO_SEGMENT_SEALED",
            Event::LogsDeleted => "REDO_LOGS_DELETED",
            Event::ErrorDropped => "REDO_ERROR_DROPPED",
        }
    }

    /// Whether this event means a component stopped on error
    pub fn is_fatal(&self) -> bool {
        matches!(self, Event::FlushFailed)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

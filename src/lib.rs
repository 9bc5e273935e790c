//! cdc-redo - redo log subsystem of a change-data-capture pipeline
//!
//! Row changes and DDL events of a changefeed are buffered, persisted in
//! batches by a background flush loop, and a global resolved-ts watermark
//! is published once the data below it is durable. Downstream recovery
//! replays the logs up to that watermark.
//!
//! - `config`: consistency level and storage target
//! - `model`: spans, timestamps and events
//! - `writer`: redo log writers, the writer registry and the log reader
//! - `redo`: resolved-ts tracker, event buffer, flush and GC loops, manager
//! - `observability`: structured logging and counters
//! - `cli`: offline inspection and maintenance

pub mod cli;
pub mod config;
pub mod model;
pub mod observability;
pub mod redo;
pub mod writer;

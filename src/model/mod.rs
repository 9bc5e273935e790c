//! Data model shared by the redo subsystem
//!
//! - `Ts`: logical timestamp domain for commits and watermarks
//! - `Span`: identity of a tracked table (or key range of one)
//! - `ChangefeedId`: the replication job a manager is bound to
//! - Row and DDL change events as produced upstream

mod event;
mod span;

pub use event::{Column, DdlEvent, RowChangedEvent, TableName};
pub use span::{ChangefeedId, Span, Ts, MAX_TS};

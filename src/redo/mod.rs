//! Redo manager
//!
//! - `tracker`: per-span resolved ts and the published global watermark
//! - `buffer`: non-blocking queue between callers and the flush loop
//! - `flush`: drain, write, flush, publish
//! - `gc`: reclaim segments below the watermark
//! - `manager`: the façade the pipeline talks to
//!
//! ```ignore
//! let manager = RedoManager::new(&config, changefeed, ManagerOptions::default())?;
//! manager.add_table(span.clone(), 100)?;
//! manager.emit_row_changed_events(&span, rows)?;
//! manager.update_resolved_ts(&span, 150)?;
//! // after the next flush
//! assert_eq!(manager.min_resolved_ts(), 150);
//! manager.cleanup().await?;
//! ```

mod buffer;
mod errors;
mod flush;
mod gc;
mod manager;
mod options;
mod tracker;

pub use buffer::{event_buffer, CacheBatch, EventReceiver, EventSender};
pub use errors::{FlushPhase, RedoError, RedoResult};
pub use manager::RedoManager;
pub use options::{ManagerOptions, ManagerState};
pub use tracker::{FlushSnapshot, ResolvedTsTracker};

//! Event buffer between callers and the flush loop
//!
//! Unbounded, so callers never wait on storage. Batches are consumed once,
//! in FIFO order, by the flush cycle.

use tokio::sync::mpsc::{self, error::TryRecvError};

use crate::model::{DdlEvent, RowChangedEvent, Span, Ts};

use super::errors::{RedoError, RedoResult};

/// One unit of buffered work
#[derive(Debug, Clone, PartialEq)]
pub enum CacheBatch {
    Rows {
        span: Span,
        generation: u64,
        rows: Vec<RowChangedEvent>,
    },
    Resolved {
        span: Span,
        generation: u64,
        ts: Ts,
    },
    Ddl {
        event: DdlEvent,
    },
}

pub fn event_buffer() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, EventReceiver { rx })
}

#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<CacheBatch>,
}

impl EventSender {
    /// Enqueue without blocking; fails once the receiver is gone
    pub fn send(&self, batch: CacheBatch) -> RedoResult<()> {
        self.tx.send(batch).map_err(|_| RedoError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<CacheBatch>,
}

impl EventReceiver {
    /// Everything queued right now, oldest first
    pub fn drain(&mut self) -> Vec<CacheBatch> {
        let mut batches = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(batch) => batches.push(batch),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        batches
    }

    /// Refuse further sends; queued batches stay drainable
    pub fn close(&mut self) {
        self.rx.close();
    }
}

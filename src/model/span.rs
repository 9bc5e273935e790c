//! Spans, timestamps and changefeed identity

use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical timestamp used for commit times and resolved watermarks.
pub type Ts = u64;

/// Watermark value meaning "no constraint".
///
/// Published as the global minimum while no span is tracked.
pub const MAX_TS: Ts = u64::MAX;

/// Key prefix of the record keyspace of a table.
const TABLE_PREFIX: &[u8] = b"t";

/// Identifies a tracked table, or a key range of one.
///
/// Equality is by value, so two spans built from the same table id are the
/// same map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    /// Table the span belongs to
    pub table_id: i64,
    /// Inclusive start key
    pub start_key: Vec<u8>,
    /// Exclusive end key
    pub end_key: Vec<u8>,
}

impl Span {
    /// Create a span over an explicit key range.
    pub fn new(table_id: i64, start_key: Vec<u8>, end_key: Vec<u8>) -> Self {
        Self {
            table_id,
            start_key,
            end_key,
        }
    }

    /// Create the span covering a whole table.
    ///
    /// Keys are `t{table_id}` and `t{table_id + 1}` in big-endian form so
    /// that spans of consecutive tables sort and never overlap.
    pub fn for_table(table_id: i64) -> Self {
        Self {
            table_id,
            start_key: table_key(table_id),
            end_key: table_key(table_id.saturating_add(1)),
        }
    }
}

fn table_key(table_id: i64) -> Vec<u8> {
    let mut key = Vec::with_capacity(TABLE_PREFIX.len() + 8);
    key.extend_from_slice(TABLE_PREFIX);
    key.extend_from_slice(&table_id.to_be_bytes());
    key
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table:{}", self.table_id)
    }
}

/// Identity of the replication job a manager is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangefeedId {
    pub namespace: String,
    pub id: String,
}

impl ChangefeedId {
    /// Namespace used when none is given.
    pub const DEFAULT_NAMESPACE: &'static str = "default";

    pub fn new(namespace: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            id: id.into(),
        }
    }

    /// Changefeed in the default namespace.
    pub fn with_default_namespace(id: impl Into<String>) -> Self {
        Self::new(Self::DEFAULT_NAMESPACE, id)
    }
}

impl fmt::Display for ChangefeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.id)
    }
}

//! Segment and meta file naming
//!
//! ```text
//! <ns>_<cf>_<type>_<uuid>.log.tmp            open segment
//! <ns>_<cf>_<type>_<max_commit_ts>_<uuid>.log sealed segment
//! <ns>_<cf>.meta                             meta file
//! ```
//!
//! Namespaces and changefeed ids may themselves contain `_`, so names are
//! parsed from the right and the `<ns>_<cf>` prefix is compared whole.

use std::fmt;

use crate::model::{ChangefeedId, Ts};

pub const SEGMENT_EXT: &str = ".log";
pub const TMP_EXT: &str = ".log.tmp";
pub const META_EXT: &str = ".meta";

/// Which stream a segment belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FileType {
    Row,
    Ddl,
}

impl FileType {
    pub const ALL: [FileType; 2] = [FileType::Row, FileType::Ddl];

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Row => "row",
            FileType::Ddl => "ddl",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "row" => Some(FileType::Row),
            "ddl" => Some(FileType::Ddl),
            _ => None,
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `<ns>_<cf>`, shared by every file of one changefeed
pub fn file_prefix(changefeed: &ChangefeedId) -> String {
    format!("{}_{}", changefeed.namespace, changefeed.id)
}

pub fn tmp_segment_name(changefeed: &ChangefeedId, file_type: FileType, uuid: &str) -> String {
    format!("{}_{}_{}{}", file_prefix(changefeed), file_type, uuid, TMP_EXT)
}

pub fn sealed_segment_name(
    changefeed: &ChangefeedId,
    file_type: FileType,
    max_commit_ts: Ts,
    uuid: &str,
) -> String {
    format!(
        "{}_{}_{}_{}{}",
        file_prefix(changefeed),
        file_type,
        max_commit_ts,
        uuid,
        SEGMENT_EXT
    )
}

pub fn meta_file_name(changefeed: &ChangefeedId) -> String {
    format!("{}{}", file_prefix(changefeed), META_EXT)
}

/// Whether `name` is any file (segment, temp segment or meta) of this changefeed
pub fn belongs_to(name: &str, changefeed: &ChangefeedId) -> bool {
    if name == meta_file_name(changefeed) || name == format!("{}.tmp", meta_file_name(changefeed))
    {
        return true;
    }
    if let Some(segment) = SegmentName::parse(name) {
        return segment.prefix == file_prefix(changefeed);
    }
    if let Some(stem) = name.strip_suffix(TMP_EXT) {
        let mut parts = stem.rsplitn(3, '_');
        let _uuid = parts.next();
        let file_type = parts.next().and_then(FileType::parse);
        return file_type.is_some() && parts.next() == Some(file_prefix(changefeed).as_str());
    }
    false
}

/// A parsed sealed segment name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentName {
    pub prefix: String,
    pub file_type: FileType,
    pub max_commit_ts: Ts,
    pub uuid: String,
}

impl SegmentName {
    /// Parse a sealed segment name; temp segments and foreign files yield `None`
    pub fn parse(name: &str) -> Option<Self> {
        if name.ends_with(TMP_EXT) {
            return None;
        }
        let stem = name.strip_suffix(SEGMENT_EXT)?;
        let mut parts = stem.rsplitn(4, '_');
        let uuid = parts.next()?;
        let max_commit_ts = parts.next()?.parse::<Ts>().ok()?;
        let file_type = FileType::parse(parts.next()?)?;
        let prefix = parts.next()?;
        if uuid.is_empty() || prefix.is_empty() {
            return None;
        }
        Some(Self {
            prefix: prefix.to_string(),
            file_type,
            max_commit_ts,
            uuid: uuid.to_string(),
        })
    }

    pub fn is_for(&self, changefeed: &ChangefeedId) -> bool {
        self.prefix == file_prefix(changefeed)
    }
}

//! Storage target URIs
//!
//! Recognised schemes (case-sensitive):
//! - `local://<path>`: local disk
//! - `nfs://<path>`: network filesystem mounted at `<path>`
//! - `s3://<bucket>/<prefix>`: object storage
//! - `blackhole://`: discard everything

use std::fmt;
use std::path::PathBuf;

use super::errors::{ConfigError, ConfigResult};

/// Storage backend selected by a URI scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageScheme {
    Local,
    Nfs,
    S3,
    BlackHole,
}

impl StorageScheme {
    /// Parse a scheme name. Matching is exact; `Local` is not `local`.
    pub fn parse(scheme: &str) -> Option<Self> {
        match scheme {
            "local" => Some(Self::Local),
            "nfs" => Some(Self::Nfs),
            "s3" => Some(Self::S3),
            "blackhole" => Some(Self::BlackHole),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Nfs => "nfs",
            Self::S3 => "s3",
            Self::BlackHole => "blackhole",
        }
    }

    /// Whether data leaves the local machine.
    pub fn is_external(&self) -> bool {
        matches!(self, Self::S3)
    }

    /// Whether the backend is a mounted filesystem.
    pub fn is_filesystem(&self) -> bool {
        matches!(self, Self::Local | Self::Nfs)
    }
}

impl fmt::Display for StorageScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether `scheme` names a supported storage.
pub fn is_valid_consistent_storage(scheme: &str) -> bool {
    StorageScheme::parse(scheme).is_some()
}

/// Whether `scheme` names an external (object) storage.
pub fn is_external_storage(scheme: &str) -> bool {
    StorageScheme::parse(scheme)
        .map(|s| s.is_external())
        .unwrap_or(false)
}

/// A parsed storage target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageUri {
    scheme: StorageScheme,
    /// Path for filesystem schemes, `bucket/prefix` for s3, empty for blackhole
    location: String,
}

impl StorageUri {
    /// Parse `<scheme>://<location>`.
    pub fn parse(uri: &str) -> ConfigResult<Self> {
        let (scheme, location) = uri
            .split_once("://")
            .ok_or_else(|| ConfigError::InvalidStorageUri(uri.to_string()))?;

        let scheme = StorageScheme::parse(scheme)
            .ok_or_else(|| ConfigError::UnsupportedScheme(scheme.to_string()))?;

        let location = location.trim_end_matches('/').to_string();
        match scheme {
            StorageScheme::Local | StorageScheme::Nfs | StorageScheme::S3 => {
                if location.is_empty() {
                    return Err(ConfigError::InvalidStorageUri(uri.to_string()));
                }
            }
            StorageScheme::BlackHole => {}
        }

        Ok(Self { scheme, location })
    }

    pub fn scheme(&self) -> StorageScheme {
        self.scheme
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Directory for filesystem schemes.
    pub fn path(&self) -> Option<PathBuf> {
        if self.scheme.is_filesystem() {
            Some(PathBuf::from(&self.location))
        } else {
            None
        }
    }

    /// Bucket and key prefix for s3.
    pub fn bucket_and_prefix(&self) -> Option<(&str, &str)> {
        if self.scheme != StorageScheme::S3 {
            return None;
        }
        Some(match self.location.split_once('/') {
            Some((bucket, prefix)) => (bucket, prefix),
            None => (self.location.as_str(), ""),
        })
    }
}

impl fmt::Display for StorageUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.location)
    }
}

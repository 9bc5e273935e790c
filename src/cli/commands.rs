//! CLI command implementations
//!
//! Commands run synchronously against the writer and reader; they never
//! start a manager or its loops. Running `gc` or `delete` against the
//! storage of a live changefeed races its manager.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::config::{ConsistentConfig, StorageScheme, StorageUri};
use crate::model::ChangefeedId;
use crate::observability::{log_event, Event, Severity};
use crate::writer::{open_writer, FsObjectStore, ObjectStore, ReadRange, RedoLogReader};

use super::args::{Cli, Command, Target};
use super::errors::{CliError, CliResult};
use super::io::{write_error, write_response};

/// Max segment size for writers opened by maintenance commands. They never
/// write, so the value only has to be valid.
const MAINTENANCE_MAX_LOG_SIZE: u64 = 64 * 1024 * 1024;

/// Parse arguments, run the command and print its response
pub fn run() -> CliResult<()> {
    let cli = Cli::parse_args();
    match run_command(cli.command) {
        Ok(data) => write_response(data),
        Err(err) => {
            write_error(err.code_str(), err.message())?;
            Err(err)
        }
    }
}

/// Run one command and return the `data` of its response
pub fn run_command(command: Command) -> CliResult<Value> {
    match command {
        Command::CheckConfig { config } => check_config(&config),
        Command::Meta { target } => meta(&target),
        Command::Dump {
            target,
            after,
            up_to,
        } => dump(&target, after, up_to),
        Command::Gc { target, up_to } => gc(&target, up_to),
        Command::Delete { target } => delete(&target),
    }
}

fn check_config(path: &std::path::Path) -> CliResult<Value> {
    let config = ConsistentConfig::load(path)?;
    let enabled = config.is_enabled();
    Ok(json!({
        "config": config,
        "enabled": enabled,
    }))
}

/// Resolved pieces of a `Target`
struct Resolved {
    uri: StorageUri,
    changefeed: ChangefeedId,
    object_store: Option<Arc<dyn ObjectStore>>,
}

fn resolve(target: &Target) -> CliResult<Resolved> {
    let uri = StorageUri::parse(&target.storage)?;
    let changefeed = ChangefeedId::new(target.namespace.clone(), target.changefeed.clone());

    let object_store: Option<Arc<dyn ObjectStore>> = match uri.scheme() {
        StorageScheme::S3 => {
            let root = target.object_root.as_ref().ok_or_else(|| {
                CliError::config_error(format!("{} needs --object-root", uri))
            })?;
            let bucket = uri.bucket_and_prefix().map_or("", |(bucket, _)| bucket);
            Some(Arc::new(FsObjectStore::new(root.join(bucket))))
        }
        StorageScheme::BlackHole => {
            return Err(CliError::config_error(
                "blackhole storage keeps no redo logs",
            ))
        }
        StorageScheme::Local | StorageScheme::Nfs => None,
    };

    Ok(Resolved {
        uri,
        changefeed,
        object_store,
    })
}

fn reader(resolved: &Resolved) -> CliResult<RedoLogReader> {
    Ok(RedoLogReader::open(
        &resolved.uri,
        resolved.changefeed.clone(),
        resolved.object_store.clone(),
    )?)
}

fn meta(target: &Target) -> CliResult<Value> {
    let resolved = resolve(target)?;
    let reader = reader(&resolved)?;
    let meta = reader.read_meta()?;
    let segments = reader.segments()?;
    Ok(json!({
        "changefeed": resolved.changefeed.to_string(),
        "meta": meta,
        "segments": segments,
    }))
}

fn dump(target: &Target, after: Option<u64>, up_to: Option<u64>) -> CliResult<Value> {
    let resolved = resolve(target)?;
    let reader = reader(&resolved)?;

    let default = reader.default_range()?;
    let range = ReadRange {
        after: after.unwrap_or(default.after),
        up_to: up_to.unwrap_or(default.up_to),
    };
    if range.after > range.up_to {
        return Err(CliError::config_error(format!(
            "empty range: after {} is above up_to {}",
            range.after, range.up_to
        )));
    }

    let rows = reader.read_rows(range)?;
    let ddls = reader.read_ddls(range)?;
    Ok(json!({
        "changefeed": resolved.changefeed.to_string(),
        "after": range.after,
        "up_to": range.up_to,
        "rows": rows,
        "ddls": ddls,
    }))
}

fn gc(target: &Target, up_to: u64) -> CliResult<Value> {
    let resolved = resolve(target)?;
    let writer = open_writer(
        &resolved.uri,
        &resolved.changefeed,
        MAINTENANCE_MAX_LOG_SIZE,
        resolved.object_store.clone(),
    )?;
    let removed = writer.gc(up_to)?;
    writer.close()?;

    let changefeed = resolved.changefeed.to_string();
    let up_to_str = up_to.to_string();
    let removed_str = removed.to_string();
    log_event(
        Severity::Info,
        Event::GcComplete,
        &[
            ("changefeed", changefeed.as_str()),
            ("up_to_ts", up_to_str.as_str()),
            ("removed", removed_str.as_str()),
        ],
    );
    Ok(json!({
        "changefeed": changefeed,
        "up_to": up_to,
        "removed": removed,
    }))
}

fn delete(target: &Target) -> CliResult<Value> {
    let resolved = resolve(target)?;
    let writer = open_writer(
        &resolved.uri,
        &resolved.changefeed,
        MAINTENANCE_MAX_LOG_SIZE,
        resolved.object_store.clone(),
    )?;
    writer.delete_all_logs()?;
    writer.close()?;

    let changefeed = resolved.changefeed.to_string();
    log_event(
        Severity::Info,
        Event::LogsDeleted,
        &[("changefeed", changefeed.as_str())],
    );
    Ok(json!({ "changefeed": changefeed }))
}

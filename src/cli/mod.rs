//! CLI module for cdc-redo
//!
//! Offline tooling over the redo logs of one changefeed:
//! - check-config: validate a redo configuration file
//! - meta: show the saved meta and the segments in storage
//! - dump: print the records a replay would apply
//! - gc / delete: reclaim segments by hand

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command, Target};
pub use commands::{run, run_command};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{write_error, write_response};

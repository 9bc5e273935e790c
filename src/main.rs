//! cdc-redo CLI entry point
//!
//! Parses arguments, dispatches through `cli::run`, prints errors to
//! stderr and exits non-zero on failure.

use cdc_redo::cli;

fn main() {
    if let Err(e) = cli::run() {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

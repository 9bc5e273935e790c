//! CLI argument definitions using clap
//!
//! Commands:
//! - cdc-redo check-config --config <path>
//! - cdc-redo meta --storage <uri> --changefeed <id>
//! - cdc-redo dump --storage <uri> --changefeed <id> [--after <ts>] [--up-to <ts>]
//! - cdc-redo gc --storage <uri> --changefeed <id> --up-to <ts>
//! - cdc-redo delete --storage <uri> --changefeed <id>

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::model::Ts;

/// cdc-redo - inspect and maintain changefeed redo logs
#[derive(Parser, Debug)]
#[command(name = "cdc-redo")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Where the logs of one changefeed live
#[derive(Args, Debug, Clone)]
pub struct Target {
    /// Storage URI, e.g. local:///data/redo
    #[arg(long)]
    pub storage: String,

    /// Changefeed namespace
    #[arg(long, default_value = "default")]
    pub namespace: String,

    /// Changefeed id
    #[arg(long)]
    pub changefeed: String,

    /// Directory standing in for the bucket root of s3:// targets
    #[arg(long)]
    pub object_root: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate a redo configuration file
    CheckConfig {
        /// Path to configuration file
        #[arg(long, default_value = "./redo.json")]
        config: PathBuf,
    },

    /// Show the log meta and the segments of a changefeed
    Meta {
        #[command(flatten)]
        target: Target,
    },

    /// Print the records a replay would apply
    Dump {
        #[command(flatten)]
        target: Target,

        /// Exclusive lower bound; defaults to the saved checkpoint ts
        #[arg(long)]
        after: Option<Ts>,

        /// Inclusive upper bound; defaults to the saved resolved ts
        #[arg(long)]
        up_to: Option<Ts>,
    },

    /// Remove sealed segments whose max commit ts is below `--up-to`
    Gc {
        #[command(flatten)]
        target: Target,

        #[arg(long)]
        up_to: Ts,
    },

    /// Remove every log and the meta of a changefeed
    Delete {
        #[command(flatten)]
        target: Target,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dump() {
        let cli = Cli::try_parse_from([
            "cdc-redo",
            "dump",
            "--storage",
            "local:///tmp/redo",
            "--changefeed",
            "cf",
            "--up-to",
            "200",
        ])
        .unwrap();
        match cli.command {
            Command::Dump {
                target,
                after,
                up_to,
            } => {
                assert_eq!(target.namespace, "default");
                assert_eq!(target.changefeed, "cf");
                assert_eq!(after, None);
                assert_eq!(up_to, Some(200));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_gc_requires_up_to() {
        assert!(Cli::try_parse_from([
            "cdc-redo",
            "gc",
            "--storage",
            "local:///tmp/redo",
            "--changefeed",
            "cf",
        ])
        .is_err());
    }
}

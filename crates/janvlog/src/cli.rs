//! Command-line surface: two forms per the spec — run the live capture
//! loop with no subcommand, or `regenerate <raw-log-path>` to replay the
//! report pipeline on an existing raw log and exit.
//!
//! Grounded on the ambient-stack decision in SPEC_FULL.md to use `clap`
//! derive here (the teacher's own binaries hand-roll `std::env::args()`
//! parsing, but every subcommand-shaped CLI in the wider pack reaches for
//! `clap` derive instead).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "janvlog", about = "Conference room recorder and report pipeline")]
pub struct Args {
    /// Path to the TOML settings file.
    #[arg(long, default_value = "config.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Replay the report pipeline on an existing raw log and exit once done.
    Regenerate {
        /// Path to a `logs/raw/room-<id>/<unix-sec>.jsonl` file.
        raw_log_path: PathBuf,
    },
}

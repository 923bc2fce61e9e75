//! navidrome-restore - carry a music library's history into Navidrome.
//!
//! Reads an exported `Library.xml` and restores play counts, ratings,
//! last-played and date-added values and ordinary playlists into a Navidrome
//! database. A second command finds albums the server shows as several
//! because their tags disagree, and rewrites the tags so they group again.

pub mod cli;
pub mod config;
pub mod consensus;
pub mod db;
pub mod error;
pub mod library;
pub mod matcher;
pub mod merge;
pub mod model;
pub mod playlists;
pub mod report;
pub mod splits;
pub mod tags;
#[cfg(test)]
pub mod test_utils;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Log targets used across the crate.
const LOG_TARGETS: &[&str] = &[
    "navidrome_restore",
    "library",
    "store",
    "matcher",
    "merge",
    "playlists",
    "splits",
    "consensus",
    "tags",
];

fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    // Initialize logging
    let level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directives: Vec<String> = LOG_TARGETS.iter().map(|t| format!("{t}={level}")).collect();
        EnvFilter::new(format!("warn,{}", directives.join(",")))
    });
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();

    cli::run_command(&args)
}

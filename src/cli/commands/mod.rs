//! CLI command definitions and dispatch.
//!
//! Each subcommand is implemented in its own submodule:
//! - `migrate`: Restore play counts, ratings, dates and playlists
//! - `splits`: Detect and fix albums split by inconsistent tags
//! - `users`: List store users

mod migrate;
mod splits;
mod users;

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::config::{self, Config};

pub use migrate::{MigrateArgs, cmd_migrate};
pub use splits::{FixSplitsArgs, cmd_fix_splits};
pub use users::cmd_list_users;

/// Restore library history from a Library.xml export into a Navidrome store
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: <config dir>/navidrome-restore/config.toml)
    #[arg(long, global = true, env = "NAVIDROME_RESTORE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Migrate play counts, ratings, dates and playlists into the store
    Migrate {
        /// Path to the exported Library.xml
        #[arg(short, long)]
        library: Option<PathBuf>,
        /// Path to navidrome.db
        #[arg(short, long)]
        database: Option<PathBuf>,
        /// Target user id or username (default: the only user)
        #[arg(short, long)]
        user: Option<String>,
        /// Location prefix to strip (default: auto-detect)
        #[arg(long)]
        prefix: Option<String>,
        /// Music directory the store paths are relative to
        #[arg(long)]
        music_root: Option<PathBuf>,
        /// Do not migrate playlists
        #[arg(long)]
        skip_playlists: bool,
        /// Do not migrate date-added
        #[arg(long)]
        skip_date_added: bool,
        /// Run everything, then roll back
        #[arg(long)]
        dry_run: bool,
        /// List unmatched tracks
        #[arg(long)]
        show_unmatched: bool,
        /// How many unmatched tracks to list
        #[arg(long, default_value = "50")]
        unmatched_limit: usize,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Find albums split by inconsistent tags and fix the tags
    FixSplits {
        /// Path to navidrome.db
        #[arg(short, long)]
        database: Option<PathBuf>,
        /// Music directory the store paths are relative to
        #[arg(short, long)]
        music_dir: Option<PathBuf>,
        /// Write changes to files (default: dry run)
        #[arg(long)]
        apply: bool,
        /// Strip the MusicBrainz album id from albums where only some tracks carry it
        #[arg(long)]
        fix_mbz: bool,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// List users in the store
    ListUsers {
        /// Path to navidrome.db
        #[arg(short, long)]
        database: Option<PathBuf>,
    },
}

/// Run the specified CLI command.
pub fn run_command(cli: &Cli) -> anyhow::Result<()> {
    let config = config::load(cli.config.as_deref())?;
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    match &cli.command {
        Commands::Migrate {
            library,
            database,
            user,
            prefix,
            music_root,
            skip_playlists,
            skip_date_added,
            dry_run,
            show_unmatched,
            unmatched_limit,
            json,
        } => {
            let args = MigrateArgs {
                library: library.clone().unwrap_or_else(|| config.source.library.clone()),
                database: database_path(database.as_deref(), &config),
                user: user.clone().or_else(|| config.store.user.clone()),
                prefix: prefix.clone().or_else(|| config.source.music_prefix.clone()),
                music_root: music_root.clone().or_else(|| config.store.music_root.clone()),
                fuzzy_threshold: config.matching.fuzzy_threshold,
                playlists: config.migrate.playlists && !skip_playlists,
                date_added: config.migrate.date_added && !skip_date_added,
                dry_run: *dry_run,
                unmatched_limit: show_unmatched.then_some(*unmatched_limit),
                json: *json,
            };
            cmd_migrate(&rt, &args)
        }
        Commands::FixSplits {
            database,
            music_dir,
            apply,
            fix_mbz,
            json,
        } => {
            let Some(music_dir) = music_dir.clone().or_else(|| config.store.music_root.clone())
            else {
                anyhow::bail!("--music-dir is required (or set store.music_root in the config)");
            };
            let args = FixSplitsArgs {
                database: database_path(database.as_deref(), &config),
                music_dir,
                apply: *apply,
                fix_mbz: *fix_mbz,
                json: *json,
            };
            cmd_fix_splits(&rt, &args)
        }
        Commands::ListUsers { database } => {
            cmd_list_users(&rt, &database_path(database.as_deref(), &config))
        }
    }
}

// ============================================================================
// Shared helper functions
// ============================================================================

fn database_path(flag: Option<&Path>, config: &Config) -> PathBuf {
    flag.map(Path::to_path_buf)
        .unwrap_or_else(|| config.store.path.clone())
}

/// The music directory as a string, for stripping from store paths that start with it.
pub(crate) fn root_str(root: Option<&Path>) -> Option<String> {
    root.map(|r| r.to_string_lossy().to_string())
}

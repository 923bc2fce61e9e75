//! Command-line interface for navidrome-restore.
//!
//! This module provides the `migrate`, `fix-splits`, and `list-users`
//! commands.

mod commands;

pub use commands::{Cli, Commands, run_command};

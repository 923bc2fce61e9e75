//! Application-wide error types.
//!
//! This module provides a unified error hierarchy for the application.
//! Library modules return [`Result`] built on [`Error`], while
//! CLI/main uses `anyhow` for convenient error propagation.
//!
//! # Design
//!
//! - [`Error`]: fatal conditions that abort a run before anything commits
//! - Per-item problems (unmatched tracks, failed tag writes) are never
//!   errors here; they are collected into the run reports instead.
//!
//! # Example
//!
//! ```ignore
//! use navidrome_restore::error::{Error, Result};
//!
//! async fn run(path: &Path) -> Result<()> {
//!     let store = Store::open(path).await?; // locked store is fatal
//!     let catalog = library::load(&catalog_path, None)?;
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level application error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Source catalog could not be read or is not a valid export
    #[error("Invalid library export {path}: {message}")]
    Catalog { path: PathBuf, message: String },

    /// Store file is held by another process
    #[error("Database {0} is locked; stop the server before running")]
    StoreLocked(PathBuf),

    /// Store file does not exist
    #[error("Database not found: {0}")]
    StoreMissing(PathBuf),

    /// The store has no user accounts
    #[error("No users found in the database")]
    NoUsers,

    /// More than one user and none selected
    #[error("Multiple users found ({0}); select one with --user")]
    AmbiguousUser(String),

    /// Selected user does not exist
    #[error("User not found: {0}")]
    UnknownUser(String),

    /// Metadata reading/writing error
    #[error("Metadata error for {path}: {message}")]
    Metadata { path: PathBuf, message: String },

    /// Audio container without a supported tag scheme
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(PathBuf),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a catalog error.
    pub fn catalog(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Catalog {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a metadata error.
    pub fn metadata(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Metadata {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Add context to an error.
    pub fn context(self, ctx: impl Into<String>) -> Self {
        Self::WithContext {
            context: ctx.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error (or the error it wraps) reports a held store lock.
    pub fn is_lock(&self) -> bool {
        match self {
            Error::StoreLocked(_) => true,
            Error::Database(e) => is_lock_error(e),
            Error::WithContext { source, .. } => source.is_lock(),
            _ => false,
        }
    }
}

/// SQLITE_BUSY / SQLITE_LOCKED and their extended codes.
pub(crate) fn is_lock_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            let code_busy = db
                .code()
                .and_then(|c| c.parse::<i32>().ok())
                .is_some_and(|c| matches!(c & 0xff, 5 | 6));
            code_busy || db.message().contains("database is locked")
        }
        _ => false,
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn with_context(self, ctx: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Io(e).context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, sqlx::Error> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Database(e).context(ctx))
    }
}

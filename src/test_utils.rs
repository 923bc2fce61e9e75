//! Test utilities and fixtures for navidrome-restore tests.
//!
//! This module provides a temporary store with the server's schema,
//! row fixtures, a catalog export builder, and an in-memory tag double.
//!
//! # Example
//!
//! ```ignore
//! use navidrome_restore::test_utils::{temp_store, insert_media_file, MediaFileFixture};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let (store, _dir) = temp_store().await;
//!     let mut conn = store.pool().acquire().await.unwrap();
//!     insert_media_file(&mut conn, &MediaFileFixture::new("f1", "A/B/01.mp3")).await;
//!     // ... test logic
//! }
//! ```

use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePoolOptions};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::db::Store;
use crate::error::{Error, Result};
use crate::tags::{TagIo, TagSnapshot};

/// The subset of the server schema this crate reads and writes.
const SCHEMA: &str = r#"
CREATE TABLE user (
    id VARCHAR(255) NOT NULL PRIMARY KEY,
    user_name VARCHAR(255) NOT NULL UNIQUE,
    name VARCHAR(255) NOT NULL DEFAULT '',
    is_admin BOOL NOT NULL DEFAULT false
);
CREATE TABLE album (
    id VARCHAR(255) NOT NULL PRIMARY KEY,
    name VARCHAR(255) NOT NULL DEFAULT '',
    album_artist VARCHAR(255) NOT NULL DEFAULT '',
    created_at DATETIME,
    updated_at DATETIME
);
CREATE TABLE media_file (
    id VARCHAR(255) NOT NULL PRIMARY KEY,
    path VARCHAR(255) NOT NULL DEFAULT '',
    title VARCHAR(255) NOT NULL DEFAULT '',
    album VARCHAR(255) NOT NULL DEFAULT '',
    artist VARCHAR(255) NOT NULL DEFAULT '',
    artist_id VARCHAR(255) NOT NULL DEFAULT '',
    album_artist VARCHAR(255) NOT NULL DEFAULT '',
    album_id VARCHAR(255) NOT NULL DEFAULT '',
    album_artist_id VARCHAR(255) NOT NULL DEFAULT '',
    release_date VARCHAR(255) NOT NULL DEFAULT '',
    mbz_album_id VARCHAR(255) NOT NULL DEFAULT '',
    disc_number INTEGER NOT NULL DEFAULT 0,
    track_number INTEGER NOT NULL DEFAULT 0,
    created_at DATETIME,
    updated_at DATETIME
);
CREATE TABLE media_file_artists (
    media_file_id VARCHAR(255) NOT NULL,
    artist_id VARCHAR(255) NOT NULL,
    role VARCHAR(255) NOT NULL DEFAULT '',
    sub_role VARCHAR(255) NOT NULL DEFAULT '',
    UNIQUE (media_file_id, artist_id, role, sub_role)
);
CREATE TABLE annotation (
    user_id VARCHAR(255) NOT NULL DEFAULT '',
    item_id VARCHAR(255) NOT NULL DEFAULT '',
    item_type VARCHAR(255) NOT NULL DEFAULT '',
    play_count INTEGER DEFAULT 0,
    play_date DATETIME,
    rating INTEGER DEFAULT 0,
    starred BOOL NOT NULL DEFAULT false,
    starred_at DATETIME,
    UNIQUE (user_id, item_id, item_type)
);
CREATE TABLE playlist (
    id VARCHAR(255) NOT NULL PRIMARY KEY,
    name VARCHAR(255) NOT NULL DEFAULT '',
    comment VARCHAR(255) NOT NULL DEFAULT '',
    duration REAL NOT NULL DEFAULT 0,
    song_count INTEGER NOT NULL DEFAULT 0,
    public BOOL NOT NULL DEFAULT false,
    created_at DATETIME,
    updated_at DATETIME,
    owner_id VARCHAR(255) NOT NULL
);
CREATE TABLE playlist_tracks (
    id INTEGER NOT NULL DEFAULT 0,
    playlist_id VARCHAR(255) NOT NULL,
    media_file_id VARCHAR(255) NOT NULL,
    UNIQUE (playlist_id, id)
);
"#;

/// Creates a temporary store for testing.
///
/// The database is created in a temporary directory that is automatically
/// cleaned up when the returned `TempDir` is dropped.
///
/// # Returns
///
/// A tuple of (store, temp directory handle).
/// Keep the TempDir alive for the duration of your test.
pub async fn temp_store() -> (Store, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let db_path = dir.path().join("navidrome.db");

    let options = SqliteConnectOptions::new()
        .filename(&db_path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("Failed to create test database");
    sqlx::raw_sql(SCHEMA)
        .execute(&pool)
        .await
        .expect("Failed to create schema");
    pool.close().await;

    let store = Store::open(&db_path)
        .await
        .expect("Failed to open test store");
    (store, dir)
}

/// Inserts a user account.
pub async fn insert_user(conn: &mut SqliteConnection, id: &str, user_name: &str) {
    sqlx::query("INSERT INTO user (id, user_name, name) VALUES (?, ?, ?)")
        .bind(id)
        .bind(user_name)
        .bind(user_name)
        .execute(conn)
        .await
        .expect("Failed to insert user");
}

/// Inserts an album row.
pub async fn insert_album(conn: &mut SqliteConnection, id: &str, name: &str, created_at: Option<&str>) {
    sqlx::query("INSERT INTO album (id, name, created_at) VALUES (?, ?, ?)")
        .bind(id)
        .bind(name)
        .bind(created_at)
        .execute(conn)
        .await
        .expect("Failed to insert album");
}

/// A media file row. Customize with struct update syntax:
///
/// ```ignore
/// let file = MediaFileFixture {
///     album: "Blue".into(),
///     ..MediaFileFixture::new("f1", "Joni/Blue/01.mp3")
/// };
/// ```
#[derive(Debug, Clone, Default)]
pub struct MediaFileFixture {
    pub id: String,
    pub path: String,
    pub title: String,
    pub artist: String,
    pub artist_id: String,
    pub album: String,
    pub album_artist: String,
    pub album_id: String,
    pub release_date: String,
    pub mbz_album_id: String,
    pub track_number: i64,
    pub created_at: Option<String>,
    /// Extra `media_file_artists` credits with role `artist`
    pub featured_artist_ids: Vec<String>,
}

impl MediaFileFixture {
    pub fn new(id: &str, path: &str) -> Self {
        Self {
            id: id.to_string(),
            path: path.to_string(),
            title: format!("Track {id}"),
            artist: "Test Artist".to_string(),
            artist_id: "artist-1".to_string(),
            album: "Test Album".to_string(),
            album_artist: "Test Artist".to_string(),
            album_id: "album-1".to_string(),
            ..Default::default()
        }
    }
}

/// Inserts a media file and its primary artist credit.
pub async fn insert_media_file(conn: &mut SqliteConnection, file: &MediaFileFixture) {
    sqlx::query(
        r#"
        INSERT INTO media_file
            (id, path, title, artist, artist_id, album, album_artist, album_id,
             release_date, mbz_album_id, track_number, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&file.id)
    .bind(&file.path)
    .bind(&file.title)
    .bind(&file.artist)
    .bind(&file.artist_id)
    .bind(&file.album)
    .bind(&file.album_artist)
    .bind(&file.album_id)
    .bind(&file.release_date)
    .bind(&file.mbz_album_id)
    .bind(file.track_number)
    .bind(&file.created_at)
    .execute(&mut *conn)
    .await
    .expect("Failed to insert media file");

    let credits = std::iter::once(&file.artist_id).chain(&file.featured_artist_ids);
    for artist_id in credits.filter(|id| !id.is_empty()) {
        sqlx::query(
            "INSERT INTO media_file_artists (media_file_id, artist_id, role) VALUES (?, ?, 'artist')",
        )
        .bind(&file.id)
        .bind(artist_id)
        .execute(&mut *conn)
        .await
        .expect("Failed to insert artist credit");
    }
}

/// Wraps track and playlist bodies in a minimal library export.
///
/// `tracks` goes inside the `Tracks` dict, `playlists` inside the
/// `Playlists` array.
pub fn library_xml(tracks: &str, playlists: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple Computer//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>Major Version</key><integer>1</integer>
    <key>Minor Version</key><integer>1</integer>
    <key>Application Version</key><string>12.9.5.5</string>
    <key>Tracks</key>
    <dict>
{tracks}
    </dict>
    <key>Playlists</key>
    <array>
{playlists}
    </array>
</dict>
</plist>
"#
    )
}

/// In-memory [`TagIo`] double.
///
/// Files are keyed by path; paths never added read as missing.
#[derive(Debug, Default)]
pub struct MemoryTags {
    files: RefCell<HashMap<PathBuf, TagSnapshot>>,
    writes: RefCell<Vec<PathBuf>>,
    failing: HashSet<PathBuf>,
}

impl MemoryTags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file with the given release date and release id.
    pub fn with_file(self, path: &str, release_date: &str, stable_id: &str) -> Self {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        self.files.borrow_mut().insert(
            PathBuf::from(path),
            TagSnapshot {
                release_date: non_empty(release_date),
                stable_id: non_empty(stable_id),
                ..Default::default()
            },
        );
        self
    }

    /// Sets the recording date of a file added with [`Self::with_file`].
    pub fn with_recording_date(self, path: &str, date: &str) -> Self {
        if let Some(snapshot) = self.files.borrow_mut().get_mut(Path::new(path)) {
            snapshot.recording_date = Some(date.to_string());
        }
        self
    }

    /// Makes every write to `path` fail.
    pub fn failing(mut self, path: &str) -> Self {
        self.failing.insert(PathBuf::from(path));
        self
    }

    pub fn snapshot(&self, path: &str) -> Option<TagSnapshot> {
        self.files.borrow().get(Path::new(path)).cloned()
    }

    /// Paths written so far, in order.
    pub fn writes(&self) -> Vec<PathBuf> {
        self.writes.borrow().clone()
    }

    fn update(&self, path: &Path, apply: impl FnOnce(&mut TagSnapshot)) -> Result<()> {
        if self.failing.contains(path) {
            return Err(Error::metadata(path, "simulated write failure"));
        }
        let mut files = self.files.borrow_mut();
        let snapshot = files
            .get_mut(path)
            .ok_or_else(|| Error::metadata(path, "no such file"))?;
        apply(snapshot);
        self.writes.borrow_mut().push(path.to_path_buf());
        Ok(())
    }
}

impl TagIo for MemoryTags {
    fn exists(&self, path: &Path) -> bool {
        self.files.borrow().contains_key(path)
    }

    fn read(&self, path: &Path) -> Result<TagSnapshot> {
        self.files
            .borrow()
            .get(path)
            .cloned()
            .ok_or_else(|| Error::metadata(path, "no such file"))
    }

    fn set_release_date(&self, path: &Path, value: Option<&str>) -> Result<()> {
        self.update(path, |s| s.release_date = value.map(str::to_string))
    }

    fn set_stable_id(&self, path: &Path, value: Option<&str>) -> Result<()> {
        self.update(path, |s| s.stable_id = value.map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_temp_store_creates_working_database() {
        let (store, _dir) = temp_store().await;
        let mut conn = store.pool().acquire().await.unwrap();

        let files = crate::db::load_target_files(&mut conn).await.unwrap();
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn test_insert_media_file() {
        let (store, _dir) = temp_store().await;
        let mut conn = store.pool().acquire().await.unwrap();

        insert_media_file(&mut conn, &MediaFileFixture::new("f1", "A/B/01.mp3")).await;

        let files = crate::db::load_target_files(&mut conn).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "A/B/01.mp3");
        assert_eq!(files[0].title, "Track f1");
    }

    #[test]
    fn test_memory_tags_writes_and_failures() {
        let tags = MemoryTags::new()
            .with_file("a.mp3", "2001", "")
            .with_file("b.mp3", "", "")
            .failing("b.mp3");

        tags.set_release_date(Path::new("a.mp3"), None).unwrap();
        assert_eq!(tags.snapshot("a.mp3").unwrap().release_date, None);
        assert!(tags.set_release_date(Path::new("b.mp3"), Some("2001")).is_err());
        assert!(tags.read(Path::new("c.mp3")).is_err());
        assert_eq!(tags.writes(), vec![PathBuf::from("a.mp3")]);
    }
}

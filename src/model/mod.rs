//! Core data models shared by the migration and split-fix pipelines.
//!
//! - [`SourceTrack`] / [`SourcePlaylist`]: records from the exported catalog
//! - [`TargetFile`]: a `media_file` row in the server database
//! - [`Annotation`]: play/rating/date facts for a track, album, or artist
//!
//! # Database Schema
//!
//! The store models map to the server's own tables:
//! - `media_file` - one row per audio file
//! - `annotation` - per-user facts keyed by (item_id, item_type)
//! - `playlist` / `playlist_tracks` - user playlists

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// Timestamp type used for all catalog and store dates.
pub type Timestamp = DateTime<Utc>;

/// Storage format the server uses for datetime columns. Fractional
/// seconds are printed only when present.
pub const STORE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Format a timestamp the way the store writes it, keeping subsecond precision.
pub fn format_timestamp(ts: &Timestamp) -> String {
    ts.format(STORE_TIME_FORMAT).to_string()
}

/// Parse a datetime column value.
///
/// Accepts the plain store format (with or without fractional seconds)
/// and RFC 3339, which the server uses for some columns.
pub fn parse_timestamp(raw: &str) -> Option<Timestamp> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    // Datetimes with an offset suffix, e.g. "2024-01-02 10:00:00+00:00"
    DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%:z")
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// A track record from the exported catalog.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceTrack {
    /// Catalog-local track id, referenced by playlists
    pub track_id: i64,
    /// Stable identifier assigned by the source application
    pub persistent_id: String,
    /// Path relative to the music prefix; `None` if the location
    /// was missing or outside the prefix
    pub path: Option<String>,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub album_artist: String,
    pub play_count: i64,
    /// Source scale 0-100; 0 means unrated
    pub rating: u32,
    /// Album rating (0-100) if set on this track
    pub album_rating: u32,
    /// Whether the album rating was derived by the source app rather than set
    pub album_rating_computed: bool,
    pub last_played: Option<Timestamp>,
    pub date_added: Option<Timestamp>,
}

impl SourceTrack {
    /// Whether this track carries any listening history worth migrating.
    pub fn has_stats(&self) -> bool {
        self.play_count > 0 || self.rating > 0 || self.last_played.is_some()
    }

    /// Album artist, falling back to the track artist.
    pub fn effective_album_artist(&self) -> &str {
        if self.album_artist.trim().is_empty() {
            &self.artist
        } else {
            &self.album_artist
        }
    }
}

/// An ordinary (non-smart, non-system) playlist from the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourcePlaylist {
    pub name: String,
    /// Catalog track ids in playlist order
    pub track_ids: Vec<i64>,
}

/// A `media_file` row in the target store.
#[derive(Debug, Clone, Default, PartialEq, Eq, FromRow)]
pub struct TargetFile {
    pub id: String,
    /// Path as stored, made relative to the music root when loaded
    pub path: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub album_artist: String,
    pub album_id: Option<String>,
    pub artist_id: Option<String>,
}

/// The subject an annotation describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Track,
    Album,
    Artist,
}

impl ItemKind {
    /// `item_type` value in the annotation table.
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Track => "media_file",
            ItemKind::Album => "album",
            ItemKind::Artist => "artist",
        }
    }
}

/// Listening facts about one subject.
///
/// `rating` is on the store's 1-5 scale; `None` means unrated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Annotation {
    pub play_count: i64,
    pub rating: Option<u8>,
    pub last_played: Option<Timestamp>,
    pub date_added: Option<Timestamp>,
}

/// A user account in the store.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct User {
    pub id: String,
    pub user_name: String,
    pub name: String,
}

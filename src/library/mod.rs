//! Source catalog parsing.
//!
//! Reads the XML property list exported by the desktop media library
//! ("Library.xml") and turns it into [`SourceTrack`]s and ordinary
//! [`SourcePlaylist`]s. Smart, system, and folder playlists never make
//! it past this module.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::SystemTime;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::matcher::normalize_field;
use crate::model::{SourcePlaylist, SourceTrack, Timestamp};

/// Built-in playlists the source application creates on its own.
const SYSTEM_PLAYLISTS: &[&str] = &[
    "Library",
    "Music",
    "Downloaded",
    "Movies",
    "TV Shows",
    "Podcasts",
    "Audiobooks",
    "Books",
    "PDFs",
    "Genius",
];

/// Path segment used to auto-detect the music prefix.
const MUSIC_SEGMENT: &str = "/Music/";

#[derive(Debug, Deserialize)]
struct RawLibrary {
    #[serde(rename = "Tracks", default)]
    tracks: HashMap<String, RawTrack>,
    #[serde(rename = "Playlists", default)]
    playlists: Vec<RawPlaylist>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawTrack {
    #[serde(rename = "Track ID")]
    track_id: i64,
    #[serde(rename = "Persistent ID")]
    persistent_id: String,
    #[serde(rename = "Location")]
    location: Option<String>,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Artist")]
    artist: String,
    #[serde(rename = "Album")]
    album: String,
    #[serde(rename = "Album Artist")]
    album_artist: String,
    #[serde(rename = "Play Count")]
    play_count: i64,
    #[serde(rename = "Rating")]
    rating: u32,
    #[serde(rename = "Album Rating")]
    album_rating: u32,
    #[serde(rename = "Album Rating Computed")]
    album_rating_computed: bool,
    #[serde(rename = "Play Date UTC")]
    play_date_utc: Option<plist::Date>,
    #[serde(rename = "Date Added")]
    date_added: Option<plist::Date>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPlaylist {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Master")]
    master: bool,
    #[serde(rename = "Folder")]
    folder: bool,
    #[serde(rename = "Distinguished Kind")]
    distinguished_kind: Option<i64>,
    #[serde(rename = "Smart Info")]
    smart_info: Option<plist::Value>,
    #[serde(rename = "Smart Criteria")]
    smart_criteria: Option<plist::Value>,
    #[serde(rename = "Playlist Items")]
    items: Vec<RawPlaylistItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPlaylistItem {
    #[serde(rename = "Track ID")]
    track_id: i64,
}

impl RawPlaylist {
    /// Reason this playlist is excluded from migration, if any.
    fn skip_reason(&self) -> Option<&'static str> {
        if self.smart_info.is_some() || self.smart_criteria.is_some() {
            Some("smart")
        } else if self.master || self.distinguished_kind.is_some() {
            Some("system")
        } else if SYSTEM_PLAYLISTS.contains(&self.name.as_str()) {
            Some("system")
        } else if self.folder {
            Some("folder")
        } else if self.items.is_empty() {
            Some("empty")
        } else {
            None
        }
    }
}

/// Album key used for explicit album ratings: normalized (album, album artist).
pub type AlbumKey = (String, String);

/// A parsed source catalog.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    /// All tracks, ordered by catalog track id
    pub tracks: Vec<SourceTrack>,
    /// Ordinary playlists in export order
    pub playlists: Vec<SourcePlaylist>,
    /// Number of playlists excluded (smart, system, folder, empty)
    pub skipped_playlists: usize,
    /// Prefix stripped from locations to produce relative paths
    pub music_prefix: Option<String>,
    /// Explicit (user-set) album ratings on the source 0-100 scale
    pub album_ratings: HashMap<AlbumKey, u32>,
}

impl Catalog {
    /// Tracks that carry play counts, ratings, or play dates.
    pub fn tracks_with_stats(&self) -> usize {
        self.tracks.iter().filter(|t| t.has_stats()).count()
    }
}

/// Load and parse a catalog export from disk.
///
/// `music_prefix` overrides prefix auto-detection.
pub fn load(path: &Path, music_prefix: Option<&str>) -> Result<Catalog> {
    if !path.exists() {
        return Err(Error::catalog(path, "file not found"));
    }
    let bytes = std::fs::read(path).map_err(|e| Error::catalog(path, e.to_string()))?;
    let catalog = parse(&bytes, music_prefix).map_err(|e| match e {
        Error::Catalog { message, .. } => Error::catalog(path, message),
        other => other,
    })?;
    info!(
        target: "library",
        path = %path.display(),
        tracks = catalog.tracks.len(),
        playlists = catalog.playlists.len(),
        "Parsed library export"
    );
    Ok(catalog)
}

/// Parse catalog bytes (XML or binary property list).
pub fn parse(bytes: &[u8], music_prefix: Option<&str>) -> Result<Catalog> {
    let raw: RawLibrary =
        plist::from_bytes(bytes).map_err(|e| Error::catalog("<library>", e.to_string()))?;

    let mut raw_tracks: Vec<(i64, RawTrack)> = raw
        .tracks
        .into_iter()
        .map(|(key, track)| {
            let id = if track.track_id != 0 {
                track.track_id
            } else {
                key.parse().unwrap_or_default()
            };
            (id, track)
        })
        .collect();
    raw_tracks.sort_by_key(|(id, _)| *id);

    let decoded: Vec<Option<String>> = raw_tracks
        .iter()
        .map(|(_, t)| t.location.as_deref().map(location_to_path))
        .collect();

    let music_prefix = match music_prefix {
        Some(p) => Some(p.to_string()),
        None => {
            let detected = detect_music_prefix(decoded.iter().flatten().map(String::as_str));
            if let Some(ref p) = detected {
                info!(target: "library", prefix = %p, "Auto-detected music prefix");
            }
            detected
        }
    };

    let mut tracks = Vec::with_capacity(raw_tracks.len());
    for ((track_id, raw), full_path) in raw_tracks.into_iter().zip(decoded) {
        let path = full_path.and_then(|p| relative_path(&p, music_prefix.as_deref()));
        if path.is_none() {
            debug!(target: "library", track_id, title = %raw.name, "No usable path for track");
        }
        tracks.push(SourceTrack {
            track_id,
            persistent_id: raw.persistent_id,
            path,
            title: raw.name,
            artist: raw.artist,
            album: raw.album,
            album_artist: raw.album_artist,
            play_count: raw.play_count.max(0),
            rating: raw.rating.min(100),
            album_rating: raw.album_rating.min(100),
            album_rating_computed: raw.album_rating_computed,
            last_played: raw.play_date_utc.map(to_timestamp),
            date_added: raw.date_added.map(to_timestamp),
        });
    }

    let mut playlists = Vec::new();
    let mut skipped_playlists = 0;
    for playlist in raw.playlists {
        if let Some(reason) = playlist.skip_reason() {
            debug!(target: "library", name = %playlist.name, reason, "Skipping playlist");
            skipped_playlists += 1;
            continue;
        }
        playlists.push(SourcePlaylist {
            name: playlist.name,
            track_ids: playlist
                .items
                .into_iter()
                .map(|item| item.track_id)
                .filter(|id| *id != 0)
                .collect(),
        });
    }

    let album_ratings = explicit_album_ratings(&tracks);

    Ok(Catalog {
        tracks,
        playlists,
        skipped_playlists,
        music_prefix,
        album_ratings,
    })
}

fn to_timestamp(date: plist::Date) -> Timestamp {
    let system: SystemTime = date.into();
    DateTime::<Utc>::from(system)
}

/// Convert a `file://` location URL into a decoded filesystem path.
pub fn location_to_path(location: &str) -> String {
    let rest = location
        .strip_prefix("file://")
        .map(|r| r.strip_prefix("localhost").unwrap_or(r))
        .unwrap_or(location);
    match urlencoding::decode(rest) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => rest.to_string(),
    }
}

/// Most common prefix ending in `/Music/` among the given paths.
pub fn detect_music_prefix<'a>(paths: impl Iterator<Item = &'a str>) -> Option<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for path in paths {
        if let Some(idx) = path.find(MUSIC_SEGMENT) {
            *counts.entry(&path[..idx + MUSIC_SEGMENT.len()]).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .max_by(|(pa, ca), (pb, cb)| ca.cmp(cb).then_with(|| pb.cmp(pa)))
        .map(|(prefix, _)| prefix.to_string())
}

fn relative_path(path: &str, prefix: Option<&str>) -> Option<String> {
    match prefix {
        Some(prefix) => path
            .strip_prefix(prefix)
            .filter(|rest| !rest.is_empty())
            .map(str::to_string),
        None => Some(path.to_string()),
    }
}

/// Most common non-computed album rating per album; ties go to the higher rating.
fn explicit_album_ratings(tracks: &[SourceTrack]) -> HashMap<AlbumKey, u32> {
    let mut votes: HashMap<AlbumKey, HashMap<u32, usize>> = HashMap::new();
    for track in tracks {
        if track.album_rating == 0 || track.album_rating_computed {
            continue;
        }
        let key = (
            normalize_field(&track.album),
            normalize_field(track.effective_album_artist()),
        );
        *votes
            .entry(key)
            .or_default()
            .entry(track.album_rating)
            .or_default() += 1;
    }

    votes
        .into_iter()
        .filter_map(|(key, counter)| {
            counter
                .into_iter()
                .max_by(|(ra, ca), (rb, cb)| ca.cmp(cb).then(ra.cmp(rb)))
                .map(|(rating, _)| (key, rating))
        })
        .collect()
}

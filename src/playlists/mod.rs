//! Playlist synchronization.
//!
//! Ordinary source playlists are mirrored into the store for the target
//! user. A playlist with the same name and owner is reused and its entries
//! rewritten, so repeated runs never duplicate playlists or entries.

use chrono::Utc;
use serde::Serialize;
use sqlx::sqlite::SqliteConnection;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db;
use crate::error::Result;
use crate::matcher::MatchSet;
use crate::model::SourcePlaylist;

/// Counts from one playlist pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlaylistReport {
    /// Ordinary playlists offered for migration
    pub found: usize,
    pub created: usize,
    pub replaced: usize,
    pub entries_written: usize,
    /// Entries whose source track has no store file
    pub entries_skipped: usize,
}

impl PlaylistReport {
    pub fn migrated(&self) -> usize {
        self.created + self.replaced
    }
}

/// Resolve a playlist's tracks to store file ids, keeping source order.
///
/// Returns the resolved ids and the number of unresolved entries.
pub fn resolve_entries(playlist: &SourcePlaylist, matches: &MatchSet) -> (Vec<String>, usize) {
    let mut resolved = Vec::with_capacity(playlist.track_ids.len());
    let mut skipped = 0;
    for track_id in &playlist.track_ids {
        match matches.resolve(*track_id) {
            Some(id) => resolved.push(id.to_string()),
            None => skipped += 1,
        }
    }
    (resolved, skipped)
}

/// Write every playlist for `owner_id`.
pub async fn sync_playlists(
    conn: &mut SqliteConnection,
    owner_id: &str,
    playlists: &[SourcePlaylist],
    matches: &MatchSet,
) -> Result<PlaylistReport> {
    let mut report = PlaylistReport {
        found: playlists.len(),
        ..Default::default()
    };
    let now = Utc::now();

    for playlist in playlists {
        let (entries, skipped) = resolve_entries(playlist, matches);

        let playlist_id = match db::find_playlist(&mut *conn, &playlist.name, owner_id).await? {
            Some(id) => {
                report.replaced += 1;
                id
            }
            None => {
                let id = Uuid::new_v4().to_string();
                db::create_playlist(&mut *conn, &id, &playlist.name, owner_id, &now).await?;
                report.created += 1;
                id
            }
        };
        db::replace_playlist_tracks(&mut *conn, &playlist_id, &entries, &now).await?;

        debug!(
            target: "playlists",
            name = %playlist.name,
            entries = entries.len(),
            skipped,
            "Playlist written"
        );
        report.entries_written += entries.len();
        report.entries_skipped += skipped;
    }

    info!(
        target: "playlists",
        migrated = report.migrated(),
        entries = report.entries_written,
        skipped = report.entries_skipped,
        "Playlists synchronized"
    );
    Ok(report)
}

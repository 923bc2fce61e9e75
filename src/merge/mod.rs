//! Annotation merging.
//!
//! Source listening history is folded into the store so that stored values
//! only ever improve:
//!
//! | Field | Merge |
//! |---|---|
//! | play count | `max(existing, source)` per track; albums/artists use the sum of member tracks |
//! | rating | `max(existing, converted)`; unrated is lowest |
//! | last played | `max(existing, source)` |
//! | date added | `min(existing, source)` |
//!
//! Album and artist values are re-derived from the stored track annotations
//! on every run rather than accumulated, so a second run over the same
//! inputs writes nothing.

use serde::Serialize;
use sqlx::sqlite::SqliteConnection;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info};

use crate::db;
use crate::error::Result;
use crate::library::Catalog;
use crate::matcher::{MatchSet, normalize_field};
use crate::model::{Annotation, ItemKind, SourceTrack, TargetFile, Timestamp};

// ============================================================================
// Merge policies
// ============================================================================

/// Map a 0-100 source rating to the store's 1-5 scale.
///
/// 0 is unrated; 1-20 → 1, 21-40 → 2, ..., 81-100 → 5.
pub fn convert_rating(source: u32) -> Option<u8> {
    if source == 0 {
        return None;
    }
    Some(source.div_ceil(20).clamp(1, 5) as u8)
}

/// Later of two optional timestamps.
fn later(a: Option<Timestamp>, b: Option<Timestamp>) -> Option<Timestamp> {
    a.max(b)
}

/// Earlier of two optional timestamps; a known date beats an unknown one.
pub fn merge_date_added(existing: Option<Timestamp>, source: Option<Timestamp>) -> Option<Timestamp> {
    match (existing, source) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Merge source facts into an existing annotation.
///
/// Used at every level: for albums and artists `incoming` carries the
/// derived aggregate instead of a single source track.
pub fn merge_annotation(existing: Option<&Annotation>, incoming: &Annotation) -> Annotation {
    let existing = existing.cloned().unwrap_or_default();
    Annotation {
        play_count: existing.play_count.max(incoming.play_count),
        rating: existing.rating.max(incoming.rating),
        last_played: later(existing.last_played, incoming.last_played),
        date_added: merge_date_added(existing.date_added, incoming.date_added),
    }
}

/// Rounded mean of the rated values, or `None` if nothing is rated.
pub fn mean_rating(ratings: impl IntoIterator<Item = u8>) -> Option<u8> {
    let (sum, count) = ratings
        .into_iter()
        .fold((0u32, 0u32), |(s, c), r| (s + u32::from(r), c + 1));
    if count == 0 {
        return None;
    }
    let mean = f64::from(sum) / f64::from(count);
    Some((mean.round() as u8).clamp(1, 5))
}

/// Album rating: the explicit source rating if set, else the member mean.
pub fn album_rating(explicit: Option<u32>, members: &[Annotation]) -> Option<u8> {
    explicit
        .and_then(convert_rating)
        .or_else(|| mean_rating(members.iter().filter_map(|a| a.rating)))
}

/// Aggregate of member track annotations.
fn aggregate(members: &[Annotation]) -> Annotation {
    Annotation {
        play_count: members.iter().map(|a| a.play_count).sum(),
        rating: mean_rating(members.iter().filter_map(|a| a.rating)),
        last_played: members.iter().filter_map(|a| a.last_played).max(),
        date_added: None,
    }
}

fn source_annotation(track: &SourceTrack) -> Annotation {
    Annotation {
        play_count: track.play_count,
        rating: convert_rating(track.rating),
        last_played: track.last_played,
        date_added: None,
    }
}

// ============================================================================
// Store-backed engine
// ============================================================================

/// What a write did to a stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Updated,
    Unchanged,
}

/// Per-level outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LevelCounts {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl LevelCounts {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Created => self.created += 1,
            Outcome::Updated => self.updated += 1,
            Outcome::Unchanged => self.unchanged += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.created + self.updated + self.unchanged
    }
}

/// Counts from one merge pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub tracks: LevelCounts,
    pub albums: LevelCounts,
    pub artists: LevelCounts,
    /// Albums whose rating came from an explicit source album rating
    pub explicit_album_ratings: usize,
    pub track_dates_updated: usize,
    pub album_dates_updated: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct MergeOptions {
    pub date_added: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self { date_added: true }
    }
}

/// Compare, then write only if the merged value differs.
async fn write_merged(
    conn: &mut SqliteConnection,
    user_id: &str,
    item_id: &str,
    kind: ItemKind,
    incoming: &Annotation,
) -> Result<Outcome> {
    let existing = db::get_annotation(&mut *conn, user_id, item_id, kind).await?;
    let merged = merge_annotation(existing.as_ref(), incoming);

    let outcome = match &existing {
        None => Outcome::Created,
        Some(current) if *current == merged => return Ok(Outcome::Unchanged),
        Some(_) => Outcome::Updated,
    };
    db::upsert_annotation(conn, user_id, item_id, kind, &merged).await?;
    debug!(target: "merge", kind = kind.as_str(), item_id, ?outcome, "Annotation written");
    Ok(outcome)
}

/// Move a stored `created_at` earlier if `candidate` predates it.
///
/// Returns the resulting value and whether it was written.
async fn merge_created_at(
    conn: &mut SqliteConnection,
    kind: ItemKind,
    id: &str,
    candidate: Timestamp,
) -> Result<(Timestamp, bool)> {
    let existing = db::get_created_at(&mut *conn, kind, id).await?;
    let merged = merge_date_added(existing, Some(candidate)).unwrap_or(candidate);
    if existing == Some(merged) {
        return Ok((merged, false));
    }
    let written = db::set_created_at(conn, kind, id, &merged).await?;
    Ok((merged, written))
}

/// Run the full annotation merge for one user.
///
/// `files` is the store snapshot the matches were resolved against.
/// Participating artists come from `artist_links` (media file id, artist id).
pub async fn merge_all(
    conn: &mut SqliteConnection,
    user_id: &str,
    catalog: &Catalog,
    matches: &MatchSet,
    files: &[TargetFile],
    artist_links: &[(String, String)],
    options: MergeOptions,
) -> Result<MergeReport> {
    let mut report = MergeReport::default();
    let tracks: HashMap<i64, &SourceTrack> =
        catalog.tracks.iter().map(|t| (t.track_id, t)).collect();

    // Track level
    let mut file_dates: HashMap<&str, Timestamp> = HashMap::new();
    for m in &matches.matched {
        let Some(track) = tracks.get(&m.track_id) else {
            continue;
        };

        if track.has_stats() {
            let outcome = write_merged(
                &mut *conn,
                user_id,
                &m.target_id,
                ItemKind::Track,
                &source_annotation(track),
            )
            .await?;
            report.tracks.record(outcome);
        }

        if let (true, Some(added)) = (options.date_added, track.date_added) {
            let (merged, written) =
                merge_created_at(&mut *conn, ItemKind::Track, &m.target_id, added).await?;
            file_dates.insert(m.target_id.as_str(), merged);
            if written {
                report.track_dates_updated += 1;
            }
        }
    }

    let stored: HashMap<String, Annotation> = db::track_annotations(&mut *conn, user_id)
        .await?
        .into_iter()
        .collect();

    // Album level
    let mut albums: BTreeMap<&str, Vec<&TargetFile>> = BTreeMap::new();
    for file in files {
        if let Some(album_id) = file.album_id.as_deref() {
            albums.entry(album_id).or_default().push(file);
        }
    }

    for (album_id, members) in &albums {
        let annotated: Vec<Annotation> = members
            .iter()
            .filter_map(|f| stored.get(&f.id).cloned())
            .collect();

        if !annotated.is_empty() {
            let first = members[0];
            let album_artist = if first.album_artist.trim().is_empty() {
                &first.artist
            } else {
                &first.album_artist
            };
            let key = (normalize_field(&first.album), normalize_field(album_artist));
            let explicit = catalog.album_ratings.get(&key).copied();
            if explicit.is_some() {
                report.explicit_album_ratings += 1;
            }

            let incoming = Annotation {
                rating: album_rating(explicit, &annotated),
                ..aggregate(&annotated)
            };
            let outcome = write_merged(&mut *conn, user_id, album_id, ItemKind::Album, &incoming).await?;
            report.albums.record(outcome);
        }

        if let Some(earliest) = members
            .iter()
            .filter_map(|f| file_dates.get(f.id.as_str()).copied())
            .min()
        {
            let (_, written) = merge_created_at(&mut *conn, ItemKind::Album, album_id, earliest).await?;
            if written {
                report.album_dates_updated += 1;
            }
        }
    }

    // Artist level: primary credits plus participations
    let mut artists: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for file in files {
        if let Some(artist_id) = file.artist_id.as_deref() {
            artists.entry(artist_id).or_default().insert(file.id.as_str());
        }
    }
    for (file_id, artist_id) in artist_links {
        artists
            .entry(artist_id.as_str())
            .or_default()
            .insert(file_id.as_str());
    }

    for (artist_id, members) in &artists {
        let annotated: Vec<Annotation> = members
            .iter()
            .filter_map(|id| stored.get(*id).cloned())
            .collect();
        if annotated.is_empty() {
            continue;
        }
        let outcome = write_merged(
            &mut *conn,
            user_id,
            artist_id,
            ItemKind::Artist,
            &aggregate(&annotated),
        )
        .await?;
        report.artists.record(outcome);
    }

    info!(
        target: "merge",
        tracks = report.tracks.total(),
        albums = report.albums.total(),
        artists = report.artists.total(),
        "Annotations merged"
    );
    Ok(report)
}


/// Property-based tests using proptest
#[cfg(test)]
mod proptests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn timestamp() -> impl Strategy<Value = Option<Timestamp>> {
        proptest::option::of((0i64..2_000_000_000).prop_map(|secs| {
            Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
        }))
    }

    fn annotation() -> impl Strategy<Value = Annotation> {
        (
            0i64..10_000,
            proptest::option::of(1u8..=5),
            timestamp(),
            timestamp(),
        )
            .prop_map(|(play_count, rating, last_played, date_added)| Annotation {
                play_count,
                rating,
                last_played,
                date_added,
            })
    }

    proptest! {
        /// Merged values never fall below existing ones (date added never rises)
        #[test]
        fn merge_is_monotonic(existing in annotation(), incoming in annotation()) {
            let merged = merge_annotation(Some(&existing), &incoming);
            prop_assert!(merged.play_count >= existing.play_count);
            prop_assert!(merged.rating >= existing.rating);
            prop_assert!(merged.last_played >= existing.last_played);
            if let Some(existing_added) = existing.date_added {
                prop_assert!(merged.date_added.is_some_and(|d| d <= existing_added));
            }
        }

        /// Merging the same input again changes nothing
        #[test]
        fn merge_is_idempotent(existing in annotation(), incoming in annotation()) {
            let once = merge_annotation(Some(&existing), &incoming);
            let twice = merge_annotation(Some(&once), &incoming);
            prop_assert_eq!(once, twice);
        }

        /// Every non-zero source rating lands in 1..=5
        #[test]
        fn converted_rating_in_range(source in 1u32..=100) {
            let rating = convert_rating(source);
            prop_assert!(matches!(rating, Some(1..=5)));
        }

        /// Higher source ratings never convert lower
        #[test]
        fn conversion_is_monotonic(a in 0u32..=100, b in 0u32..=100) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(convert_rating(lo) <= convert_rating(hi));
        }
    }
}

//! Split-album detection.
//!
//! The server groups tracks into albums by a key that includes the release
//! date and MusicBrainz album id. When those tags disagree across the tracks
//! of one record, the record shows up as several albums. This module finds
//! such clusters: tracks sharing (album, album artist) after normalization
//! that the store split into two or more album ids, where the date or id
//! actually diverges.
//!
//! Clusters whose grouping tags are uniform are left alone even if they map
//! to several album ids. Albums whose *names* differ only in punctuation are
//! never clustered together.

use serde::Serialize;
use sqlx::sqlite::SqliteConnection;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::db::{self, GroupingRow};
use crate::error::Result;
use crate::matcher::normalize_field;

/// One member track of a cluster with its raw grouping tags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClusterTrack {
    pub id: String,
    /// Store path, relative to the music directory
    pub path: String,
    pub title: String,
    pub album_id: String,
    pub disc_number: i64,
    pub track_number: i64,
    /// Empty when untagged
    pub release_date: String,
    /// Empty when untagged
    pub mbz_album_id: String,
}

impl From<GroupingRow> for ClusterTrack {
    fn from(row: GroupingRow) -> Self {
        Self {
            id: row.id,
            path: row.path,
            title: row.title,
            album_id: row.album_id,
            disc_number: row.disc_number,
            track_number: row.track_number,
            release_date: row.release_date.trim().to_string(),
            mbz_album_id: row.mbz_album_id.trim().to_string(),
        }
    }
}

/// One album id inside a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlbumGroup {
    pub album_id: String,
    pub track_count: usize,
}

/// One logical album the store shows as several.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SplitCluster {
    /// Album name as tagged on the first member track
    pub album: String,
    pub album_artist: String,
    pub groups: Vec<AlbumGroup>,
    pub tracks: Vec<ClusterTrack>,
}

impl SplitCluster {
    /// Distinct release date values, `""` included.
    pub fn distinct_dates(&self) -> BTreeSet<&str> {
        self.tracks.iter().map(|t| t.release_date.as_str()).collect()
    }

    /// Distinct MusicBrainz album ids, `""` included.
    pub fn distinct_mbz_ids(&self) -> BTreeSet<&str> {
        self.tracks.iter().map(|t| t.mbz_album_id.as_str()).collect()
    }

    pub fn date_diverges(&self) -> bool {
        self.distinct_dates().len() > 1
    }

    pub fn mbz_diverges(&self) -> bool {
        self.distinct_mbz_ids().len() > 1
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }
}

/// Cluster rows by normalized (album, album artist) and keep real splits.
///
/// Clusters come back ordered by normalized key; tracks keep row order.
pub fn detect(rows: Vec<GroupingRow>) -> Vec<SplitCluster> {
    let mut clusters: BTreeMap<(String, String), Vec<GroupingRow>> = BTreeMap::new();
    for row in rows {
        let album = normalize_field(&row.album);
        if album.is_empty() {
            continue;
        }
        let album_artist = normalize_field(&row.album_artist);
        clusters.entry((album, album_artist)).or_default().push(row);
    }

    let mut splits = Vec::new();
    for (key, rows) in clusters {
        let mut groups: BTreeMap<&str, usize> = BTreeMap::new();
        for row in &rows {
            *groups.entry(row.album_id.as_str()).or_default() += 1;
        }
        if groups.len() < 2 {
            continue;
        }
        let groups: Vec<AlbumGroup> = groups
            .into_iter()
            .map(|(album_id, track_count)| AlbumGroup {
                album_id: album_id.to_string(),
                track_count,
            })
            .collect();

        let album = rows[0].album.clone();
        let album_artist = rows[0].album_artist.clone();
        let cluster = SplitCluster {
            album,
            album_artist,
            groups,
            tracks: rows.into_iter().map(ClusterTrack::from).collect(),
        };

        if !cluster.date_diverges() && !cluster.mbz_diverges() {
            debug!(
                target: "splits",
                album = %key.0,
                groups = cluster.groups.len(),
                "Several album ids with uniform grouping tags; not a split"
            );
            continue;
        }
        splits.push(cluster);
    }
    splits
}

/// Read the store and return every split cluster. Makes no changes.
pub async fn find_splits(conn: &mut SqliteConnection) -> Result<Vec<SplitCluster>> {
    let rows = db::load_grouping_rows(conn).await?;
    let total = rows.len();
    let splits = detect(rows);
    info!(
        target: "splits",
        files = total,
        clusters = splits.len(),
        "Split detection complete"
    );
    Ok(splits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MediaFileFixture, insert_media_file, temp_store};

    fn row(id: &str, album: &str, album_id: &str, date: &str, mbz: &str) -> GroupingRow {
        GroupingRow {
            id: id.to_string(),
            path: format!("{album}/{id}.mp3"),
            title: id.to_string(),
            album: album.to_string(),
            album_artist: "Artist".to_string(),
            album_id: album_id.to_string(),
            release_date: date.to_string(),
            mbz_album_id: mbz.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_detects_date_split() {
        let splits = detect(vec![
            row("1", "Blue", "a", "2001", ""),
            row("2", "Blue", "b", "", ""),
            row("3", "Blue", "a", "2001", ""),
        ]);
        assert_eq!(splits.len(), 1);
        let cluster = &splits[0];
        assert_eq!(cluster.groups.len(), 2);
        assert_eq!(cluster.track_count(), 3);
        assert!(cluster.date_diverges());
        assert!(!cluster.mbz_diverges());
        assert_eq!(cluster.distinct_dates(), BTreeSet::from(["", "2001"]));
    }

    #[test]
    fn test_normalization_joins_case_and_whitespace_variants() {
        let mut other = row("2", " blue ", "b", "", "X");
        other.album_artist = "ARTIST".to_string();
        let splits = detect(vec![row("1", "Blue", "a", "", ""), other]);
        assert_eq!(splits.len(), 1);
        assert!(splits[0].mbz_diverges());
    }

    #[test]
    fn test_uniform_tags_are_not_a_split() {
        // Two editions sharing a name with identical grouping tags
        let splits = detect(vec![
            row("1", "Greatest Hits", "a", "1999", "M"),
            row("2", "Greatest Hits", "b", "1999", "M"),
        ]);
        assert!(splits.is_empty());
    }

    #[test]
    fn test_single_album_id_and_empty_album_ignored() {
        let splits = detect(vec![
            row("1", "Blue", "a", "2001", ""),
            row("2", "Blue", "a", "", ""),
            row("3", "", "x", "2001", ""),
            row("4", "", "y", "", ""),
        ]);
        assert!(splits.is_empty());
    }

    #[test]
    fn test_punctuation_variants_stay_separate() {
        let splits = detect(vec![
            row("1", "Sgt. Pepper", "a", "1967", ""),
            row("2", "Sgt Pepper", "b", "", ""),
        ]);
        assert!(splits.is_empty());
    }

    #[tokio::test]
    async fn test_find_splits_from_store() {
        let (store, _dir) = temp_store().await;
        let mut conn = store.pool().acquire().await.unwrap();
        for (id, album_id, date) in [("f1", "a", "2001"), ("f2", "b", ""), ("f3", "a", "2001")] {
            insert_media_file(
                &mut conn,
                &MediaFileFixture {
                    album: "Blue".into(),
                    album_id: album_id.into(),
                    release_date: date.into(),
                    ..MediaFileFixture::new(id, &format!("Blue/{id}.mp3"))
                },
            )
            .await;
        }

        let splits = find_splits(&mut conn).await.unwrap();
        assert_eq!(splits.len(), 1);
        assert_eq!(splits[0].album, "Blue");
        assert_eq!(
            splits[0].groups,
            vec![
                AlbumGroup {
                    album_id: "a".into(),
                    track_count: 2
                },
                AlbumGroup {
                    album_id: "b".into(),
                    track_count: 1
                },
            ]
        );
    }
}

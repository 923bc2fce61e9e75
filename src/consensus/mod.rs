//! Tag-consensus resolution for split albums.
//!
//! Each [`SplitCluster`] is classified by which grouping tag diverged, and
//! turned into a [`Plan`]: the smallest set of tag writes that makes the
//! cluster group as one album again, or no writes and a review flag when
//! the divergence needs a human.
//!
//! | Cause | Condition | Action |
//! |---|---|---|
//! | `mbz-conflict` | two or more distinct release ids | flag |
//! | `mbz-partial` | one release id, some tracks lack it | strip it (opt-in) |
//! | `missing-date-partial` | one date value, some tracks lack it | fill |
//! | `date-majority` | dates conflict, one held by > half the tracks | set all |
//! | `date-conflict-no-consensus` | dates conflict, no majority | clear all |
//! | `unresolved` | id conflict plus date divergence, or no date anywhere | flag |
//!
//! Release-id problems are handled before date problems; a cluster with
//! both is fixed over two passes.
//!
//! [`resolve`] runs plans in dry-run or apply mode. Classification never
//! depends on the mode, and writes are isolated per file.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::splits::{ClusterTrack, SplitCluster};
use crate::tags::{TagIo, TagSnapshot};

/// Share of all member tracks a date must exceed to win by majority.
const MAJORITY_SHARE: f64 = 0.5;

/// Why a cluster split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Cause {
    MissingDatePartial,
    DateMajority,
    DateConflictNoConsensus,
    MbzPartial,
    MbzConflict,
    Unresolved,
}

impl Cause {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cause::MissingDatePartial => "missing-date-partial",
            Cause::DateMajority => "date-majority",
            Cause::DateConflictNoConsensus => "date-conflict-no-consensus",
            Cause::MbzPartial => "mbz-partial",
            Cause::MbzConflict => "mbz-conflict",
            Cause::Unresolved => "unresolved",
        }
    }
}

impl std::fmt::Display for Cause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single tag change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TagWrite {
    /// Set (`Some`) or clear (`None`) the release date
    ReleaseDate(Option<String>),
    /// Remove the MusicBrainz album id
    StripStableId,
}

impl TagWrite {
    /// Whether a file already holds the value this write would produce.
    pub fn is_satisfied_by(&self, current: &TagSnapshot) -> bool {
        match self {
            TagWrite::ReleaseDate(target) => current.release_date == *target,
            TagWrite::StripStableId => current.stable_id.is_none(),
        }
    }
}

/// A write planned for one member track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedWrite {
    pub track_id: String,
    pub path: String,
    pub title: String,
    /// Current store value of the field being changed
    pub current: String,
    pub write: TagWrite,
}

/// Classification of one cluster and the writes that fix it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub cause: Cause,
    pub description: String,
    pub writes: Vec<PlannedWrite>,
}

fn planned(track: &ClusterTrack, current: &str, write: TagWrite) -> PlannedWrite {
    PlannedWrite {
        track_id: track.id.clone(),
        path: track.path.clone(),
        title: track.title.clone(),
        current: current.to_string(),
        write,
    }
}

/// Classify a cluster from its raw per-track tag values.
pub fn classify(cluster: &SplitCluster) -> Plan {
    let tracks = &cluster.tracks;
    let mbz_ids: BTreeSet<&str> = tracks
        .iter()
        .map(|t| t.mbz_album_id.as_str())
        .filter(|m| !m.is_empty())
        .collect();
    let date_diverges = cluster.date_diverges();

    if mbz_ids.len() > 1 {
        let ids = mbz_ids.iter().copied().collect::<Vec<_>>().join(", ");
        return if date_diverges {
            Plan {
                cause: Cause::Unresolved,
                description: format!("Release ids ({ids}) and dates both differ"),
                writes: Vec::new(),
            }
        } else {
            Plan {
                cause: Cause::MbzConflict,
                description: format!("Different release ids ({ids})"),
                writes: Vec::new(),
            }
        };
    }

    if let (Some(id), true) = (mbz_ids.first(), tracks.iter().any(|t| t.mbz_album_id.is_empty())) {
        let writes: Vec<PlannedWrite> = tracks
            .iter()
            .filter(|t| !t.mbz_album_id.is_empty())
            .map(|t| planned(t, &t.mbz_album_id, TagWrite::StripStableId))
            .collect();
        return Plan {
            cause: Cause::MbzPartial,
            description: format!("Strip release id {id} from {} track(s)", writes.len()),
            writes,
        };
    }

    let mut date_counts: HashMap<&str, usize> = HashMap::new();
    for t in tracks.iter().filter(|t| !t.release_date.is_empty()) {
        *date_counts.entry(t.release_date.as_str()).or_default() += 1;
    }

    let set_all = |target: &str| -> Vec<PlannedWrite> {
        tracks
            .iter()
            .filter(|t| t.release_date != target)
            .map(|t| planned(t, &t.release_date, TagWrite::ReleaseDate(Some(target.to_string()))))
            .collect()
    };

    match date_counts.len() {
        0 => Plan {
            cause: Cause::Unresolved,
            description: "No release date on any track".to_string(),
            writes: Vec::new(),
        },
        1 => {
            let target = date_counts.keys().next().copied().unwrap_or_default();
            Plan {
                cause: Cause::MissingDatePartial,
                description: format!("Fill missing dates with '{target}'"),
                writes: set_all(target),
            }
        }
        _ => {
            // Highest count wins; ties go to the lexically smallest date
            let (top_date, top_count) = date_counts
                .iter()
                .max_by(|(da, ca), (db, cb)| ca.cmp(cb).then(db.cmp(da)))
                .map(|(d, c)| (*d, *c))
                .unwrap_or_default();

            if top_count as f64 / tracks.len() as f64 > MAJORITY_SHARE {
                Plan {
                    cause: Cause::DateMajority,
                    description: format!("Set all dates to '{top_date}' (majority)"),
                    writes: set_all(top_date),
                }
            } else {
                Plan {
                    cause: Cause::DateConflictNoConsensus,
                    description: "Clear all dates (no consensus)".to_string(),
                    writes: tracks
                        .iter()
                        .filter(|t| !t.release_date.is_empty())
                        .map(|t| planned(t, &t.release_date, TagWrite::ReleaseDate(None)))
                        .collect(),
                }
            }
        }
    }
}

// ============================================================================
// Dry-run / apply
// ============================================================================

#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Store paths are joined to this directory
    pub music_root: PathBuf,
    /// Write tags; otherwise only report
    pub apply: bool,
    /// Allow stripping release ids for `mbz-partial` clusters
    pub fix_mbz: bool,
}

/// What happened to one cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatus {
    /// Every planned write succeeded or was already in place
    Fixed,
    /// Dry run: writes reported, nothing touched
    WouldFix,
    /// Some files could not be written or were missing
    Incomplete,
    /// Needs a human decision
    Flagged,
}

/// A file-level problem during apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    pub path: PathBuf,
    pub message: String,
}

/// Per-cluster result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterOutcome {
    pub album: String,
    pub album_artist: String,
    pub track_count: usize,
    pub group_count: usize,
    pub plan: Plan,
    pub status: ClusterStatus,
    /// Written (apply) or to be written (dry run)
    pub updated: usize,
    pub already_consistent: usize,
    pub failed: usize,
    pub missing: usize,
    /// Distinct recording dates held by the member files
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub recording_dates: Vec<String>,
}

/// Results of one resolver pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolveReport {
    pub dry_run: bool,
    pub clusters: Vec<ClusterOutcome>,
    pub failures: Vec<FileFailure>,
}

impl ResolveReport {
    pub fn by_cause(&self) -> BTreeMap<Cause, usize> {
        let mut counts = BTreeMap::new();
        for c in &self.clusters {
            *counts.entry(c.plan.cause).or_default() += 1;
        }
        counts
    }

    fn count(&self, status: ClusterStatus) -> usize {
        self.clusters.iter().filter(|c| c.status == status).count()
    }

    pub fn fixed(&self) -> usize {
        self.count(if self.dry_run {
            ClusterStatus::WouldFix
        } else {
            ClusterStatus::Fixed
        })
    }

    pub fn flagged(&self) -> Vec<&ClusterOutcome> {
        self.clusters
            .iter()
            .filter(|c| c.status == ClusterStatus::Flagged)
            .collect()
    }

    pub fn files_updated(&self) -> usize {
        self.clusters.iter().map(|c| c.updated).sum()
    }

    pub fn files_already_consistent(&self) -> usize {
        self.clusters.iter().map(|c| c.already_consistent).sum()
    }

    pub fn files_failed(&self) -> usize {
        self.clusters.iter().map(|c| c.failed).sum()
    }

    pub fn files_missing(&self) -> usize {
        self.clusters.iter().map(|c| c.missing).sum()
    }
}

enum FileResult {
    Updated,
    AlreadyConsistent,
    Missing,
    Failed(String),
}

fn run_write(tags: &dyn TagIo, path: &Path, write: &TagWrite, apply: bool) -> FileResult {
    if !tags.exists(path) {
        return FileResult::Missing;
    }
    match tags.read(path) {
        Ok(current) if write.is_satisfied_by(&current) => return FileResult::AlreadyConsistent,
        Ok(_) => {}
        Err(e) => debug!(target: "consensus", path = %path.display(), error = %e, "Pre-write read failed"),
    }
    if !apply {
        return FileResult::Updated;
    }
    let result = match write {
        TagWrite::ReleaseDate(value) => tags.set_release_date(path, value.as_deref()),
        TagWrite::StripStableId => tags.set_stable_id(path, None),
    };
    match result {
        Ok(()) => FileResult::Updated,
        Err(e) => FileResult::Failed(e.to_string()),
    }
}

/// Recording dates found on the member files. Never written, but shown
/// next to the release dates so a reviewer can pick one.
fn recording_dates(tags: &dyn TagIo, root: &Path, tracks: &[ClusterTrack]) -> Vec<String> {
    let mut dates = BTreeSet::new();
    for track in tracks {
        let path = root.join(&track.path);
        if !tags.exists(&path) {
            continue;
        }
        if let Ok(TagSnapshot {
            recording_date: Some(date),
            ..
        }) = tags.read(&path)
        {
            if !date.is_empty() {
                dates.insert(date);
            }
        }
    }
    dates.into_iter().collect()
}

/// Classify every cluster and carry out (or report) its plan.
pub fn resolve(
    clusters: &[SplitCluster],
    tags: &dyn TagIo,
    options: &ResolveOptions,
) -> ResolveReport {
    let mut report = ResolveReport {
        dry_run: !options.apply,
        ..Default::default()
    };

    for cluster in clusters {
        let plan = classify(cluster);
        let mut outcome = ClusterOutcome {
            album: cluster.album.clone(),
            album_artist: cluster.album_artist.clone(),
            track_count: cluster.track_count(),
            group_count: cluster.groups.len(),
            plan,
            status: ClusterStatus::Flagged,
            updated: 0,
            already_consistent: 0,
            failed: 0,
            missing: 0,
            recording_dates: recording_dates(tags, &options.music_root, &cluster.tracks),
        };

        let actionable = match outcome.plan.cause {
            Cause::MbzConflict | Cause::Unresolved => false,
            Cause::MbzPartial => options.fix_mbz,
            _ => true,
        };
        if !actionable {
            info!(
                target: "consensus",
                album = %outcome.album,
                cause = %outcome.plan.cause,
                "Flagged for review"
            );
            report.clusters.push(outcome);
            continue;
        }

        for item in &outcome.plan.writes {
            let path = options.music_root.join(&item.path);
            match run_write(tags, &path, &item.write, options.apply) {
                FileResult::Updated => outcome.updated += 1,
                FileResult::AlreadyConsistent => outcome.already_consistent += 1,
                FileResult::Missing => {
                    warn!(target: "consensus", path = %path.display(), "File not found");
                    outcome.missing += 1;
                }
                FileResult::Failed(message) => {
                    warn!(target: "consensus", path = %path.display(), error = %message, "Tag write failed");
                    outcome.failed += 1;
                    report.failures.push(FileFailure { path, message });
                }
            }
        }

        outcome.status = match (outcome.failed + outcome.missing, options.apply) {
            (0, true) => ClusterStatus::Fixed,
            (0, false) => ClusterStatus::WouldFix,
            _ => ClusterStatus::Incomplete,
        };
        debug!(
            target: "consensus",
            album = %outcome.album,
            cause = %outcome.plan.cause,
            status = ?outcome.status,
            updated = outcome.updated,
            "Cluster processed"
        );
        report.clusters.push(outcome);
    }

    info!(
        target: "consensus",
        clusters = report.clusters.len(),
        fixed = report.fixed(),
        flagged = report.flagged().len(),
        dry_run = report.dry_run,
        "Resolution complete"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::splits::AlbumGroup;
    use crate::test_utils::MemoryTags;

    fn cluster(values: &[(&str, &str)]) -> SplitCluster {
        let tracks: Vec<ClusterTrack> = values
            .iter()
            .enumerate()
            .map(|(i, (date, mbz))| ClusterTrack {
                id: format!("t{i}"),
                path: format!("Album/{i:02}.flac"),
                title: format!("Track {i}"),
                album_id: format!("g{date}{mbz}"),
                release_date: date.to_string(),
                mbz_album_id: mbz.to_string(),
                ..Default::default()
            })
            .collect();
        SplitCluster {
            album: "Album".to_string(),
            album_artist: "Artist".to_string(),
            groups: vec![
                AlbumGroup {
                    album_id: "g1".into(),
                    track_count: 1,
                },
                AlbumGroup {
                    album_id: "g2".into(),
                    track_count: 1,
                },
            ],
            tracks,
        }
    }

    fn tags_for(cluster: &SplitCluster) -> MemoryTags {
        cluster.tracks.iter().fold(MemoryTags::new(), |tags, t| {
            tags.with_file(&format!("/music/{}", t.path), &t.release_date, &t.mbz_album_id)
        })
    }

    fn options(apply: bool, fix_mbz: bool) -> ResolveOptions {
        ResolveOptions {
            music_root: PathBuf::from("/music"),
            apply,
            fix_mbz,
        }
    }

    #[test]
    fn test_missing_date_partial_fills() {
        let plan = classify(&cluster(&[("2001", ""), ("", ""), ("2001", "")]));
        assert_eq!(plan.cause, Cause::MissingDatePartial);
        assert_eq!(plan.writes.len(), 1);
        assert_eq!(plan.writes[0].track_id, "t1");
        assert_eq!(plan.writes[0].write, TagWrite::ReleaseDate(Some("2001".into())));
    }

    #[test]
    fn test_date_conflict_without_majority_clears() {
        let plan = classify(&cluster(&[("2001", ""), ("2003", "")]));
        assert_eq!(plan.cause, Cause::DateConflictNoConsensus);
        assert_eq!(plan.writes.len(), 2);
        assert!(plan.writes.iter().all(|w| w.write == TagWrite::ReleaseDate(None)));
    }

    #[test]
    fn test_date_majority_sets_all() {
        let plan = classify(&cluster(&[("2001", ""), ("2001", ""), ("1998", ""), ("", "")]));
        // 2 of 4 is not a majority
        assert_eq!(plan.cause, Cause::DateConflictNoConsensus);

        let plan = classify(&cluster(&[("2001", ""), ("2001", ""), ("1998", "")]));
        assert_eq!(plan.cause, Cause::DateMajority);
        assert_eq!(plan.writes.len(), 1);
        assert_eq!(plan.writes[0].current, "1998");
        assert_eq!(plan.writes[0].write, TagWrite::ReleaseDate(Some("2001".into())));
    }

    #[test]
    fn test_mbz_partial_strips_holders() {
        let plan = classify(&cluster(&[("", "A"), ("", ""), ("", "A")]));
        assert_eq!(plan.cause, Cause::MbzPartial);
        let ids: Vec<_> = plan.writes.iter().map(|w| w.track_id.as_str()).collect();
        assert_eq!(ids, vec!["t0", "t2"]);
        assert!(plan.writes.iter().all(|w| w.write == TagWrite::StripStableId));
    }

    #[test]
    fn test_mbz_conflict_takes_no_action() {
        let plan = classify(&cluster(&[("", "A"), ("", "B")]));
        assert_eq!(plan.cause, Cause::MbzConflict);
        assert!(plan.writes.is_empty());

        let plan = classify(&cluster(&[("2001", "A"), ("2002", "B")]));
        assert_eq!(plan.cause, Cause::Unresolved);
        assert!(plan.writes.is_empty());
    }

    #[test]
    fn test_apply_fills_dates() {
        let c = cluster(&[("2001", ""), ("", ""), ("2001", "")]);
        let tags = tags_for(&c);

        let report = resolve(std::slice::from_ref(&c), &tags, &options(true, false));
        assert_eq!(report.fixed(), 1);
        assert_eq!(report.files_updated(), 1);
        assert_eq!(
            tags.snapshot("/music/Album/01.flac").unwrap().release_date.as_deref(),
            Some("2001")
        );
    }

    #[test]
    fn test_mbz_partial_requires_opt_in() {
        let c = cluster(&[("", "A"), ("", "")]);
        let tags = tags_for(&c);

        let report = resolve(std::slice::from_ref(&c), &tags, &options(true, false));
        assert_eq!(report.flagged().len(), 1);
        assert!(tags.writes().is_empty());

        let report = resolve(std::slice::from_ref(&c), &tags, &options(true, true));
        assert_eq!(report.fixed(), 1);
        assert_eq!(tags.snapshot("/music/Album/00.flac").unwrap().stable_id, None);
    }

    #[test]
    fn test_failed_write_is_isolated() {
        let c = cluster(&[("2001", ""), ("2003", ""), ("2005", "")]);
        let tags = tags_for(&c).failing("/music/Album/01.flac");

        let report = resolve(std::slice::from_ref(&c), &tags, &options(true, false));
        let outcome = &report.clusters[0];
        assert_eq!(outcome.status, ClusterStatus::Incomplete);
        assert_eq!(outcome.updated, 2);
        assert_eq!(outcome.failed, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.fixed(), 0);
        assert_eq!(tags.snapshot("/music/Album/02.flac").unwrap().release_date, None);
    }

    #[test]
    fn test_missing_files_and_already_consistent() {
        let c = cluster(&[("2001", ""), ("", ""), ("", "")]);
        // Track 1 was already retagged on disk; track 2 is gone
        let tags = MemoryTags::new()
            .with_file("/music/Album/00.flac", "2001", "")
            .with_file("/music/Album/01.flac", "2001", "");

        let report = resolve(std::slice::from_ref(&c), &tags, &options(true, false));
        assert_eq!(report.files_already_consistent(), 1);
        assert_eq!(report.files_missing(), 1);
        assert_eq!(report.files_updated(), 0);
        assert!(tags.writes().is_empty());
    }

    #[test]
    fn test_recording_dates_reported_for_flagged_cluster() {
        let c = cluster(&[("2001", "A"), ("2002", "B"), ("", "")]);
        let tags = tags_for(&c)
            .with_recording_date("/music/Album/00.flac", "1999")
            .with_recording_date("/music/Album/01.flac", "1999-05-01")
            .with_recording_date("/music/Album/02.flac", "1999");

        let report = resolve(std::slice::from_ref(&c), &tags, &options(false, false));
        let outcome = &report.clusters[0];
        assert_eq!(outcome.status, ClusterStatus::Flagged);
        assert_eq!(outcome.recording_dates, vec!["1999", "1999-05-01"]);
        assert!(tags.writes().is_empty());
    }

    #[test]
    fn test_dry_run_matches_apply_and_writes_nothing() {
        let clusters = vec![
            cluster(&[("2001", ""), ("", ""), ("2001", "")]),
            cluster(&[("2001", ""), ("2003", "")]),
            cluster(&[("", "A"), ("", ""), ("", "A")]),
            cluster(&[("", "A"), ("", "B")]),
        ];
        let tags = clusters
            .iter()
            .enumerate()
            .fold(MemoryTags::new(), |tags, (i, c)| {
                c.tracks.iter().fold(tags, |tags, t| {
                    tags.with_file(&format!("/music/{i}/{}", t.path), &t.release_date, &t.mbz_album_id)
                })
            });
        let clusters: Vec<SplitCluster> = clusters
            .into_iter()
            .enumerate()
            .map(|(i, mut c)| {
                for t in &mut c.tracks {
                    t.path = format!("{i}/{}", t.path);
                }
                c
            })
            .collect();
        let before: Vec<_> = clusters
            .iter()
            .flat_map(|c| &c.tracks)
            .map(|t| tags.snapshot(&format!("/music/{}", t.path)))
            .collect();

        let dry = resolve(&clusters, &tags, &options(false, true));
        assert!(tags.writes().is_empty());
        let after: Vec<_> = clusters
            .iter()
            .flat_map(|c| &c.tracks)
            .map(|t| tags.snapshot(&format!("/music/{}", t.path)))
            .collect();
        assert_eq!(before, after);

        let applied = resolve(&clusters, &tags, &options(true, true));
        let dry_plans: Vec<_> = dry.clusters.iter().map(|c| &c.plan).collect();
        let applied_plans: Vec<_> = applied.clusters.iter().map(|c| &c.plan).collect();
        assert_eq!(dry_plans, applied_plans);
        assert_eq!(dry.fixed(), applied.fixed());
        assert_eq!(dry.files_updated(), applied.files_updated());
        assert_eq!(tags.writes().len(), applied.files_updated());
    }
}

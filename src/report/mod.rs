//! Run summaries.
//!
//! Both commands end with a summary that is always printed, even when some
//! items failed. [`MigrationSummary`] and [`SplitSummary`] render as plain
//! text or serialize to JSON for `--json`.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::consensus::{ClusterStatus, ResolveReport, TagWrite};
use crate::matcher::{Confidence, MatchSet, Unmatched, UnmatchedReason};
use crate::merge::{LevelCounts, MergeReport};
use crate::playlists::PlaylistReport;
use crate::tags::TagFormat;

const RULE: &str = "============================================================";

// ============================================================================
// Migration
// ============================================================================

/// Matches produced by one cascade strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategyCount {
    /// 1-based position in the cascade
    pub strategy: u8,
    pub label: String,
    pub count: usize,
}

/// Match counts for the summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MatchCounts {
    pub matched: usize,
    /// In cascade order
    pub by_strategy: Vec<StrategyCount>,
    pub fuzzy: usize,
    pub unmatched: usize,
    /// Unmatched because their store file was already claimed
    pub duplicates: usize,
}

impl MatchCounts {
    pub fn from_matches(matches: &MatchSet) -> Self {
        let by_strategy: BTreeMap<_, _> = matches.by_strategy();
        Self {
            matched: matches.matched.len(),
            fuzzy: matches
                .matched
                .iter()
                .filter(|m| m.confidence == Confidence::Fuzzy)
                .count(),
            by_strategy: by_strategy
                .into_iter()
                .map(|(s, count)| StrategyCount {
                    strategy: s.ordinal(),
                    label: s.label().to_string(),
                    count,
                })
                .collect(),
            unmatched: matches.unmatched.len(),
            duplicates: matches
                .unmatched
                .iter()
                .filter(|u| u.reason == UnmatchedReason::Duplicate)
                .count(),
        }
    }
}

/// Everything `migrate` reports.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationSummary {
    pub dry_run: bool,
    pub user: String,
    pub source_tracks: usize,
    pub tracks_with_stats: usize,
    pub store_files: usize,
    pub matches: MatchCounts,
    pub annotations: MergeReport,
    /// `None` when playlist migration was skipped
    pub playlists: Option<PlaylistReport>,
    pub skipped_playlists: usize,
    /// Most-played unmatched tracks, when requested
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unmatched_tracks: Vec<Unmatched>,
}

fn level_line(f: &mut fmt::Formatter<'_>, label: &str, counts: &LevelCounts) -> fmt::Result {
    writeln!(
        f,
        "  {label:<8} {:>6} created  {:>6} updated  {:>6} unchanged",
        counts.created, counts.updated, counts.unchanged
    )
}

impl fmt::Display for MigrationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{RULE}")?;
        writeln!(
            f,
            "{}MIGRATION SUMMARY (user: {})",
            if self.dry_run { "DRY RUN - " } else { "" },
            self.user
        )?;
        writeln!(f, "{RULE}")?;
        writeln!(f, "Source tracks:          {}", self.source_tracks)?;
        writeln!(f, "  with play data:       {}", self.tracks_with_stats)?;
        writeln!(f, "Store files:            {}", self.store_files)?;
        writeln!(f, "Matched:                {}", self.matches.matched)?;
        for s in &self.matches.by_strategy {
            writeln!(f, "  {}. {:<19}{}", s.strategy, s.label, s.count)?;
        }
        writeln!(
            f,
            "Unmatched:              {} ({} duplicate)",
            self.matches.unmatched, self.matches.duplicates
        )?;
        writeln!(f)?;
        writeln!(f, "Annotations:")?;
        level_line(f, "tracks", &self.annotations.tracks)?;
        level_line(f, "albums", &self.annotations.albums)?;
        level_line(f, "artists", &self.annotations.artists)?;
        writeln!(
            f,
            "Explicit album ratings: {}",
            self.annotations.explicit_album_ratings
        )?;
        writeln!(
            f,
            "Date added updated:     {} tracks, {} albums",
            self.annotations.track_dates_updated, self.annotations.album_dates_updated
        )?;

        match &self.playlists {
            Some(p) => {
                writeln!(
                    f,
                    "Playlists:              {} of {} migrated ({} skipped at source)",
                    p.migrated(),
                    p.found,
                    self.skipped_playlists
                )?;
                writeln!(
                    f,
                    "  entries written:      {} ({} unmatched skipped)",
                    p.entries_written, p.entries_skipped
                )?;
            }
            None => writeln!(f, "Playlists:              skipped")?,
        }

        if !self.unmatched_tracks.is_empty() {
            writeln!(f)?;
            writeln!(f, "Unmatched tracks (by play count):")?;
            for u in &self.unmatched_tracks {
                let reason = match u.reason {
                    UnmatchedReason::NoCandidate => "",
                    UnmatchedReason::Duplicate => " [duplicate]",
                };
                writeln!(
                    f,
                    "  {} - {} ({}) plays={} rating={}{reason}",
                    u.artist, u.title, u.album, u.play_count, u.rating
                )?;
                if let Some(path) = &u.path {
                    writeln!(f, "    {path}")?;
                }
            }
        }

        if self.dry_run {
            writeln!(f)?;
            writeln!(f, "Dry run: all changes were rolled back.")?;
        }
        Ok(())
    }
}

// ============================================================================
// Split fixing
// ============================================================================

/// A cluster that needs a human.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewItem {
    pub album: String,
    pub album_artist: String,
    pub cause: String,
    pub description: String,
}

/// Everything `fix-splits` reports.
#[derive(Debug, Clone, Serialize)]
pub struct SplitSummary {
    pub dry_run: bool,
    pub clusters_found: usize,
    pub by_cause: BTreeMap<String, usize>,
    pub clusters_fixed: usize,
    pub flagged: usize,
    pub files_updated: usize,
    pub files_already_consistent: usize,
    pub files_failed: usize,
    pub files_missing: usize,
    pub review: Vec<ReviewItem>,
    pub details: ResolveReport,
}

impl SplitSummary {
    pub fn new(report: ResolveReport) -> Self {
        let review: Vec<ReviewItem> = report
            .flagged()
            .into_iter()
            .map(|c| ReviewItem {
                album: c.album.clone(),
                album_artist: c.album_artist.clone(),
                cause: c.plan.cause.to_string(),
                description: c.plan.description.clone(),
            })
            .collect();
        Self {
            dry_run: report.dry_run,
            clusters_found: report.clusters.len(),
            by_cause: report
                .by_cause()
                .into_iter()
                .map(|(cause, n)| (cause.to_string(), n))
                .collect(),
            clusters_fixed: report.fixed(),
            flagged: review.len(),
            files_updated: report.files_updated(),
            files_already_consistent: report.files_already_consistent(),
            files_failed: report.files_failed(),
            files_missing: report.files_missing(),
            review,
            details: report,
        }
    }
}

/// Release-date field the write lands in, e.g. `TDRL` for an MP3.
fn date_field(path: &str) -> &'static str {
    TagFormat::from_extension(Path::new(path)).map_or("date", |f| f.release_date_field())
}

/// Per-cluster listing followed by the totals.
impl fmt::Display for SplitSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = if self.dry_run { "[DRY RUN] " } else { "" };

        for c in &self.details.clusters {
            writeln!(
                f,
                "[{}] {} - {}",
                c.plan.cause.as_str().to_uppercase(),
                c.album,
                c.album_artist
            )?;
            writeln!(
                f,
                "  {} tracks in {} albums  ->  {}",
                c.track_count, c.group_count, c.plan.description
            )?;
            if !c.recording_dates.is_empty() {
                writeln!(f, "  recording dates on file: {}", c.recording_dates.join(", "))?;
            }
            if c.status == ClusterStatus::Flagged {
                writeln!(f, "  (skipped - needs review)")?;
            } else {
                for w in &c.plan.writes {
                    let current = if w.current.is_empty() { "(empty)" } else { w.current.as_str() };
                    match &w.write {
                        TagWrite::ReleaseDate(value) => writeln!(
                            f,
                            "  {prefix}{} [{}]: {current} -> {}",
                            w.title,
                            date_field(&w.path),
                            value.as_deref().unwrap_or("(cleared)")
                        )?,
                        TagWrite::StripStableId => {
                            writeln!(f, "  {prefix}{}: strip release id {current}", w.title)?
                        }
                    }
                }
            }
            writeln!(f)?;
        }

        writeln!(f, "{RULE}")?;
        writeln!(f, "{prefix}SPLIT ALBUM SUMMARY")?;
        writeln!(f, "{RULE}")?;
        writeln!(f, "Split albums found:       {}", self.clusters_found)?;
        for (cause, count) in &self.by_cause {
            writeln!(f, "  {cause:<28}{count}")?;
        }
        writeln!(
            f,
            "Albums {}:          {}",
            if self.dry_run { "fixable" } else { "fixed  " },
            self.clusters_fixed
        )?;
        writeln!(f, "Flagged for review:       {}", self.flagged)?;
        writeln!(
            f,
            "Files {}:       {}",
            if self.dry_run { "to update" } else { "updated  " },
            self.files_updated
        )?;
        writeln!(f, "Already consistent:       {}", self.files_already_consistent)?;
        if self.files_failed > 0 {
            writeln!(f, "Errors:                   {}", self.files_failed)?;
            for failure in &self.details.failures {
                writeln!(f, "  {}: {}", failure.path.display(), failure.message)?;
            }
        }
        if self.files_missing > 0 {
            writeln!(f, "Files not found:          {}", self.files_missing)?;
        }

        if !self.review.is_empty() {
            writeln!(f)?;
            writeln!(f, "Albums needing manual review ({}):", self.review.len())?;
            for r in &self.review {
                writeln!(f, "  [{}] {} - {}", r.cause, r.album, r.album_artist)?;
                writeln!(f, "    {}", r.description)?;
            }
        }

        writeln!(f)?;
        if self.dry_run {
            writeln!(f, "Run with --apply to write changes to files.")
        } else {
            writeln!(f, "Trigger a full rescan in the server to regroup albums.")
        }
    }
}

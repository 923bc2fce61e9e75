//! Track matching between the source catalog and the target store.
//!
//! Each [`SourceTrack`] is resolved to at most one [`TargetFile`] through a
//! strict cascade; a strategy runs only when every earlier one found zero or
//! several candidates:
//!
//! 1. exact path
//! 2. case-insensitive path
//! 3. Unicode-normalized (NFD) case-insensitive path
//! 4. (title, artist, album) after trimming and case folding
//! 5. fuzzy title under the same artist
//!
//! [`TargetIndex`] is built once per run from the store snapshot and answers
//! every lookup from hash maps. [`MatchSet`] applies first-match-wins so a
//! store file never receives plays from two source tracks.

use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;
use tracing::{debug, trace};
use unicode_normalization::UnicodeNormalization;

use crate::model::{SourceTrack, TargetFile};

/// Default minimum similarity for a fuzzy title match.
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.85;

static RE_TRAILING_BRACKETS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\s*[\(\[][^\(\)\[\]]*[\)\]])+\s*$").unwrap());
static RE_FEAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:featuring|feat\.?|ft\.?)(?:\s+|$)").unwrap());
static RE_SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

// ============================================================================
// Normalization
// ============================================================================

/// Trim, compose, and case-fold a metadata field.
///
/// Shared by metadata matching, album-rating keys, and split clustering so
/// all three agree on when two names are "the same".
pub fn normalize_field(text: &str) -> String {
    text.trim().nfc().collect::<String>().to_lowercase()
}

/// Case-folded path.
pub fn fold_path(path: &str) -> String {
    path.to_lowercase()
}

/// Case-folded path in canonical decomposition (NFD).
pub fn normalize_path(path: &str) -> String {
    path.to_lowercase().nfd().collect()
}

/// Title form used for fuzzy comparison.
///
/// Drops trailing parenthetical/bracketed qualifiers ("(Remastered)",
/// "[Live]") and collapses "feat." / "featuring" / "ft." into one token.
pub fn normalize_title(title: &str) -> String {
    let folded = normalize_field(title);
    let stripped = RE_TRAILING_BRACKETS.replace(&folded, "");
    let feat = RE_FEAT.replace_all(&stripped, "feat ");
    RE_SPACES.replace_all(feat.trim(), " ").into_owned()
}

// ============================================================================
// Match results
// ============================================================================

/// Cascade strategy that produced a match, in cascade order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    ExactPath,
    CaseInsensitivePath,
    NormalizedPath,
    Metadata,
    FuzzyTitle,
}

impl MatchStrategy {
    /// 1-based position in the cascade.
    pub fn ordinal(&self) -> u8 {
        match self {
            MatchStrategy::ExactPath => 1,
            MatchStrategy::CaseInsensitivePath => 2,
            MatchStrategy::NormalizedPath => 3,
            MatchStrategy::Metadata => 4,
            MatchStrategy::FuzzyTitle => 5,
        }
    }

    pub fn confidence(&self) -> Confidence {
        match self {
            MatchStrategy::FuzzyTitle => Confidence::Fuzzy,
            _ => Confidence::Exact,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MatchStrategy::ExactPath => "exact path",
            MatchStrategy::CaseInsensitivePath => "case-insensitive path",
            MatchStrategy::NormalizedPath => "normalized path",
            MatchStrategy::Metadata => "metadata",
            MatchStrategy::FuzzyTitle => "fuzzy title",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Exact,
    Fuzzy,
}

/// One source track paired with one store file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchResult {
    pub track_id: i64,
    pub target_id: String,
    pub strategy: MatchStrategy,
    pub confidence: Confidence,
}

/// Why a source track ended up unmatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedReason {
    /// No strategy produced exactly one candidate
    NoCandidate,
    /// Resolved to a file already claimed by an earlier source track
    Duplicate,
}

/// A source track with no store file, kept for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Unmatched {
    pub track_id: i64,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub path: Option<String>,
    pub play_count: i64,
    pub rating: u32,
    pub reason: UnmatchedReason,
}

impl Unmatched {
    fn from_track(track: &SourceTrack, reason: UnmatchedReason) -> Self {
        Self {
            track_id: track.track_id,
            title: track.title.clone(),
            artist: track.artist.clone(),
            album: track.album.clone(),
            path: track.path.clone(),
            play_count: track.play_count,
            rating: track.rating,
            reason,
        }
    }
}

// ============================================================================
// Index
// ============================================================================

type MetaKey = (String, String, String);

enum Lookup {
    None,
    One(usize),
    Ambiguous(usize),
}

fn lookup(bucket: Option<&Vec<usize>>) -> Lookup {
    match bucket.map(Vec::as_slice) {
        None | Some([]) => Lookup::None,
        Some([only]) => Lookup::One(*only),
        Some(many) => Lookup::Ambiguous(many.len()),
    }
}

/// Multi-key index over the store's files.
#[derive(Debug, Default)]
pub struct TargetIndex {
    files: Vec<TargetFile>,
    by_path: HashMap<String, Vec<usize>>,
    by_folded_path: HashMap<String, Vec<usize>>,
    by_normalized_path: HashMap<String, Vec<usize>>,
    by_metadata: HashMap<MetaKey, Vec<usize>>,
    by_artist: HashMap<String, Vec<usize>>,
    fuzzy_titles: Vec<String>,
}

impl TargetIndex {
    /// Build the index, making store paths relative to `music_root` when
    /// they start with it.
    pub fn build(files: Vec<TargetFile>, music_root: Option<&str>) -> Self {
        let mut index = TargetIndex::default();
        for (i, mut file) in files.into_iter().enumerate() {
            if let Some(root) = music_root {
                file.path = relative_to(&file.path, root);
            }
            index.by_path.entry(file.path.clone()).or_default().push(i);
            index
                .by_folded_path
                .entry(fold_path(&file.path))
                .or_default()
                .push(i);
            index
                .by_normalized_path
                .entry(normalize_path(&file.path))
                .or_default()
                .push(i);
            index
                .by_metadata
                .entry(metadata_key(&file.title, &file.artist, &file.album))
                .or_default()
                .push(i);
            index
                .by_artist
                .entry(normalize_field(&file.artist))
                .or_default()
                .push(i);
            index.fuzzy_titles.push(normalize_title(&file.title));
            index.files.push(file);
        }
        index
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn files(&self) -> &[TargetFile] {
        &self.files
    }

    /// Run the cascade for one track. Pure: the index is not modified.
    pub fn find(&self, track: &SourceTrack, fuzzy_threshold: f64) -> Option<(&TargetFile, MatchStrategy)> {
        if let Some(path) = track.path.as_deref() {
            let path_strategies: [(MatchStrategy, &HashMap<String, Vec<usize>>, String); 3] = [
                (MatchStrategy::ExactPath, &self.by_path, path.to_string()),
                (
                    MatchStrategy::CaseInsensitivePath,
                    &self.by_folded_path,
                    fold_path(path),
                ),
                (
                    MatchStrategy::NormalizedPath,
                    &self.by_normalized_path,
                    normalize_path(path),
                ),
            ];
            for (strategy, map, key) in path_strategies {
                match lookup(map.get(&key)) {
                    Lookup::One(i) => return Some((&self.files[i], strategy)),
                    Lookup::Ambiguous(n) => {
                        trace!(target: "matcher", track_id = track.track_id, ?strategy, candidates = n, "Ambiguous");
                    }
                    Lookup::None => {}
                }
            }
        }

        let key = metadata_key(&track.title, &track.artist, &track.album);
        match lookup(self.by_metadata.get(&key)) {
            Lookup::One(i) => return Some((&self.files[i], MatchStrategy::Metadata)),
            Lookup::Ambiguous(n) => {
                debug!(
                    target: "matcher",
                    track_id = track.track_id,
                    title = %track.title,
                    candidates = n,
                    "Metadata match ambiguous"
                );
            }
            Lookup::None => {}
        }

        self.find_fuzzy(track, fuzzy_threshold)
            .map(|i| (&self.files[i], MatchStrategy::FuzzyTitle))
    }

    fn find_fuzzy(&self, track: &SourceTrack, threshold: f64) -> Option<usize> {
        let title = normalize_title(&track.title);
        if title.is_empty() {
            return None;
        }
        let candidates = self.by_artist.get(&normalize_field(&track.artist))?;
        let mut above = candidates
            .iter()
            .copied()
            .filter(|&i| strsim::normalized_levenshtein(&title, &self.fuzzy_titles[i]) >= threshold);
        let first = above.next()?;
        if above.next().is_some() {
            debug!(target: "matcher", track_id = track.track_id, title = %track.title, "Fuzzy match ambiguous");
            return None;
        }
        Some(first)
    }
}

fn metadata_key(title: &str, artist: &str, album: &str) -> MetaKey {
    (
        normalize_field(title),
        normalize_field(artist),
        normalize_field(album),
    )
}

/// Strip `root` (and the separator after it) from the front of `path`.
pub fn relative_to(path: &str, root: &str) -> String {
    let root = root.trim_end_matches('/');
    if root.is_empty() {
        return path.to_string();
    }
    match path.strip_prefix(root) {
        Some(rest) if rest.starts_with('/') => rest.trim_start_matches('/').to_string(),
        _ => path.to_string(),
    }
}

// ============================================================================
// Run-level match set
// ============================================================================

/// Matches for one run, with first-match-wins on store files.
#[derive(Debug, Default)]
pub struct MatchSet {
    pub matched: Vec<MatchResult>,
    pub unmatched: Vec<Unmatched>,
    by_track: HashMap<i64, usize>,
    /// Duplicate source tracks, still usable for playlist membership
    aliases: HashMap<i64, String>,
    claimed: HashMap<String, i64>,
}

impl MatchSet {
    /// Match every track, in the order given.
    pub fn build(index: &TargetIndex, tracks: &[SourceTrack], fuzzy_threshold: f64) -> Self {
        let mut set = MatchSet::default();
        for track in tracks {
            match index.find(track, fuzzy_threshold) {
                Some((file, strategy)) => set.record(track, &file.id, strategy),
                None => set
                    .unmatched
                    .push(Unmatched::from_track(track, UnmatchedReason::NoCandidate)),
            }
        }
        debug!(
            target: "matcher",
            matched = set.matched.len(),
            unmatched = set.unmatched.len(),
            "Matching complete"
        );
        set
    }

    fn record(&mut self, track: &SourceTrack, target_id: &str, strategy: MatchStrategy) {
        if let Some(first) = self.claimed.get(target_id) {
            debug!(
                target: "matcher",
                track_id = track.track_id,
                first_track_id = first,
                target_id,
                "Store file already claimed"
            );
            self.aliases.insert(track.track_id, target_id.to_string());
            self.unmatched
                .push(Unmatched::from_track(track, UnmatchedReason::Duplicate));
            return;
        }
        self.claimed.insert(target_id.to_string(), track.track_id);
        self.by_track.insert(track.track_id, self.matched.len());
        self.matched.push(MatchResult {
            track_id: track.track_id,
            target_id: target_id.to_string(),
            strategy,
            confidence: strategy.confidence(),
        });
    }

    /// The match owning a source track, if any.
    pub fn matched_for(&self, track_id: i64) -> Option<&MatchResult> {
        self.by_track.get(&track_id).map(|&i| &self.matched[i])
    }

    /// Store file for a source track, including duplicates of a claimed file.
    pub fn resolve(&self, track_id: i64) -> Option<&str> {
        self.matched_for(track_id)
            .map(|m| m.target_id.as_str())
            .or_else(|| self.aliases.get(&track_id).map(String::as_str))
    }

    /// Match counts per cascade strategy.
    pub fn by_strategy(&self) -> BTreeMap<MatchStrategy, usize> {
        let mut counts = BTreeMap::new();
        for m in &self.matched {
            *counts.entry(m.strategy).or_default() += 1;
        }
        counts
    }

    /// Unmatched tracks, most-played first.
    pub fn unmatched_by_plays(&self) -> Vec<&Unmatched> {
        let mut list: Vec<&Unmatched> = self.unmatched.iter().collect();
        list.sort_by(|a, b| b.play_count.cmp(&a.play_count).then(a.track_id.cmp(&b.track_id)));
        list
    }
}

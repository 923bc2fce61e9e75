//! Library migration command.

use std::path::PathBuf;
use tokio::runtime::Runtime;
use tracing::{info, warn};

use super::root_str;
use crate::db::{self, Store};
use crate::error::{Error, Result, ResultExt};
use crate::library::{self, Catalog};
use crate::matcher::{MatchSet, TargetIndex};
use crate::merge::{self, MergeOptions};
use crate::playlists;
use crate::report::{MatchCounts, MigrationSummary};

/// Resolved `migrate` settings (flags layered over the config file).
#[derive(Debug, Clone)]
pub struct MigrateArgs {
    pub library: PathBuf,
    pub database: PathBuf,
    pub user: Option<String>,
    pub prefix: Option<String>,
    pub music_root: Option<PathBuf>,
    pub fuzzy_threshold: f64,
    pub playlists: bool,
    pub date_added: bool,
    pub dry_run: bool,
    /// List this many unmatched tracks
    pub unmatched_limit: Option<usize>,
    pub json: bool,
}

/// Migrate the catalog into the store and print the summary.
pub fn cmd_migrate(rt: &Runtime, args: &MigrateArgs) -> anyhow::Result<()> {
    let summary = rt.block_on(run_migration(args))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{summary}");
    }
    Ok(())
}

/// The whole migration. Every store write happens inside one transaction
/// that is committed at the end, or rolled back for a dry run.
pub(crate) async fn run_migration(args: &MigrateArgs) -> Result<MigrationSummary> {
    let catalog = library::load(&args.library, args.prefix.as_deref())?;
    info!(
        target: "library",
        tracks = catalog.tracks.len(),
        with_stats = catalog.tracks_with_stats(),
        playlists = catalog.playlists.len(),
        "Catalog loaded"
    );

    let store = Store::open(&args.database).await?;
    let result = migrate_into(&store, &catalog, args).await;
    store.close().await;
    result
}

async fn migrate_into(store: &Store, catalog: &Catalog, args: &MigrateArgs) -> Result<MigrationSummary> {
    let mut tx = store.begin().await?;

    let users = db::list_users(&mut tx).await.with_context("reading users")?;
    let user = db::select_user(&users, args.user.as_deref())?;
    info!(target: "store", user = %user.user_name, id = %user.id, "Target user");

    let files = db::load_target_files(&mut tx)
        .await
        .with_context("reading media files")?;
    let music_root = root_str(args.music_root.as_deref());
    let index = TargetIndex::build(files, music_root.as_deref());
    if index.is_empty() {
        warn!(target: "store", "Store has no media files; scan the library in the server first");
    }
    let matches = MatchSet::build(&index, &catalog.tracks, args.fuzzy_threshold);

    let links = db::artist_links(&mut tx)
        .await
        .with_context("reading artist credits")?;
    let annotations = merge::merge_all(
        &mut tx,
        &user.id,
        catalog,
        &matches,
        index.files(),
        &links,
        MergeOptions {
            date_added: args.date_added,
        },
    )
    .await?;

    let playlists = if args.playlists {
        Some(playlists::sync_playlists(&mut tx, &user.id, &catalog.playlists, &matches).await?)
    } else {
        None
    };

    if args.dry_run {
        tx.rollback().await?;
        info!(target: "store", "Dry run; changes rolled back");
    } else {
        tx.commit().await.map_err(|e| {
            let err = Error::from(e);
            if err.is_lock() {
                Error::StoreLocked(store.path().to_path_buf())
            } else {
                err
            }
        })?;
        info!(target: "store", "Changes committed");
    }

    let unmatched_tracks: Vec<_> = args
        .unmatched_limit
        .map(|limit| {
            matches
                .unmatched_by_plays()
                .into_iter()
                .take(limit)
                .cloned()
                .collect()
        })
        .unwrap_or_default();

    Ok(MigrationSummary {
        dry_run: args.dry_run,
        user: user.user_name,
        source_tracks: catalog.tracks.len(),
        tracks_with_stats: catalog.tracks_with_stats(),
        store_files: index.len(),
        matches: MatchCounts::from_matches(&matches),
        annotations,
        playlists,
        skipped_playlists: catalog.skipped_playlists,
        unmatched_tracks,
    })
}

//! Split-album detection and tag fixing command.

use std::path::PathBuf;
use tokio::runtime::Runtime;

use crate::consensus::{self, ResolveOptions};
use crate::db::Store;
use crate::error::Result;
use crate::report::SplitSummary;
use crate::splits::{self, SplitCluster};
use crate::tags::{LoftyTags, TagIo};

/// Resolved `fix-splits` settings.
#[derive(Debug, Clone)]
pub struct FixSplitsArgs {
    pub database: PathBuf,
    pub music_dir: PathBuf,
    pub apply: bool,
    pub fix_mbz: bool,
    pub json: bool,
}

/// Find split albums, fix (or preview fixing) their tags, print the summary.
///
/// The store is only read. The server picks up fixed tags on its next scan.
pub fn cmd_fix_splits(rt: &Runtime, args: &FixSplitsArgs) -> anyhow::Result<()> {
    let clusters = rt.block_on(load_clusters(args))?;
    let summary = fix_splits(&clusters, &LoftyTags, args);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        if clusters.is_empty() {
            println!("No split albums found.");
            return Ok(());
        }
        print!("{summary}");
    }
    Ok(())
}

async fn load_clusters(args: &FixSplitsArgs) -> Result<Vec<SplitCluster>> {
    let store = Store::open(&args.database).await?;
    let result = match store.pool().acquire().await {
        Ok(mut conn) => splits::find_splits(&mut conn).await,
        Err(e) => Err(e.into()),
    };
    store.close().await;
    result
}

fn fix_splits(clusters: &[SplitCluster], tags: &dyn TagIo, args: &FixSplitsArgs) -> SplitSummary {
    let options = ResolveOptions {
        music_root: args.music_dir.clone(),
        apply: args.apply,
        fix_mbz: args.fix_mbz,
    };
    SplitSummary::new(consensus::resolve(clusters, tags, &options))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MediaFileFixture, MemoryTags, insert_media_file, temp_store};

    async fn split_store() -> (tempfile::TempDir, FixSplitsArgs) {
        let (store, dir) = temp_store().await;
        {
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
        }
        store.close().await;

        let args = FixSplitsArgs {
            database: dir.path().join("navidrome.db"),
            music_dir: PathBuf::from("/music"),
            apply: false,
            fix_mbz: false,
            json: false,
        };
        (dir, args)
    }

    fn tags() -> MemoryTags {
        MemoryTags::new()
            .with_file("/music/Blue/f1.mp3", "2001", "")
            .with_file("/music/Blue/f2.mp3", "", "")
            .with_file("/music/Blue/f3.mp3", "2001", "")
    }

    #[tokio::test]
    async fn test_dry_run_reports_without_writing() {
        let (_dir, args) = split_store().await;
        let clusters = load_clusters(&args).await.unwrap();
        let tags = tags();

        let summary = fix_splits(&clusters, &tags, &args);
        assert!(summary.dry_run);
        assert_eq!(summary.clusters_found, 1);
        assert_eq!(summary.files_updated, 1);
        assert!(tags.writes().is_empty());
    }

    #[tokio::test]
    async fn test_apply_fills_missing_date() {
        let (_dir, mut args) = split_store().await;
        args.apply = true;
        let clusters = load_clusters(&args).await.unwrap();
        let tags = tags();

        let summary = fix_splits(&clusters, &tags, &args);
        assert_eq!(summary.clusters_fixed, 1);
        assert_eq!(summary.files_updated, 1);
        assert_eq!(
            tags.snapshot("/music/Blue/f2.mp3").unwrap().release_date.as_deref(),
            Some("2001")
        );
    }

    #[tokio::test]
    async fn test_missing_store_is_fatal() {
        let args = FixSplitsArgs {
            database: PathBuf::from("/nonexistent/navidrome.db"),
            music_dir: PathBuf::from("/music"),
            apply: false,
            fix_mbz: false,
            json: false,
        };
        assert!(load_clusters(&args).await.is_err());
    }
}

//! Target store access.
//!
//! Uses SQLx with SQLite against the music server's own database file.
//! Provides async operations for:
//! - Opening the store with an exclusive-lock check
//! - User lookup and target user selection
//! - Media file snapshots for matching and split detection
//! - Annotation read/write and date-added columns
//! - Playlist replacement
//!
//! Query functions take `&mut SqliteConnection` so callers can run them
//! on a plain pooled connection or inside one run-wide transaction.
//!
//! # Example
//!
//! ```ignore
//! use navidrome_restore::db::{Store, load_target_files};
//!
//! let store = Store::open(Path::new("navidrome.db")).await?;
//! let mut conn = store.pool().acquire().await?;
//! let files = load_target_files(&mut conn).await?;
//! ```

use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, Sqlite, Transaction};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{Error, Result, is_lock_error};
use crate::model::{
    Annotation, ItemKind, TargetFile, Timestamp, User, format_timestamp, parse_timestamp,
};

/// Default store filename.
pub const DEFAULT_DB_NAME: &str = "navidrome.db";

/// An open target store.
///
/// Holds a single-connection pool for the duration of one run.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
    path: PathBuf,
}

impl Store {
    /// Open an existing store and make sure nothing else holds its write lock.
    ///
    /// # Errors
    ///
    /// - [`Error::StoreMissing`] if the file does not exist
    /// - [`Error::StoreLocked`] if another process holds the database
    pub async fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::StoreMissing(path.to_path_buf()));
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(false)
            .busy_timeout(Duration::ZERO);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| lock_or(e, path))?;

        let store = Self {
            pool,
            path: path.to_path_buf(),
        };
        store.check_lock().await?;
        info!(target: "store", path = %path.display(), "Opened store");
        Ok(store)
    }

    /// Take and release the write lock once so a running server fails fast.
    async fn check_lock(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .map_err(|e| lock_or(e, &self.path))?;
        sqlx::query("ROLLBACK").execute(&mut *conn).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start the run-wide write transaction.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        self.pool.begin().await.map_err(|e| lock_or(e, &self.path))
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

fn lock_or(err: sqlx::Error, path: &Path) -> Error {
    if is_lock_error(&err) {
        Error::StoreLocked(path.to_path_buf())
    } else {
        Error::Database(err)
    }
}

// ============================================================================
// Users
// ============================================================================

/// All user accounts, ordered by username.
pub async fn list_users(conn: &mut SqliteConnection) -> sqlx::Result<Vec<User>> {
    sqlx::query_as::<_, User>(
        "SELECT id, user_name, COALESCE(name, '') AS name FROM user ORDER BY user_name",
    )
    .fetch_all(conn)
    .await
}

/// Pick the target user.
///
/// `selector` matches a user id or username. Without a selector the store
/// must contain exactly one user.
pub fn select_user(users: &[User], selector: Option<&str>) -> Result<User> {
    if let Some(wanted) = selector {
        return users
            .iter()
            .find(|u| u.id == wanted || u.user_name == wanted)
            .cloned()
            .ok_or_else(|| Error::UnknownUser(wanted.to_string()));
    }
    match users {
        [] => Err(Error::NoUsers),
        [only] => Ok(only.clone()),
        many => Err(Error::AmbiguousUser(
            many.iter()
                .map(|u| u.user_name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        )),
    }
}

// ============================================================================
// Media files
// ============================================================================

/// Snapshot of every media file for the matcher.
pub async fn load_target_files(conn: &mut SqliteConnection) -> sqlx::Result<Vec<TargetFile>> {
    sqlx::query_as::<_, TargetFile>(
        r#"
        SELECT
            id,
            COALESCE(path, '') AS path,
            COALESCE(title, '') AS title,
            COALESCE(artist, '') AS artist,
            COALESCE(album, '') AS album,
            COALESCE(album_artist, '') AS album_artist,
            NULLIF(album_id, '') AS album_id,
            NULLIF(artist_id, '') AS artist_id
        FROM media_file
        ORDER BY path
        "#,
    )
    .fetch_all(conn)
    .await
}

/// A media file row with its grouping-key columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, FromRow)]
pub struct GroupingRow {
    pub id: String,
    pub path: String,
    pub title: String,
    pub album: String,
    pub album_artist: String,
    pub album_id: String,
    /// Empty when the file has no release date
    pub release_date: String,
    /// Empty when the file has no MusicBrainz album id
    pub mbz_album_id: String,
    pub disc_number: i64,
    pub track_number: i64,
}

/// Grouping-key columns of every media file, in album/disc/track order.
pub async fn load_grouping_rows(conn: &mut SqliteConnection) -> sqlx::Result<Vec<GroupingRow>> {
    sqlx::query_as::<_, GroupingRow>(
        r#"
        SELECT
            id,
            COALESCE(path, '') AS path,
            COALESCE(title, '') AS title,
            COALESCE(album, '') AS album,
            COALESCE(album_artist, '') AS album_artist,
            COALESCE(album_id, '') AS album_id,
            COALESCE(release_date, '') AS release_date,
            COALESCE(mbz_album_id, '') AS mbz_album_id,
            COALESCE(disc_number, 0) AS disc_number,
            COALESCE(track_number, 0) AS track_number
        FROM media_file
        ORDER BY album, album_artist, disc_number, track_number
        "#,
    )
    .fetch_all(conn)
    .await
}

/// Whether a table exists in the store.
pub async fn has_table(conn: &mut SqliteConnection, name: &str) -> sqlx::Result<bool> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(name)
            .fetch_optional(conn)
            .await?;
    Ok(row.is_some())
}

/// Participating artist credits as (media file id, artist id).
///
/// Returns nothing when the store predates the participation table.
pub async fn artist_links(conn: &mut SqliteConnection) -> sqlx::Result<Vec<(String, String)>> {
    if !has_table(&mut *conn, "media_file_artists").await? {
        debug!(target: "store", "No media_file_artists table; primary artists only");
        return Ok(Vec::new());
    }
    sqlx::query_as(
        r#"
        SELECT DISTINCT media_file_id, artist_id
        FROM media_file_artists
        WHERE role = 'artist' AND artist_id IS NOT NULL AND artist_id != ''
        "#,
    )
    .fetch_all(conn)
    .await
}

// ============================================================================
// Annotations
// ============================================================================

#[derive(FromRow)]
struct AnnotationRow {
    play_count: Option<i64>,
    rating: Option<i64>,
    play_date: Option<String>,
}

impl From<AnnotationRow> for Annotation {
    fn from(row: AnnotationRow) -> Self {
        Annotation {
            play_count: row.play_count.unwrap_or(0),
            rating: row
                .rating
                .filter(|r| *r > 0)
                .map(|r| r.clamp(1, 5) as u8),
            last_played: row.play_date.as_deref().and_then(parse_timestamp),
            date_added: None,
        }
    }
}

/// Stored annotation for one subject, if any.
///
/// `date_added` is never populated here; see [`get_created_at`].
pub async fn get_annotation(
    conn: &mut SqliteConnection,
    user_id: &str,
    item_id: &str,
    kind: ItemKind,
) -> sqlx::Result<Option<Annotation>> {
    let row: Option<AnnotationRow> = sqlx::query_as(
        r#"
        SELECT play_count, rating, play_date FROM annotation
        WHERE user_id = ? AND item_id = ? AND item_type = ?
        "#,
    )
    .bind(user_id)
    .bind(item_id)
    .bind(kind.as_str())
    .fetch_optional(conn)
    .await?;
    Ok(row.map(Annotation::from))
}

/// Stored track annotations for a user, keyed by media file id.
pub async fn track_annotations(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> sqlx::Result<Vec<(String, Annotation)>> {
    #[derive(FromRow)]
    struct Row {
        item_id: String,
        #[sqlx(flatten)]
        annotation: AnnotationRow,
    }

    let rows: Vec<Row> = sqlx::query_as(
        r#"
        SELECT item_id, play_count, rating, play_date FROM annotation
        WHERE user_id = ? AND item_type = 'media_file'
        "#,
    )
    .bind(user_id)
    .fetch_all(conn)
    .await?;
    Ok(rows
        .into_iter()
        .map(|r| (r.item_id, r.annotation.into()))
        .collect())
}

/// Write an annotation, inserting the row if it does not exist.
///
/// `starred` is left alone on existing rows and defaults to false on new
/// ones. An absent rating is stored as 0.
pub async fn upsert_annotation(
    conn: &mut SqliteConnection,
    user_id: &str,
    item_id: &str,
    kind: ItemKind,
    annotation: &Annotation,
) -> sqlx::Result<()> {
    let rating = i64::from(annotation.rating.unwrap_or(0));
    let play_date = annotation.last_played.as_ref().map(format_timestamp);

    let updated = sqlx::query(
        r#"
        UPDATE annotation SET play_count = ?, rating = ?, play_date = ?
        WHERE user_id = ? AND item_id = ? AND item_type = ?
        "#,
    )
    .bind(annotation.play_count)
    .bind(rating)
    .bind(&play_date)
    .bind(user_id)
    .bind(item_id)
    .bind(kind.as_str())
    .execute(&mut *conn)
    .await?;

    if updated.rows_affected() == 0 {
        sqlx::query(
            r#"
            INSERT INTO annotation (user_id, item_id, item_type, play_count, rating, play_date, starred)
            VALUES (?, ?, ?, ?, ?, ?, false)
            "#,
        )
        .bind(user_id)
        .bind(item_id)
        .bind(kind.as_str())
        .bind(annotation.play_count)
        .bind(rating)
        .bind(&play_date)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

// ============================================================================
// Date added
// ============================================================================

fn created_at_table(kind: ItemKind) -> Option<&'static str> {
    match kind {
        ItemKind::Track => Some("media_file"),
        ItemKind::Album => Some("album"),
        ItemKind::Artist => None,
    }
}

/// `created_at` of a media file or album; always `None` for artists.
pub async fn get_created_at(
    conn: &mut SqliteConnection,
    kind: ItemKind,
    id: &str,
) -> sqlx::Result<Option<Timestamp>> {
    let Some(table) = created_at_table(kind) else {
        return Ok(None);
    };
    let row: Option<(Option<String>,)> =
        sqlx::query_as(&format!("SELECT created_at FROM {table} WHERE id = ?"))
            .bind(id)
            .fetch_optional(conn)
            .await?;
    Ok(row
        .and_then(|(raw,)| raw)
        .as_deref()
        .and_then(parse_timestamp))
}

/// Set `created_at` of a media file or album. Returns whether a row changed.
pub async fn set_created_at(
    conn: &mut SqliteConnection,
    kind: ItemKind,
    id: &str,
    value: &Timestamp,
) -> sqlx::Result<bool> {
    let Some(table) = created_at_table(kind) else {
        return Ok(false);
    };
    let result = sqlx::query(&format!("UPDATE {table} SET created_at = ? WHERE id = ?"))
        .bind(format_timestamp(value))
        .bind(id)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

// ============================================================================
// Playlists
// ============================================================================

/// Id of the playlist with this name owned by the user.
pub async fn find_playlist(
    conn: &mut SqliteConnection,
    name: &str,
    owner_id: &str,
) -> sqlx::Result<Option<String>> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT id FROM playlist WHERE name = ? AND owner_id = ? LIMIT 1")
            .bind(name)
            .bind(owner_id)
            .fetch_optional(conn)
            .await?;
    Ok(row.map(|(id,)| id))
}

/// Create an empty private playlist.
pub async fn create_playlist(
    conn: &mut SqliteConnection,
    id: &str,
    name: &str,
    owner_id: &str,
    now: &Timestamp,
) -> sqlx::Result<()> {
    let now = format_timestamp(now);
    sqlx::query(
        r#"
        INSERT INTO playlist (id, name, owner_id, created_at, updated_at, public, song_count)
        VALUES (?, ?, ?, ?, ?, false, 0)
        "#,
    )
    .bind(id)
    .bind(name)
    .bind(owner_id)
    .bind(&now)
    .bind(&now)
    .execute(conn)
    .await?;
    Ok(())
}

/// Replace a playlist's entries with `media_file_ids`, in order.
///
/// Entry ids are 1-based positions.
pub async fn replace_playlist_tracks(
    conn: &mut SqliteConnection,
    playlist_id: &str,
    media_file_ids: &[String],
    now: &Timestamp,
) -> sqlx::Result<()> {
    sqlx::query("DELETE FROM playlist_tracks WHERE playlist_id = ?")
        .bind(playlist_id)
        .execute(&mut *conn)
        .await?;

    for (position, media_file_id) in media_file_ids.iter().enumerate() {
        sqlx::query("INSERT INTO playlist_tracks (id, playlist_id, media_file_id) VALUES (?, ?, ?)")
            .bind(position as i64 + 1)
            .bind(playlist_id)
            .bind(media_file_id)
            .execute(&mut *conn)
            .await?;
    }

    sqlx::query("UPDATE playlist SET song_count = ?, updated_at = ? WHERE id = ?")
        .bind(media_file_ids.len() as i64)
        .bind(format_timestamp(now))
        .bind(playlist_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Entries of a playlist in position order.
pub async fn playlist_tracks(
    conn: &mut SqliteConnection,
    playlist_id: &str,
) -> sqlx::Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT media_file_id FROM playlist_tracks WHERE playlist_id = ? ORDER BY id",
    )
    .bind(playlist_id)
    .fetch_all(conn)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

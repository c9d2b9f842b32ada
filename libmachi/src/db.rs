//! Database operations for Machi

use sqlx::sqlite::SqlitePool;
use std::path::Path;

use crate::error::{DbError, Result};
use crate::types::{MediaAsset, PostRecord};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    pub async fn new(db_path: &str) -> Result<Self> {
        // Expand path and create parent directories
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // Forward slashes work for SQLite URLs on every platform; mode=rwc
        // creates the file when missing
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        tracing::debug!("Opened catalog database at {}", expanded_path);
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ------------------------------------------------------------------
    // media
    // ------------------------------------------------------------------

    /// Insert a media row
    ///
    /// Returns `false` when the path is already cataloged.
    pub async fn insert_media(&self, title: &str, file_path: &str, added: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO media (title, file_path, added)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(title)
        .bind(file_path)
        .bind(added)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Ok(false),
            Err(e) => Err(DbError::SqlxError(e).into()),
        }
    }

    pub async fn get_media(&self, media_id: i64) -> Result<Option<MediaAsset>> {
        let media = sqlx::query_as::<_, MediaAsset>(
            r#"
            SELECT media_id, title, file_path, added FROM media WHERE media_id = ?
            "#,
        )
        .bind(media_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(media)
    }

    pub async fn find_media_by_path(&self, file_path: &str) -> Result<Option<MediaAsset>> {
        let media = sqlx::query_as::<_, MediaAsset>(
            r#"
            SELECT media_id, title, file_path, added FROM media WHERE file_path = ?
            "#,
        )
        .bind(file_path)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(media)
    }

    /// Uniformly random row among those never posted
    pub async fn random_unposted_media(&self) -> Result<Option<MediaAsset>> {
        let media = sqlx::query_as::<_, MediaAsset>(
            r#"
            SELECT m.media_id, m.title, m.file_path, m.added
            FROM media m
            WHERE NOT EXISTS (SELECT 1 FROM posts p WHERE p.media_id = m.media_id)
            ORDER BY RANDOM()
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(media)
    }

    /// Row whose most recent post is the oldest
    ///
    /// Ties on timestamp fall back to the most recent post id, so rows posted
    /// within the same second keep their publication order.
    pub async fn least_recently_posted_media(&self) -> Result<Option<MediaAsset>> {
        let media = sqlx::query_as::<_, MediaAsset>(
            r#"
            SELECT m.media_id, m.title, m.file_path, m.added
            FROM media m
            JOIN posts p ON p.media_id = m.media_id
            GROUP BY m.media_id
            ORDER BY MAX(p.timestamp) ASC, MAX(p.post_id) ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(media)
    }

    /// Delete a media row; posts referencing it keep their history with a
    /// cleared `media_id`
    pub async fn delete_media(&self, media_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM media WHERE media_id = ?")
            .bind(media_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn count_media(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM media")
            .fetch_one(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(count)
    }

    /// Delete rows at or below a directory prefix
    pub async fn delete_media_under(&self, prefix: &str) -> Result<u64> {
        let prefix = prefix.trim_end_matches('/');
        let pattern = format!("{}/%", escape_like(prefix));

        let result = sqlx::query(
            r#"
            DELETE FROM media WHERE file_path = ? OR file_path LIKE ? ESCAPE '\'
            "#,
        )
        .bind(prefix)
        .bind(pattern)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected())
    }

    pub async fn clear_media(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM media")
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected())
    }

    // ------------------------------------------------------------------
    // posts
    // ------------------------------------------------------------------

    /// Append a post and return its id
    pub async fn insert_post(
        &self,
        post_body: &str,
        media_id: Option<i64>,
        link: &str,
        tweet_id: &str,
        timestamp: i64,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO posts (post_body, media_id, link, tweet_id, timestamp)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(post_body)
        .bind(media_id)
        .bind(link)
        .bind(tweet_id)
        .bind(timestamp)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.last_insert_rowid())
    }

    /// Newest posts first
    pub async fn recent_posts(&self, limit: u32) -> Result<Vec<PostRecord>> {
        let posts = sqlx::query_as::<_, PostRecord>(
            r#"
            SELECT post_id, post_body, media_id, link, tweet_id, timestamp
            FROM posts
            ORDER BY timestamp DESC, post_id DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(posts)
    }
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

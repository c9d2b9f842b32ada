//! Media ledger: catalog of publishable files and the posts made from them
//!
//! Selection favors files that were never posted. Once every file has been
//! posted at least once it falls back to the file whose latest post is the
//! oldest, which yields round-robin publishing over the catalog.
//!
//! Existence on disk is only checked when a row is selected. A selected row
//! whose file has disappeared is deleted and selection starts over; the
//! number of such purges is bounded by the catalog size at entry.

use regex::Regex;
use std::path::{Component, Path};
use std::sync::OnceLock;

use crate::db::Database;
use crate::error::{LedgerError, Result};
use crate::types::{MediaAsset, PostRecord, PublishResult};

/// Catalog and post history
#[derive(Clone)]
pub struct Ledger {
    db: Database,
}

impl Ledger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Catalog a file; `false` if its path is already cataloged
    pub async fn ingest(&self, path: &Path) -> Result<bool> {
        let file_path = catalog_path(path);
        let title = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| file_path.clone());

        let added = self
            .db
            .insert_media(&title, &file_path, chrono::Utc::now().timestamp())
            .await?;

        if added {
            tracing::debug!("Cataloged {}", file_path);
        } else {
            tracing::trace!("Already cataloged: {}", file_path);
        }
        Ok(added)
    }

    /// Pick the next asset to publish
    ///
    /// With an explicit path only that exact path is accepted, after the
    /// same resolution [`catalog_path`] applies on ingest.
    ///
    /// # Errors
    ///
    /// - `LedgerError::NotFound` if the explicit path is not cataloged, or
    ///   was purged because the file no longer exists
    /// - `LedgerError::NoMediaAvailable` if the catalog is empty, or becomes
    ///   empty after purging missing files
    pub async fn select(&self, explicit: Option<&Path>) -> Result<MediaAsset> {
        let explicit = explicit.map(catalog_path);
        let budget = self.db.count_media().await?;

        for _ in 0..=budget {
            let candidate = match &explicit {
                Some(path) => self.db.find_media_by_path(path).await?.ok_or_else(|| {
                    tracing::error!("No media found with path '{}'", path);
                    LedgerError::NotFound(path.clone())
                })?,
                None => self.next_in_rotation().await?,
            };

            if Path::new(&candidate.file_path).is_file() {
                tracing::info!(
                    "Selected media {} ({})",
                    candidate.media_id,
                    candidate.file_path
                );
                return Ok(candidate);
            }

            tracing::warn!(
                "Media {} missing on disk, removing from catalog: {}",
                candidate.media_id,
                candidate.file_path
            );
            self.db.delete_media(candidate.media_id).await?;
        }

        tracing::error!("Every cataloged file was missing on disk");
        Err(LedgerError::NoMediaAvailable.into())
    }

    async fn next_in_rotation(&self) -> Result<MediaAsset> {
        if let Some(media) = self.db.random_unposted_media().await? {
            return Ok(media);
        }
        if let Some(media) = self.db.least_recently_posted_media().await? {
            tracing::debug!("Every file has been posted; reposting the least recent");
            return Ok(media);
        }
        tracing::error!("Catalog is empty");
        Err(LedgerError::NoMediaAvailable.into())
    }

    /// Append the post described by a successful publish result
    ///
    /// Only 201 results are accepted. The short link is taken from the
    /// returned post text; the media table is not touched.
    ///
    /// A 201 body without a short link fails with `LinkNotFound`. The post
    /// exists remotely at that point but has no row here, so its remote id
    /// is logged for manual reconciliation.
    pub async fn record(&self, result: &PublishResult, media_id: Option<i64>) -> Result<PostRecord> {
        let data = match (&result.data, result.is_published()) {
            (Some(data), true) => data,
            _ => return Err(LedgerError::NotPublished(result.status).into()),
        };

        let link = extract_link(&data.text).ok_or_else(|| {
            tracing::error!(
                "Post {} was published but not recorded, no short link in: {}",
                data.id,
                data.text
            );
            LedgerError::LinkNotFound {
                post_id: data.id.clone(),
                text: data.text.clone(),
            }
        })?;

        let timestamp = chrono::Utc::now().timestamp();
        let post_id = self
            .db
            .insert_post(&data.text, media_id, &link, &data.id, timestamp)
            .await?;

        tracing::info!("Recorded post {} ({})", post_id, link);

        Ok(PostRecord {
            post_id,
            post_body: data.text.clone(),
            media_id,
            link,
            tweet_id: data.id.clone(),
            timestamp,
        })
    }

    /// Most recent posts, newest first
    pub async fn history(&self, limit: u32) -> Result<Vec<PostRecord>> {
        self.db.recent_posts(limit).await
    }

    pub async fn get_media(&self, media_id: i64) -> Result<Option<MediaAsset>> {
        self.db.get_media(media_id).await
    }

    pub async fn count_media(&self) -> Result<i64> {
        self.db.count_media().await
    }

    /// Remove rows for files at or below an excluded directory
    pub async fn purge_excluded(&self, dir: &Path) -> Result<u64> {
        let removed = self.db.delete_media_under(&catalog_path(dir)).await?;
        if removed > 0 {
            tracing::info!("Removed {} excluded entries under {}", removed, dir.display());
        }
        Ok(removed)
    }

    /// Empty the catalog; post history is kept
    pub async fn clear_media(&self) -> Result<u64> {
        self.db.clear_media().await
    }
}

/// Last `https://t.co/...` token in a post body
pub fn extract_link(text: &str) -> Option<String> {
    static LINK: OnceLock<Regex> = OnceLock::new();
    let re = LINK.get_or_init(|| Regex::new(r"https://t\.co/\S+").expect("valid link pattern"));
    re.find_iter(text).last().map(|m| m.as_str().to_string())
}

/// Key a file is cataloged under
///
/// Relative paths are resolved against the working directory, so a catalog
/// built from a relative media root matches absolute lookups and vice versa.
pub fn catalog_path(path: &Path) -> String {
    if path.is_absolute() {
        return normalize_path(path);
    }
    match std::env::current_dir() {
        Ok(cwd) => normalize_path(&cwd.join(path)),
        Err(e) => {
            tracing::warn!("Cannot resolve working directory, keeping {}: {}", path.display(), e);
            normalize_path(path)
        }
    }
}

/// Lexical path normalization
///
/// Drops `.` components, folds `..` into the preceding component and joins
/// with `/`. The filesystem is not consulted.
pub fn normalize_path(path: &Path) -> String {
    let mut prefix = String::new();
    let mut absolute = false;
    let mut parts: Vec<String> = Vec::new();

    for component in path.components() {
        match component {
            Component::Prefix(p) => prefix = p.as_os_str().to_string_lossy().to_string(),
            Component::RootDir => absolute = true,
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(last) if last != ".." => {
                    parts.pop();
                }
                _ if absolute => {}
                _ => parts.push("..".to_string()),
            },
            Component::Normal(part) => parts.push(part.to_string_lossy().to_string()),
        }
    }

    let joined = parts.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("{}/{}", prefix, joined),
        (false, true) if prefix.is_empty() => ".".to_string(),
        (false, _) => format!("{}{}", prefix, joined),
    }
}

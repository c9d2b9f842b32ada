//! Publish cycle orchestration
//!
//! [`PublishService`] ties the ledger, the uploader and the post client into
//! one cycle:
//!
//! 1. select an asset from the catalog
//! 2. build the post text
//! 3. upload the file and wait for processing
//! 4. create the post with the uploaded media attached
//! 5. record the post, but only if the platform answered 201
//!
//! Every step is awaited in sequence. A failure at any step ends the cycle;
//! the next scheduled run starts over from selection.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use libmachi::credentials::StdinPrompt;
//! use libmachi::service::{CycleOutcome, PublishService};
//! use libmachi::Config;
//!
//! # async fn example() -> libmachi::Result<()> {
//! let config = Arc::new(Config::load()?);
//! let service = PublishService::new(config, Arc::new(StdinPrompt)).await?;
//!
//! if let CycleOutcome::Published { link, .. } = service.run(None, None).await? {
//!     println!("{}", link);
//! }
//! # Ok(())
//! # }
//! ```

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::credentials::{credential_for, Prompt};
use crate::db::Database;
use crate::error::{MachiError, Result};
use crate::ledger::Ledger;
use crate::publish::PostClient;
use crate::transport::{ReqwestTransport, Transport};
use crate::types::MediaAsset;
use crate::upload::MediaUploader;
use crate::Config;

/// Result of one publish cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// The post was created and recorded
    Published {
        media: MediaAsset,
        link: String,
        post_id: i64,
    },
    /// The platform refused the post; nothing was recorded
    Rejected {
        media: MediaAsset,
        status: u16,
        body: String,
    },
}

/// Runs publish cycles against one catalog
pub struct PublishService {
    config: Arc<Config>,
    ledger: Ledger,
    uploader: MediaUploader,
    poster: PostClient,
}

impl PublishService {
    /// Create a service talking to the configured endpoints
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - A secret required by the configured schemes is missing
    /// - The upload chunk size is out of range
    /// - The database cannot be opened or migrated
    pub async fn new(config: Arc<Config>, prompt: Arc<dyn Prompt>) -> Result<Self> {
        let transport = ReqwestTransport::new(
            &config.api.user_agent,
            Duration::from_secs(config.api.timeout_secs),
        )?;
        Self::with_transport(config, Arc::new(transport), prompt).await
    }

    /// Create a service over the given transport
    pub async fn with_transport(
        config: Arc<Config>,
        transport: Arc<dyn Transport>,
        prompt: Arc<dyn Prompt>,
    ) -> Result<Self> {
        let upload_credential = credential_for(
            config.upload.auth,
            &config,
            Arc::clone(&transport),
            Arc::clone(&prompt),
        )?;
        let post_credential =
            credential_for(config.post.auth, &config, Arc::clone(&transport), prompt)?;

        let uploader = MediaUploader::new(&config, Arc::clone(&transport), upload_credential)?;
        let poster = PostClient::new(&config, transport, post_credential);

        let db = Database::new(&config.database_path()).await?;

        Ok(Self {
            ledger: Ledger::new(db),
            config,
            uploader,
            poster,
        })
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn poster(&self) -> &PostClient {
        &self.poster
    }

    /// Run one cycle
    ///
    /// `text_override` replaces the templated post text.
    ///
    /// # Errors
    ///
    /// Selection, upload, credential and transport failures end the cycle
    /// with an error. A rejected post is not an error; see
    /// [`CycleOutcome::Rejected`].
    pub async fn run(&self, explicit: Option<&Path>, text_override: Option<&str>) -> Result<CycleOutcome> {
        if let Some(text) = text_override {
            if text.trim().is_empty() {
                return Err(MachiError::InvalidInput("Post text cannot be empty".to_string()));
            }
        }

        let media = self.ledger.select(explicit).await?;
        let text = match text_override {
            Some(text) => text.to_string(),
            None => render_post_text(&self.config.post.template, &media),
        };

        let upload = self
            .uploader
            .upload(Path::new(&media.file_path))
            .await?;

        let result = self.poster.post(&text, Some(&upload.media_id)).await?;

        if !result.is_published() {
            tracing::warn!(
                "Post for media {} not recorded (status {})",
                media.media_id,
                result.status
            );
            return Ok(CycleOutcome::Rejected {
                media,
                status: result.status,
                body: result.body,
            });
        }

        let record = self.ledger.record(&result, Some(media.media_id)).await?;
        Ok(CycleOutcome::Published {
            media,
            link: record.link,
            post_id: record.post_id,
        })
    }

    /// Select the asset the next cycle would publish, without network traffic
    ///
    /// Missing files found along the way are still purged from the catalog.
    pub async fn dry_run(&self, explicit: Option<&Path>) -> Result<MediaAsset> {
        self.ledger.select(explicit).await
    }
}

/// Substitute `{title}` in the post template
pub fn render_post_text(template: &str, media: &MediaAsset) -> String {
    template.replace("{title}", &media.title)
}

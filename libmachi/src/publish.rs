//! Publication client

use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::config::Config;
use crate::credentials::Credential;
use crate::error::Result;
use crate::transport::{HttpRequest, Transport};
use crate::types::{PostData, PublishResult};

#[derive(Deserialize)]
struct CreatedPost {
    data: PostData,
}

/// Response to a diagnostic lookup
#[derive(Debug, Clone)]
pub struct LookupResult {
    pub status: u16,
    pub body: String,
    pub json: Option<serde_json::Value>,
}

/// Creates posts, optionally with attached media
pub struct PostClient {
    transport: Arc<dyn Transport>,
    credential: Arc<dyn Credential>,
    post_url: String,
}

impl PostClient {
    pub fn new(config: &Config, transport: Arc<dyn Transport>, credential: Arc<dyn Credential>) -> Self {
        Self {
            transport,
            credential,
            post_url: config.api.post_url.clone(),
        }
    }

    /// Create a post
    ///
    /// Only HTTP 201 counts as published. Any other status is logged and
    /// returned as-is rather than raised; the caller decides what to do with
    /// it.
    ///
    /// # Errors
    ///
    /// Credential failures and transport failures propagate.
    pub async fn post(&self, text: &str, media_id: Option<&str>) -> Result<PublishResult> {
        let body = match media_id {
            Some(id) => json!({"text": text, "media": {"media_ids": [id]}}),
            None => json!({"text": text}),
        };

        let auth = self.credential.acquire().await?;
        let mut request = HttpRequest::post(&self.post_url)
            .header("Content-Type", "application/json")
            .json(body);
        auth.authorize(&mut request);

        let response = self.transport.send(request).await?;

        if response.status != 201 {
            tracing::warn!(
                "Post request returned an error: {} {}",
                response.status,
                response.body
            );
            return Ok(PublishResult {
                status: response.status,
                body: response.body,
                data: None,
            });
        }

        let data = match response.json::<CreatedPost>() {
            Ok(created) => Some(created.data),
            Err(e) => {
                tracing::warn!("Post created but response could not be parsed ({}): {}", e, response.body);
                None
            }
        };

        if let Some(data) = &data {
            tracing::info!("Published post {}", data.id);
        }

        Ok(PublishResult {
            status: response.status,
            body: response.body,
            data,
        })
    }

    /// Fetch a post for diagnostics
    pub async fn get(&self, post_id: &str) -> Result<LookupResult> {
        let auth = self.credential.acquire().await?;
        let mut request = HttpRequest::get(format!("{}/{}", self.post_url.trim_end_matches('/'), post_id));
        auth.authorize(&mut request);

        let response = self.transport.send(request).await?;
        tracing::debug!("Lookup of post {} returned {}", post_id, response.status);

        Ok(LookupResult {
            status: response.status,
            json: response.json().ok(),
            body: response.body,
        })
    }
}

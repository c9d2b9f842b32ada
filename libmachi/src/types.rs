//! Core types for Machi

use serde::{Deserialize, Serialize};

/// A cataloged media file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MediaAsset {
    pub media_id: i64,
    pub title: String,
    /// Normalized path, unique across the catalog
    pub file_path: String,
    /// Unix timestamp of insertion
    pub added: i64,
}

/// A confirmed publication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PostRecord {
    pub post_id: i64,
    pub post_body: String,
    /// Cleared when the media row is deleted
    pub media_id: Option<i64>,
    pub link: String,
    /// Remote post id
    pub tweet_id: String,
    pub timestamp: i64,
}

/// `data` member of a publish response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostData {
    pub id: String,
    pub text: String,
}

/// Outcome of a publish request
///
/// Only a 201 counts as published. Anything else carries the raw status and
/// body for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishResult {
    pub status: u16,
    pub body: String,
    pub data: Option<PostData>,
}

impl PublishResult {
    pub fn is_published(&self) -> bool {
        self.status == 201 && self.data.is_some()
    }
}

/// Server-side processing state of an uploaded asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingState {
    Pending,
    InProgress,
    Succeeded,
    Failed,
}

impl std::fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingState::Pending => write!(f, "pending"),
            ProcessingState::InProgress => write!(f, "in_progress"),
            ProcessingState::Succeeded => write!(f, "succeeded"),
            ProcessingState::Failed => write!(f, "failed"),
        }
    }
}

/// `processing_info` member of FINALIZE and STATUS responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingInfo {
    pub state: ProcessingState,
    #[serde(default)]
    pub check_after_secs: Option<u64>,
    #[serde(default)]
    pub progress_percent: Option<u8>,
    #[serde(default)]
    pub error: Option<ProcessingErrorInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingErrorInfo {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl std::fmt::Display for ProcessingErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = self.name.as_deref().unwrap_or("unknown");
        match &self.message {
            Some(message) => write!(f, "{}: {}", name, message),
            None => write!(f, "{}", name),
        }
    }
}

//! Configuration management for Machi
//!
//! The configuration is loaded once at process start and handed to each
//! component by reference. Every section has defaults, so a config file only
//! needs to name what differs from them (usually the media location and the
//! API secrets).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, Result};

/// Upper bound the upload protocol places on a single APPEND segment
pub const MAX_CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// Segment size used when none is configured
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub media: MediaConfig,
    pub api: ApiConfig,
    pub oauth1: OAuth1Config,
    pub oauth2: OAuth2Config,
    pub upload: UploadConfig,
    pub post: PostConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "~/.local/share/machi/machi.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Root folder scanned for media
    pub location: String,
    /// Folders below `location` that are never cataloged
    pub exclude_folders: Vec<String>,
    pub media_type: String,
    pub media_category: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            location: "~/Videos/machi".to_string(),
            exclude_folders: Vec::new(),
            media_type: "video/mp4".to_string(),
            media_category: "tweet_video".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub upload_url: String,
    pub post_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            upload_url: "https://upload.twitter.com/1.1/media/upload.json".to_string(),
            post_url: "https://api.twitter.com/2/tweets".to_string(),
            user_agent: "machi-bot".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuth1Config {
    pub consumer_key: Option<String>,
    pub consumer_secret: Option<String>,
    pub token_file: String,
    pub request_token_url: String,
    pub authorize_url: String,
    pub access_token_url: String,
}

impl Default for OAuth1Config {
    fn default() -> Self {
        Self {
            consumer_key: None,
            consumer_secret: None,
            token_file: "~/.config/machi/oauth1_token.json".to_string(),
            request_token_url: "https://api.twitter.com/oauth/request_token".to_string(),
            authorize_url: "https://api.twitter.com/oauth/authorize".to_string(),
            access_token_url: "https://api.twitter.com/oauth/access_token".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuth2Config {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub token_file: String,
    /// Must match the redirect URL registered for the app exactly
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub authorize_url: String,
    pub token_url: String,
}

impl Default for OAuth2Config {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            token_file: "~/.config/machi/oauth2_token.json".to_string(),
            redirect_uri: "https://localhost".to_string(),
            scopes: vec![
                "tweet.read".to_string(),
                "tweet.write".to_string(),
                "users.read".to_string(),
                "offline.access".to_string(),
            ],
            authorize_url: "https://twitter.com/i/oauth2/authorize".to_string(),
            token_url: "https://api.twitter.com/2/oauth2/token".to_string(),
        }
    }
}

/// Authorization scheme used by a call site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthScheme {
    /// Long-lived token pair, OAuth 1.0a signed requests
    OAuth1,
    /// Bearer token with refresh, OAuth 2.0 with PKCE
    OAuth2,
}

impl std::fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthScheme::OAuth1 => write!(f, "oauth1"),
            AuthScheme::OAuth2 => write!(f, "oauth2"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub auth: AuthScheme,
    pub chunk_size: usize,
    /// Upper bound on the accumulated processing wait; unset waits as long as
    /// the server keeps reporting a pending state
    pub max_processing_wait_secs: Option<u64>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            auth: AuthScheme::OAuth1,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_processing_wait_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostConfig {
    pub auth: AuthScheme,
    /// Post text; `{title}` is replaced with the media title
    pub template: String,
}

impl Default for PostConfig {
    fn default() -> Self {
        Self {
            auth: AuthScheme::OAuth2,
            template: "{title}".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default location
    ///
    /// A missing file is not an error: defaults apply, with secrets taken
    /// from the environment.
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        if !config_path.exists() {
            tracing::warn!(
                "No config file at {}, using defaults",
                config_path.display()
            );
            let mut config = Config::default();
            config.apply_env_overrides();
            return Ok(config);
        }
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let mut config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Fill secrets from the environment
    ///
    /// Environment values win over the file so secrets can be kept out of it.
    pub fn apply_env_overrides(&mut self) {
        fn env(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.trim().is_empty())
        }

        if let Some(v) = env("MACHI_CONSUMER_KEY") {
            self.oauth1.consumer_key = Some(v);
        }
        if let Some(v) = env("MACHI_CONSUMER_SECRET") {
            self.oauth1.consumer_secret = Some(v);
        }
        if let Some(v) = env("MACHI_CLIENT_ID") {
            self.oauth2.client_id = Some(v);
        }
        if let Some(v) = env("MACHI_CLIENT_SECRET") {
            self.oauth2.client_secret = Some(v);
        }
    }

    /// Expanded database path
    pub fn database_path(&self) -> String {
        expand(&self.database.path)
    }

    /// Expanded media root
    pub fn media_root(&self) -> PathBuf {
        PathBuf::from(expand(&self.media.location))
    }
}

/// Expand `~` and environment variables in a configured path
pub fn expand(path: &str) -> String {
    shellexpand::full(path)
        .map(|p| p.to_string())
        .unwrap_or_else(|_| shellexpand::tilde(path).to_string())
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("MACHI_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("machi").join("config.toml"))
}

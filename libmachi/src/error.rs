//! Error types for Machi

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MachiError>;

#[derive(Error, Debug)]
pub enum MachiError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl MachiError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            MachiError::InvalidInput(_) => 3,
            MachiError::Credential(_) => 2,
            MachiError::Config(_)
            | MachiError::Database(_)
            | MachiError::Upload(_)
            | MachiError::Ledger(_)
            | MachiError::Transport(_) => 1,
        }
    }
}

impl From<reqwest::Error> for MachiError {
    fn from(error: reqwest::Error) -> Self {
        MachiError::Transport(error.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Missing required secret: {0}")]
    MissingSecret(String),

    #[error("Failed to access token store {path}: {source}")]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Token store {path} is malformed: {reason}")]
    MalformedStore { path: PathBuf, reason: String },

    #[error("Token exchange with {endpoint} failed with status {status}: {body}")]
    Exchange {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Authorization response rejected: {0}")]
    AuthorizationResponse(String),

    #[error("Interactive input failed: {0}")]
    Prompt(String),
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Cannot read upload source {path}: {source}")]
    Source {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Upload source {path} changed size during transfer ({sent} of {total} bytes sent)")]
    ShortRead { path: PathBuf, sent: u64, total: u64 },

    #[error("{phase} rejected with status {status}: {body}")]
    Rejected {
        phase: UploadPhase,
        status: u16,
        body: String,
    },

    #[error("Unexpected {phase} response: {reason}")]
    MalformedResponse { phase: UploadPhase, reason: String },

    #[error("Processing of media {media_id} failed: {reason}")]
    ProcessingFailed { media_id: String, reason: String },

    #[error("Processing of media {media_id} still pending after {waited_secs}s (limit {limit_secs}s)")]
    ProcessingTimeout {
        media_id: String,
        waited_secs: u64,
        limit_secs: u64,
    },

    #[error("Invalid chunk size {0}: must be between 1 byte and 5 MiB")]
    ChunkSize(usize),
}

/// Upload protocol phase, used to tag failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    Init,
    Append,
    Finalize,
    Status,
}

impl std::fmt::Display for UploadPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadPhase::Init => write!(f, "INIT"),
            UploadPhase::Append => write!(f, "APPEND"),
            UploadPhase::Finalize => write!(f, "FINALIZE"),
            UploadPhase::Status => write!(f, "STATUS"),
        }
    }
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("No media found with path '{0}'")]
    NotFound(String),

    #[error("No media available. Try scanning the library first.")]
    NoMediaAvailable,

    #[error("Post {post_id} was published but not recorded: no short link in '{text}'")]
    LinkNotFound { post_id: String, text: String },

    #[error("Cannot record post with status {0}; only 201 responses are recorded")]
    NotPublished(u16),
}

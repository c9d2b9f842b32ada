//! Machi - periodic video publication bot
//!
//! This library catalogs a local video library and publishes one video per
//! run: it picks an asset round-robin, uploads it through the chunked media
//! upload protocol, creates a post with the uploaded media attached and
//! records the result.

pub mod config;
pub mod credentials;
pub mod db;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod publish;
pub mod scan;
pub mod service;
pub mod transport;
pub mod types;
pub mod upload;

// Re-export commonly used types
pub use config::Config;
pub use credentials::{Authorization, Credential, Prompt, StdinPrompt};
pub use db::Database;
pub use error::{MachiError, Result};
pub use ledger::Ledger;
pub use service::{CycleOutcome, PublishService};
pub use types::{MediaAsset, PostRecord, PublishResult};

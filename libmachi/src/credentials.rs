//! Credential lifecycle for signed platform requests
//!
//! Two authorization schemes are supported behind one [`Credential`] trait:
//!
//! - [`oauth1::TokenPairCredential`]: a long-lived token pair obtained once
//!   through the three-legged PIN flow and reused indefinitely.
//! - [`oauth2::BearerCredential`]: a bearer token obtained through the PKCE
//!   authorization-code flow and refreshed shortly before it expires.
//!
//! Both persist their state in a JSON [`TokenStore`] file. State is loaded at
//! every `acquire()`; nothing is cached across process restarts. When the file
//! is missing the interactive flow runs once through a [`Prompt`].
//!
//! Upload and publish call sites only see `&dyn Credential` and the
//! [`Authorization`] it yields, so a new scheme only needs a new implementor.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::VecDeque;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::config::{expand, AuthScheme, Config};
use crate::error::{CredentialError, Result};
use crate::transport::{HttpRequest, Transport};

pub mod oauth1;
pub mod oauth2;

#[cfg(test)]
mod tests;

pub use oauth1::{TokenPair, TokenPairCredential};
pub use oauth2::{BearerCredential, BearerToken};

/// Source of request authority for one authorization scheme
#[async_trait]
pub trait Credential: Send + Sync {
    /// Scheme implemented by this credential
    fn scheme(&self) -> AuthScheme;

    /// Produce a usable authorization, running the interactive flow or a
    /// refresh when needed
    ///
    /// # Errors
    ///
    /// - `CredentialError::Exchange` if the token endpoint rejects a request
    /// - `CredentialError::Store` if the token file cannot be read or written
    /// - `MachiError::Transport` if the token endpoint cannot be reached
    async fn acquire(&self) -> Result<Authorization>;
}

/// Authority to sign requests, as returned by [`Credential::acquire`]
pub enum Authorization {
    /// OAuth 1.0a HMAC-SHA1 signing keys
    TokenPair(oauth1::SigningKeys),
    /// OAuth 2.0 bearer access token
    Bearer(SecretString),
}

impl Authorization {
    /// Attach authorization to a request
    pub fn authorize(&self, request: &mut HttpRequest) {
        match self {
            Authorization::TokenPair(keys) => {
                let header = keys.authorization_header(request, &[]);
                request.headers.push(("Authorization".to_string(), header));
            }
            Authorization::Bearer(token) => {
                request.headers.push((
                    "Authorization".to_string(),
                    format!("Bearer {}", token.expose_secret()),
                ));
            }
        }
    }

    pub fn scheme(&self) -> AuthScheme {
        match self {
            Authorization::TokenPair(_) => AuthScheme::OAuth1,
            Authorization::Bearer(_) => AuthScheme::OAuth2,
        }
    }
}

impl std::fmt::Debug for Authorization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Authorization::TokenPair(_) => write!(f, "Authorization::TokenPair([REDACTED])"),
            Authorization::Bearer(_) => write!(f, "Authorization::Bearer([REDACTED])"),
        }
    }
}

/// Build the credential for a call site from configuration
///
/// # Errors
///
/// Returns `CredentialError::MissingSecret` when the scheme's secrets are not
/// configured.
pub fn credential_for(
    scheme: AuthScheme,
    config: &Config,
    transport: Arc<dyn Transport>,
    prompt: Arc<dyn Prompt>,
) -> Result<Arc<dyn Credential>> {
    let credential: Arc<dyn Credential> = match scheme {
        AuthScheme::OAuth1 => Arc::new(TokenPairCredential::new(&config.oauth1, transport, prompt)?),
        AuthScheme::OAuth2 => Arc::new(BearerCredential::new(&config.oauth2, transport, prompt)?),
    };
    Ok(credential)
}

/// Read a required secret, rejecting blanks
pub(crate) fn require_secret(value: Option<&String>, field: &str) -> Result<SecretString> {
    match value.map(|v| v.trim()).filter(|v| !v.is_empty()) {
        Some(v) => Ok(SecretString::from(v.to_string())),
        None => {
            tracing::error!("Missing required secret {}", field);
            Err(CredentialError::MissingSecret(field.to_string()).into())
        }
    }
}

// ============================================================================
// Token store
// ============================================================================

/// JSON file holding one scheme's persisted token state
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    /// Create a store for the given (possibly `~`-prefixed) path
    pub fn new(path: &str) -> Self {
        Self {
            path: PathBuf::from(expand(path)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored record, `None` if the file does not exist
    pub fn load<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CredentialError::Store {
                    path: self.path.clone(),
                    source: e,
                }
                .into())
            }
        };

        let record = serde_json::from_str(&content).map_err(|e| CredentialError::MalformedStore {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        Ok(Some(record))
    }

    /// Write the record, creating parent directories
    ///
    /// On Unix the file is restricted to the owner.
    pub fn save<T: Serialize>(&self, record: &T) -> Result<()> {
        let store_err = |source: std::io::Error| CredentialError::Store {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(store_err)?;
            }
        }

        let content = serde_json::to_string_pretty(record).map_err(|e| CredentialError::MalformedStore {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        std::fs::write(&self.path, content).map_err(store_err)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
                .map_err(store_err)?;
        }

        tracing::debug!("Saved token state to {}", self.path.display());
        Ok(())
    }
}

// ============================================================================
// Out-of-band input
// ============================================================================

/// Out-of-band input used by the interactive authorization flows
pub trait Prompt: Send + Sync {
    /// Show instructions and a URL to the operator and return their answer
    fn ask(&self, instructions: &str, url: &str) -> Result<String>;
}

/// Prompt on the terminal: instructions to stderr, answer from stdin
pub struct StdinPrompt;

impl Prompt for StdinPrompt {
    fn ask(&self, instructions: &str, url: &str) -> Result<String> {
        let mut stderr = std::io::stderr();
        writeln!(stderr, "{}", instructions)
            .and_then(|_| writeln!(stderr, "{}", url))
            .and_then(|_| write!(stderr, "> "))
            .and_then(|_| stderr.flush())
            .map_err(|e| CredentialError::Prompt(e.to_string()))?;

        let mut answer = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut answer)
            .map_err(|e| CredentialError::Prompt(e.to_string()))?;

        let answer = answer.trim().to_string();
        if answer.is_empty() {
            return Err(CredentialError::Prompt("no input received".to_string()).into());
        }
        Ok(answer)
    }
}

/// Prompt that replays canned answers and records what was shown
#[derive(Default)]
pub struct ScriptedPrompt {
    answers: Mutex<VecDeque<ScriptedAnswer>>,
    shown: Mutex<Vec<String>>,
}

enum ScriptedAnswer {
    Fixed(String),
    FromUrl(Box<dyn Fn(&str) -> String + Send + Sync>),
}

impl ScriptedPrompt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a fixed answer
    pub fn answer(self, answer: &str) -> Self {
        if let Ok(mut answers) = self.answers.lock() {
            answers.push_back(ScriptedAnswer::Fixed(answer.to_string()));
        }
        self
    }

    /// Queue an answer computed from the URL shown to the operator
    pub fn answer_with(self, f: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        if let Ok(mut answers) = self.answers.lock() {
            answers.push_back(ScriptedAnswer::FromUrl(Box::new(f)));
        }
        self
    }

    /// URLs shown so far
    pub fn shown(&self) -> Vec<String> {
        self.shown.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn times_asked(&self) -> usize {
        self.shown().len()
    }
}

impl Prompt for ScriptedPrompt {
    fn ask(&self, _instructions: &str, url: &str) -> Result<String> {
        if let Ok(mut shown) = self.shown.lock() {
            shown.push(url.to_string());
        }
        let next = self.answers.lock().ok().and_then(|mut a| a.pop_front());
        match next {
            Some(ScriptedAnswer::Fixed(answer)) => Ok(answer),
            Some(ScriptedAnswer::FromUrl(f)) => Ok(f(url)),
            None => Err(CredentialError::Prompt("no scripted answer left".to_string()).into()),
        }
    }
}

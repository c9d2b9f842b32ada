//! OAuth 2.0 bearer credential with PKCE authorization and refresh
//!
//! The stored access token is reused until it is within
//! [`REFRESH_MARGIN_SECS`] of `expires_at`, at which point a refresh-token
//! exchange replaces it. Without a stored record the authorization-code flow
//! runs once: the operator opens the authorization URL and pastes back the
//! URL they were redirected to.

use async_trait::async_trait;
use base64::{
    engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD},
    Engine as _,
};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use super::{require_secret, Authorization, Credential, Prompt, TokenStore};
use crate::config::{AuthScheme, OAuth2Config};
use crate::error::{CredentialError, Result};
use crate::transport::{HttpRequest, HttpResponse, Transport};

/// Refresh this many seconds before the recorded expiry to absorb clock skew
pub const REFRESH_MARGIN_SECS: i64 = 300;

/// Minimum PKCE verifier length
pub const MIN_VERIFIER_LEN: usize = 43;

/// Persisted bearer token record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BearerToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix timestamp, seconds
    #[serde(deserialize_with = "epoch_seconds")]
    pub expires_at: i64,
    #[serde(default, deserialize_with = "scope_list")]
    pub scope: Vec<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

// Older token files store a fractional timestamp
fn epoch_seconds<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<i64, D::Error> {
    let value = f64::deserialize(deserializer)?;
    Ok(value.floor() as i64)
}

// Accept both "a b c" and ["a", "b", "c"]
fn scope_list<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scope {
        Joined(String),
        List(Vec<String>),
    }

    Ok(match Scope::deserialize(deserializer)? {
        Scope::Joined(s) => s.split_whitespace().map(str::to_string).collect(),
        Scope::List(list) => list,
    })
}

/// Token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
}

/// Whether a token expiring at `expires_at` must be refreshed at `now`
pub fn needs_refresh(expires_at: i64, now: i64) -> bool {
    now >= expires_at - REFRESH_MARGIN_SECS
}

/// PKCE verifier and its S256 challenge
#[derive(Debug, Clone)]
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

impl Pkce {
    pub fn generate() -> Self {
        let verifier = generate_verifier();
        let challenge = code_challenge(&verifier);
        Self {
            verifier,
            challenge,
        }
    }
}

/// Random URL-safe verifier, alphanumeric only, at least 43 characters
pub fn generate_verifier() -> String {
    let mut bytes = [0u8; 48];
    loop {
        rand::thread_rng().fill_bytes(&mut bytes);
        let verifier: String = URL_SAFE_NO_PAD
            .encode(bytes)
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        if verifier.len() >= MIN_VERIFIER_LEN {
            return verifier;
        }
    }
}

/// S256 challenge: base64url of the SHA-256 digest, without padding
pub fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Extract the authorization code from the URL the operator was redirected to
pub fn parse_redirect(redirected: &str, expected_state: &str) -> Result<String> {
    let url = url::Url::parse(redirected.trim()).map_err(|e| {
        CredentialError::AuthorizationResponse(format!("not a URL ({}): {}", e, redirected.trim()))
    })?;

    let mut code = None;
    let mut state = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => {
                return Err(CredentialError::AuthorizationResponse(format!(
                    "authorization denied: {}",
                    value
                ))
                .into())
            }
            _ => {}
        }
    }

    if state.as_deref() != Some(expected_state) {
        return Err(CredentialError::AuthorizationResponse(
            "state parameter does not match the authorization request".to_string(),
        )
        .into());
    }

    code.ok_or_else(|| {
        CredentialError::AuthorizationResponse("redirect URL has no code parameter".to_string())
            .into()
    })
}

/// Bearer token credential
pub struct BearerCredential {
    client_id: String,
    client_secret: SecretString,
    config: OAuth2Config,
    store: TokenStore,
    transport: Arc<dyn Transport>,
    prompt: Arc<dyn Prompt>,
}

impl BearerCredential {
    /// Create the credential
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::MissingSecret` if the client id or secret is
    /// not configured.
    pub fn new(
        config: &OAuth2Config,
        transport: Arc<dyn Transport>,
        prompt: Arc<dyn Prompt>,
    ) -> Result<Self> {
        let client_id = require_secret(config.client_id.as_ref(), "oauth2.client_id")?;
        let client_secret = require_secret(config.client_secret.as_ref(), "oauth2.client_secret")?;

        Ok(Self {
            client_id: client_id.expose_secret().to_string(),
            client_secret,
            store: TokenStore::new(&config.token_file),
            config: config.clone(),
            transport,
            prompt,
        })
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    fn basic_auth(&self) -> String {
        let credentials = format!("{}:{}", self.client_id, self.client_secret.expose_secret());
        format!("Basic {}", BASE64.encode(credentials))
    }

    /// Authorization URL for the given PKCE pair and state
    pub fn authorization_url(&self, pkce: &Pkce, state: &str) -> Result<String> {
        let scope = self.config.scopes.join(" ");
        let url = url::Url::parse_with_params(
            &self.config.authorize_url,
            &[
                ("response_type", "code"),
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("scope", scope.as_str()),
                ("state", state),
                ("code_challenge", pkce.challenge.as_str()),
                ("code_challenge_method", "S256"),
            ],
        )
        .map_err(|e| CredentialError::AuthorizationResponse(format!("invalid authorize URL: {}", e)))?;
        Ok(url.to_string())
    }

    async fn authorize_interactively(&self) -> Result<BearerToken> {
        tracing::info!("Token file not found. Starting authorization.");

        let pkce = Pkce::generate();
        let state = generate_state();
        let url = self.authorization_url(&pkce, &state)?;

        let redirected = self.prompt.ask(
            "Visit the following URL to authorize the app, then paste the full URL you were redirected to:",
            &url,
        )?;
        let code = parse_redirect(&redirected, &state)?;

        let form = vec![
            ("grant_type".to_string(), "authorization_code".to_string()),
            ("code".to_string(), code),
            ("redirect_uri".to_string(), self.config.redirect_uri.clone()),
            ("code_verifier".to_string(), pkce.verifier),
            ("client_id".to_string(), self.client_id.clone()),
        ];
        let token = self.exchange(form, None).await?;
        tracing::info!("Access token acquired");
        Ok(token)
    }

    async fn refresh(&self, previous: &BearerToken, refresh_token: &str) -> Result<BearerToken> {
        tracing::info!("Refreshing access token");
        let form = vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("refresh_token".to_string(), refresh_token.to_string()),
            ("client_id".to_string(), self.client_id.clone()),
        ];
        self.exchange(form, Some(previous)).await
    }

    /// POST to the token endpoint and persist the result
    async fn exchange(
        &self,
        form: Vec<(String, String)>,
        previous: Option<&BearerToken>,
    ) -> Result<BearerToken> {
        let request = HttpRequest::post(&self.config.token_url)
            .header("Authorization", self.basic_auth())
            .form(form);

        let response = self.transport.send(request).await?;
        let token = self.parse_token(&response, previous)?;
        self.store.save(&token)?;
        Ok(token)
    }

    fn parse_token(&self, response: &HttpResponse, previous: Option<&BearerToken>) -> Result<BearerToken> {
        let exchange_error = |body: String| CredentialError::Exchange {
            endpoint: self.config.token_url.clone(),
            status: response.status,
            body,
        };

        if !response.is_success() {
            tracing::error!(
                "Token exchange failed: {} {}",
                response.status,
                response.body
            );
            return Err(exchange_error(response.body.clone()).into());
        }

        let parsed: TokenResponse = response
            .json()
            .map_err(|e| exchange_error(format!("unparseable token response ({}): {}", e, response.body)))?;

        let scope = match parsed.scope {
            Some(scope) => scope.split_whitespace().map(str::to_string).collect(),
            None => previous.map(|p| p.scope.clone()).unwrap_or_default(),
        };

        Ok(BearerToken {
            access_token: parsed.access_token,
            refresh_token: parsed
                .refresh_token
                .or_else(|| previous.and_then(|p| p.refresh_token.clone())),
            expires_at: chrono::Utc::now().timestamp() + parsed.expires_in,
            scope,
            token_type: parsed.token_type.unwrap_or_else(default_token_type),
        })
    }
}

#[async_trait]
impl Credential for BearerCredential {
    fn scheme(&self) -> AuthScheme {
        AuthScheme::OAuth2
    }

    async fn acquire(&self) -> Result<Authorization> {
        let token = match self.store.load::<BearerToken>()? {
            None => self.authorize_interactively().await?,
            Some(token) if needs_refresh(token.expires_at, chrono::Utc::now().timestamp()) => {
                match token.refresh_token.clone() {
                    Some(refresh_token) => self.refresh(&token, &refresh_token).await?,
                    None => {
                        tracing::warn!("Access token expired and no refresh token is stored");
                        self.authorize_interactively().await?
                    }
                }
            }
            Some(token) => {
                tracing::debug!("Using previous access token");
                token
            }
        };

        Ok(Authorization::Bearer(SecretString::from(token.access_token)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::ScriptedPrompt;
    use crate::transport::mock::MockTransport;
    use serde_json::json;
    use tempfile::TempDir;

    fn test_config(temp_dir: &TempDir) -> OAuth2Config {
        OAuth2Config {
            client_id: Some("client-id".to_string()),
            client_secret: Some("client-secret".to_string()),
            token_file: temp_dir
                .path()
                .join("oauth2.json")
                .to_string_lossy()
                .to_string(),
            ..OAuth2Config::default()
        }
    }

    fn stored_token(expires_at: i64) -> BearerToken {
        BearerToken {
            access_token: "cached-access".to_string(),
            refresh_token: Some("cached-refresh".to_string()),
            expires_at,
            scope: vec!["tweet.write".to_string()],
            token_type: "bearer".to_string(),
        }
    }

    fn bearer_of(auth: &Authorization) -> String {
        let mut request = HttpRequest::get("https://api.test");
        auth.authorize(&mut request);
        request.header_value("Authorization").unwrap().to_string()
    }

    #[test]
    fn test_needs_refresh_boundary() {
        let expires_at = 10_000;
        assert!(!needs_refresh(expires_at, expires_at - REFRESH_MARGIN_SECS - 1));
        assert!(needs_refresh(expires_at, expires_at - REFRESH_MARGIN_SECS));
        assert!(needs_refresh(expires_at, expires_at + 1));
    }

    #[test]
    fn test_code_challenge_reference_vector() {
        // RFC 7636 appendix B
        assert_eq!(
            code_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGKSJOU7cM"
        );
    }

    #[test]
    fn test_generated_verifier_is_long_and_alphanumeric() {
        for _ in 0..50 {
            let verifier = generate_verifier();
            assert!(verifier.len() >= MIN_VERIFIER_LEN);
            assert!(verifier.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn test_parse_redirect() {
        let code = parse_redirect("https://localhost/?state=abc&code=xyz", "abc").unwrap();
        assert_eq!(code, "xyz");

        assert!(parse_redirect("https://localhost/?state=other&code=xyz", "abc").is_err());
        assert!(parse_redirect("https://localhost/?state=abc", "abc").is_err());
        assert!(parse_redirect("https://localhost/?error=access_denied&state=abc", "abc").is_err());
        assert!(parse_redirect("not a url", "abc").is_err());
    }

    #[test]
    fn test_legacy_token_file_parses() {
        let token: BearerToken = serde_json::from_str(
            r#"{"token_type":"bearer","expires_in":7200,"access_token":"a","scope":["tweet.read","offline.access"],"refresh_token":"r","expires_at":1697051234.56}"#,
        )
        .unwrap();
        assert_eq!(token.expires_at, 1697051234);
        assert_eq!(token.scope.len(), 2);
    }

    #[test]
    fn test_missing_client_secret_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(&temp_dir);
        config.client_secret = None;

        let result = BearerCredential::new(
            &config,
            Arc::new(MockTransport::new()),
            Arc::new(ScriptedPrompt::new()),
        );
        assert!(matches!(
            result,
            Err(crate::MachiError::Credential(CredentialError::MissingSecret(_)))
        ));
    }

    #[tokio::test]
    async fn test_valid_token_reused_unchanged() {
        let temp_dir = TempDir::new().unwrap();
        let transport = MockTransport::new();
        let credential = BearerCredential::new(
            &test_config(&temp_dir),
            Arc::new(transport.clone()),
            Arc::new(ScriptedPrompt::new()),
        )
        .unwrap();

        let stored = stored_token(chrono::Utc::now().timestamp() + 3600);
        credential.store().save(&stored).unwrap();

        for _ in 0..3 {
            let auth = credential.acquire().await.unwrap();
            assert_eq!(bearer_of(&auth), "Bearer cached-access");
        }

        assert!(transport.requests().is_empty());
        assert_eq!(credential.store().load::<BearerToken>().unwrap().unwrap(), stored);
    }

    #[tokio::test]
    async fn test_near_expiry_token_is_refreshed_and_saved() {
        let temp_dir = TempDir::new().unwrap();
        let transport = MockTransport::new();
        transport.push_json(
            200,
            json!({
                "token_type": "bearer",
                "expires_in": 7200,
                "access_token": "fresh-access",
                "scope": "tweet.read tweet.write",
                "refresh_token": "fresh-refresh"
            }),
        );
        let credential = BearerCredential::new(
            &test_config(&temp_dir),
            Arc::new(transport.clone()),
            Arc::new(ScriptedPrompt::new()),
        )
        .unwrap();

        // Inside the refresh margin
        credential
            .store()
            .save(&stored_token(chrono::Utc::now().timestamp() + 100))
            .unwrap();

        let auth = credential.acquire().await.unwrap();
        assert_eq!(bearer_of(&auth), "Bearer fresh-access");

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].field("grant_type"), Some("refresh_token"));
        assert_eq!(requests[0].field("refresh_token"), Some("cached-refresh"));
        assert!(requests[0]
            .header_value("Authorization")
            .unwrap()
            .starts_with("Basic "));

        let saved: BearerToken = credential.store().load().unwrap().unwrap();
        assert_eq!(saved.access_token, "fresh-access");
        assert_eq!(saved.refresh_token.as_deref(), Some("fresh-refresh"));
        assert!(saved.expires_at > chrono::Utc::now().timestamp() + 7000);

        // The refreshed token is now reused
        let auth = credential.acquire().await.unwrap();
        assert_eq!(bearer_of(&auth), "Bearer fresh-access");
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_without_new_refresh_token_keeps_old_one() {
        let temp_dir = TempDir::new().unwrap();
        let transport = MockTransport::new();
        transport.push_json(200, json!({"access_token": "fresh", "expires_in": 7200}));
        let credential = BearerCredential::new(
            &test_config(&temp_dir),
            Arc::new(transport),
            Arc::new(ScriptedPrompt::new()),
        )
        .unwrap();
        credential
            .store()
            .save(&stored_token(chrono::Utc::now().timestamp() - 10))
            .unwrap();

        credential.acquire().await.unwrap();

        let saved: BearerToken = credential.store().load().unwrap().unwrap();
        assert_eq!(saved.refresh_token.as_deref(), Some("cached-refresh"));
        assert_eq!(saved.scope, vec!["tweet.write".to_string()]);
    }

    #[tokio::test]
    async fn test_authorization_code_flow_with_pkce() {
        let temp_dir = TempDir::new().unwrap();
        let transport = MockTransport::new();
        transport.push_json(
            200,
            json!({
                "token_type": "bearer",
                "expires_in": 7200,
                "access_token": "new-access",
                "scope": "tweet.read tweet.write users.read offline.access",
                "refresh_token": "new-refresh"
            }),
        );

        // Echo the state back the way the authorization server would
        let prompt = Arc::new(ScriptedPrompt::new().answer_with(|url| {
            let url = url::Url::parse(url).unwrap();
            let state = url
                .query_pairs()
                .find(|(k, _)| k == "state")
                .map(|(_, v)| v.into_owned())
                .unwrap();
            format!("https://localhost/?state={}&code=the-code", state)
        }));

        let credential = BearerCredential::new(
            &test_config(&temp_dir),
            Arc::new(transport.clone()),
            prompt.clone(),
        )
        .unwrap();

        let auth = credential.acquire().await.unwrap();
        assert_eq!(bearer_of(&auth), "Bearer new-access");
        assert_eq!(prompt.times_asked(), 1);

        let shown = url::Url::parse(&prompt.shown()[0]).unwrap();
        let pairs: std::collections::HashMap<_, _> = shown.query_pairs().into_owned().collect();
        assert_eq!(pairs["code_challenge_method"], "S256");
        assert_eq!(pairs["client_id"], "client-id");
        assert_eq!(pairs["scope"], "tweet.read tweet.write users.read offline.access");

        let exchange = &transport.requests()[0];
        assert_eq!(exchange.field("grant_type"), Some("authorization_code"));
        assert_eq!(exchange.field("code"), Some("the-code"));
        let verifier = exchange.field("code_verifier").unwrap();
        assert_eq!(code_challenge(verifier), pairs["code_challenge"]);

        let saved: BearerToken = credential.store().load().unwrap().unwrap();
        assert_eq!(saved.refresh_token.as_deref(), Some("new-refresh"));

        // No second prompt once the token is stored
        credential.acquire().await.unwrap();
        assert_eq!(prompt.times_asked(), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_surfaces_exchange_error() {
        let temp_dir = TempDir::new().unwrap();
        let transport = MockTransport::new();
        transport.push(400, r#"{"error":"invalid_request"}"#);
        let credential = BearerCredential::new(
            &test_config(&temp_dir),
            Arc::new(transport),
            Arc::new(ScriptedPrompt::new()),
        )
        .unwrap();
        let expired = stored_token(chrono::Utc::now().timestamp() - 1000);
        credential.store().save(&expired).unwrap();

        let result = credential.acquire().await;
        assert!(matches!(
            result,
            Err(crate::MachiError::Credential(CredentialError::Exchange { status: 400, .. }))
        ));
        // Stored record untouched
        assert_eq!(credential.store().load::<BearerToken>().unwrap().unwrap(), expired);
    }

    #[tokio::test]
    async fn test_transport_failure_propagates() {
        let temp_dir = TempDir::new().unwrap();
        let transport = MockTransport::new();
        transport.push_failure("connection refused");
        let credential = BearerCredential::new(
            &test_config(&temp_dir),
            Arc::new(transport),
            Arc::new(ScriptedPrompt::new()),
        )
        .unwrap();
        credential
            .store()
            .save(&stored_token(chrono::Utc::now().timestamp()))
            .unwrap();

        let result = credential.acquire().await;
        assert!(matches!(result, Err(crate::MachiError::Transport(_))));
    }
}

//! OAuth 1.0a token pair credential
//!
//! The token pair never expires. It is obtained once through the PIN-based
//! three-legged flow (request token, user authorization, access token) and
//! then read from the token store on every run.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use rand::distributions::Alphanumeric;
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use std::collections::HashMap;
use std::sync::Arc;

use super::{require_secret, Authorization, Credential, Prompt, TokenStore};
use crate::config::{AuthScheme, OAuth1Config};
use crate::error::{CredentialError, Result};
use crate::transport::{HttpRequest, HttpResponse, RequestBody, Transport};

type HmacSha1 = Hmac<Sha1>;

/// Persisted token pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub token: String,
    pub token_secret: String,
}

/// Keys used to sign a request
pub struct SigningKeys {
    consumer_key: SecretString,
    consumer_secret: SecretString,
    token: Option<SecretString>,
    token_secret: Option<SecretString>,
}

impl SigningKeys {
    pub fn new(consumer_key: &str, consumer_secret: &str, pair: Option<&TokenPair>) -> Self {
        Self {
            consumer_key: SecretString::from(consumer_key.to_string()),
            consumer_secret: SecretString::from(consumer_secret.to_string()),
            token: pair.map(|p| SecretString::from(p.token.clone())),
            token_secret: pair.map(|p| SecretString::from(p.token_secret.clone())),
        }
    }

    /// Build the `Authorization` header value for a request
    ///
    /// `extra` carries protocol parameters such as `oauth_callback` or
    /// `oauth_verifier`; they are signed and sent in the header.
    pub fn authorization_header(&self, request: &HttpRequest, extra: &[(&str, &str)]) -> String {
        let nonce: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();
        let timestamp = chrono::Utc::now().timestamp().to_string();
        self.authorization_header_with(request, extra, &nonce, &timestamp)
    }

    pub(crate) fn authorization_header_with(
        &self,
        request: &HttpRequest,
        extra: &[(&str, &str)],
        nonce: &str,
        timestamp: &str,
    ) -> String {
        let mut oauth_params: Vec<(String, String)> = vec![
            (
                "oauth_consumer_key".to_string(),
                self.consumer_key.expose_secret().to_string(),
            ),
            ("oauth_nonce".to_string(), nonce.to_string()),
            ("oauth_signature_method".to_string(), "HMAC-SHA1".to_string()),
            ("oauth_timestamp".to_string(), timestamp.to_string()),
            ("oauth_version".to_string(), "1.0".to_string()),
        ];
        if let Some(token) = &self.token {
            oauth_params.push(("oauth_token".to_string(), token.expose_secret().to_string()));
        }
        for (key, value) in extra {
            oauth_params.push((key.to_string(), value.to_string()));
        }

        let mut signed_params = oauth_params.clone();
        signed_params.extend(request.query.iter().cloned());
        if let RequestBody::Form(fields) = &request.body {
            signed_params.extend(fields.iter().cloned());
        }

        let base = signature_base_string(request.method.as_str(), &request.url, &signed_params);
        let token_secret = self
            .token_secret
            .as_ref()
            .map(|s| s.expose_secret().to_string())
            .unwrap_or_default();
        let signature = sign(&base, self.consumer_secret.expose_secret(), &token_secret);

        oauth_params.push(("oauth_signature".to_string(), signature));
        oauth_params.sort();

        let fields: Vec<String> = oauth_params
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", percent_encode(k), percent_encode(v)))
            .collect();
        format!("OAuth {}", fields.join(", "))
    }
}

/// Percent-encode per RFC 3986 (unreserved characters left as-is)
pub fn percent_encode(input: &str) -> String {
    let mut encoded = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

/// Signature base string: method, URL and the sorted, encoded parameter string
pub fn signature_base_string(method: &str, url: &str, params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (percent_encode(k), percent_encode(v)))
        .collect();
    encoded.sort();

    let parameter_string = encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    format!(
        "{}&{}&{}",
        method.to_uppercase(),
        percent_encode(url),
        percent_encode(&parameter_string)
    )
}

/// HMAC-SHA1 signature of a base string, base64 encoded
pub fn sign(base_string: &str, consumer_secret: &str, token_secret: &str) -> String {
    let key = format!("{}&{}", percent_encode(consumer_secret), percent_encode(token_secret));
    // HMAC accepts keys of any length
    let mut mac = HmacSha1::new_from_slice(key.as_bytes()).expect("HMAC can take key of any size");
    mac.update(base_string.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

/// Token pair credential with PIN-based authorization
pub struct TokenPairCredential {
    consumer_key: SecretString,
    consumer_secret: SecretString,
    config: OAuth1Config,
    store: TokenStore,
    transport: Arc<dyn Transport>,
    prompt: Arc<dyn Prompt>,
}

impl TokenPairCredential {
    /// Create the credential
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::MissingSecret` if the consumer key or secret
    /// is not configured.
    pub fn new(
        config: &OAuth1Config,
        transport: Arc<dyn Transport>,
        prompt: Arc<dyn Prompt>,
    ) -> Result<Self> {
        let consumer_key = require_secret(config.consumer_key.as_ref(), "oauth1.consumer_key")?;
        let consumer_secret =
            require_secret(config.consumer_secret.as_ref(), "oauth1.consumer_secret")?;

        Ok(Self {
            consumer_key,
            consumer_secret,
            store: TokenStore::new(&config.token_file),
            config: config.clone(),
            transport,
            prompt,
        })
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    fn keys(&self, pair: Option<&TokenPair>) -> SigningKeys {
        SigningKeys::new(
            self.consumer_key.expose_secret(),
            self.consumer_secret.expose_secret(),
            pair,
        )
    }

    /// Run the three-legged PIN flow and persist the resulting pair
    async fn authorize_interactively(&self) -> Result<TokenPair> {
        tracing::info!("Token pair not found. Starting authorization.");

        let mut request = HttpRequest::post(&self.config.request_token_url);
        let header = self
            .keys(None)
            .authorization_header(&request, &[("oauth_callback", "oob")]);
        request.headers.push(("Authorization".to_string(), header));

        let response = self.transport.send(request).await?;
        let temporary = parse_token_response(&self.config.request_token_url, &response)?;

        let authorize_url = url::Url::parse_with_params(
            &self.config.authorize_url,
            &[("oauth_token", temporary.token.as_str())],
        )
        .map_err(|e| CredentialError::AuthorizationResponse(format!("invalid authorize URL: {}", e)))?;

        let verifier = self.prompt.ask(
            "Visit the following URL to authorize the app, then enter the PIN:",
            authorize_url.as_str(),
        )?;
        let verifier = verifier.trim();

        let mut request = HttpRequest::post(&self.config.access_token_url);
        let header = self
            .keys(Some(&temporary))
            .authorization_header(&request, &[("oauth_verifier", verifier)]);
        request.headers.push(("Authorization".to_string(), header));

        let response = self.transport.send(request).await?;
        let pair = parse_token_response(&self.config.access_token_url, &response)?;

        self.store.save(&pair)?;
        tracing::info!("Token pair acquired and saved to {}", self.store.path().display());
        Ok(pair)
    }
}

#[async_trait]
impl Credential for TokenPairCredential {
    fn scheme(&self) -> AuthScheme {
        AuthScheme::OAuth1
    }

    async fn acquire(&self) -> Result<Authorization> {
        let pair = match self.store.load::<TokenPair>()? {
            Some(pair) => {
                tracing::debug!("Using stored token pair");
                pair
            }
            None => self.authorize_interactively().await?,
        };
        Ok(Authorization::TokenPair(self.keys(Some(&pair))))
    }
}

/// Parse an `oauth_token=...&oauth_token_secret=...` response body
fn parse_token_response(endpoint: &str, response: &HttpResponse) -> Result<TokenPair> {
    if !response.is_success() {
        tracing::error!(
            "Token request to {} failed: {} {}",
            endpoint,
            response.status,
            response.body
        );
        return Err(CredentialError::Exchange {
            endpoint: endpoint.to_string(),
            status: response.status,
            body: response.body.clone(),
        }
        .into());
    }

    let fields: HashMap<String, String> = url::form_urlencoded::parse(response.body.as_bytes())
        .into_owned()
        .collect();

    match (fields.get("oauth_token"), fields.get("oauth_token_secret")) {
        (Some(token), Some(token_secret)) => Ok(TokenPair {
            token: token.clone(),
            token_secret: token_secret.clone(),
        }),
        _ => Err(CredentialError::Exchange {
            endpoint: endpoint.to_string(),
            status: response.status,
            body: format!("missing oauth_token in response: {}", response.body),
        }
        .into()),
    }
}

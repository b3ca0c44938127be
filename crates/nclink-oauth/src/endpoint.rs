//! Token endpoint client.
//!
//! [`TokenEndpoint`] is the seam between the lifecycle logic and the
//! authorization server: one call exchanges an authorization code, the other
//! a refresh token. [`NextcloudTokenEndpoint`] speaks the Nextcloud OAuth2
//! app's protocol over `reqwest`; tests substitute their own implementation.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use nclink_core::Token;
use serde::{Deserialize, Deserializer};
use tracing::{debug, info, warn};

use crate::config::OAuthConfig;
use crate::error::ExchangeError;

/// A boxed future, used to keep the async traits object-safe.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Token type assumed when the server omits `token_type`.
const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// Upper bound on an accepted `expires_in`, ten years.
const MAX_TOKEN_LIFETIME_SECS: i64 = 10 * 365 * 24 * 60 * 60;

/// A successful response from the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenResponse {
    /// The new access token.
    pub access_token: String,

    /// The new refresh token. Some servers omit it on refresh.
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// The token type, usually `Bearer`.
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Access token lifetime in seconds.
    #[serde(deserialize_with = "deserialize_seconds")]
    pub expires_in: i64,

    /// Identifier of the account the token was issued for.
    #[serde(default)]
    pub user_id: Option<String>,
}

impl TokenResponse {
    /// Builds a [`Token`] issued at `issued_at`.
    ///
    /// When the response carries no refresh token, `previous_refresh` is
    /// kept so a refresh never loses the ability to refresh again. The
    /// lifetime is clamped to `0..=MAX_TOKEN_LIFETIME_SECS`.
    pub fn into_token(self, issued_at: DateTime<Utc>, previous_refresh: Option<&str>) -> Token {
        let refresh_token = self
            .refresh_token
            .filter(|t| !t.is_empty())
            .or_else(|| previous_refresh.map(str::to_string))
            .unwrap_or_default();
        Token::issued(
            self.access_token,
            refresh_token,
            self.token_type,
            self.expires_in.clamp(0, MAX_TOKEN_LIFETIME_SECS),
            issued_at,
        )
    }
}

fn default_token_type() -> String {
    DEFAULT_TOKEN_TYPE.to_string()
}

/// Accepts `expires_in` as a JSON number or a numeric string.
fn deserialize_seconds<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Int(i64),
        Float(f64),
        Text(String),
    }

    match Seconds::deserialize(deserializer)? {
        Seconds::Int(secs) => Ok(secs),
        Seconds::Float(secs) => Ok(secs.floor() as i64),
        Seconds::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid expires_in: {:?}", text))),
    }
}

/// The authorization server's token endpoint.
pub trait TokenEndpoint: Send + Sync {
    /// Exchanges an authorization code for a token.
    fn exchange_code<'a>(&'a self, code: &'a str)
    -> BoxFuture<'a, Result<TokenResponse, ExchangeError>>;

    /// Exchanges a refresh token for a new token.
    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> BoxFuture<'a, Result<TokenResponse, ExchangeError>>;
}

/// Token endpoint of a Nextcloud instance's OAuth2 app.
#[derive(Debug, Clone)]
pub struct NextcloudTokenEndpoint {
    client_id: String,
    client_secret: String,
    token_url: url::Url,
    redirect_uri: url::Url,
    http_client: reqwest::Client,
}

impl NextcloudTokenEndpoint {
    /// Creates an endpoint client from the OAuth configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &OAuthConfig) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            token_url: config.token_url.clone(),
            redirect_uri: config.redirect_uri.clone(),
            http_client,
        })
    }

    async fn post(&self, params: &[(&str, &str)]) -> Result<TokenResponse, ExchangeError> {
        let response = self
            .http_client
            .post(self.token_url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .form(params)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExchangeError::Network("token request timed out".to_string())
                } else {
                    ExchangeError::Network(format!("token request failed: {}", e))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ExchangeError::Network(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "token endpoint rejected request");
            return Err(ExchangeError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| ExchangeError::InvalidResponse(e.to_string()))?;

        if token.access_token.is_empty() {
            return Err(ExchangeError::InvalidResponse(
                "empty access_token".to_string(),
            ));
        }

        Ok(token)
    }
}

impl TokenEndpoint for NextcloudTokenEndpoint {
    fn exchange_code<'a>(
        &'a self,
        code: &'a str,
    ) -> BoxFuture<'a, Result<TokenResponse, ExchangeError>> {
        Box::pin(async move {
            debug!(url = %self.token_url, "exchanging authorization code");
            let params = [
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.redirect_uri.as_str()),
            ];
            let token = self.post(&params).await?;
            info!(user_id = ?token.user_id, "authorization code exchanged");
            Ok(token)
        })
    }

    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> BoxFuture<'a, Result<TokenResponse, ExchangeError>> {
        Box::pin(async move {
            debug!(url = %self.token_url, "refreshing access token");
            let params = [
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ];
            self.post(&params).await
        })
    }
}

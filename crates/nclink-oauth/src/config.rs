//! Authorization server and grant cookie configuration.

use std::time::Duration;

use nclink_core::{DEFAULT_GRANT_TTL_SECS, DEFAULT_SKEW_SECS};
use url::Url;

/// Path of the Nextcloud OAuth2 authorization endpoint below the base URL.
const NEXTCLOUD_AUTHORIZE_PATH: &str = "index.php/apps/oauth2/authorize";
/// Path of the Nextcloud OAuth2 token endpoint below the base URL.
const NEXTCLOUD_TOKEN_PATH: &str = "index.php/apps/oauth2/api/v1/token";

/// OAuth2 client registration and endpoint configuration.
///
/// Required values are constructor parameters; everything else has a default
/// that can be overridden with the `with_*` builders.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    /// The OAuth2 client identifier registered on the authorization server.
    pub client_id: String,

    /// The OAuth2 client secret.
    pub client_secret: String,

    /// Authorization endpoint the browser is redirected to.
    pub authorize_url: Url,

    /// Token endpoint used for code and refresh exchanges.
    pub token_url: Url,

    /// Redirect URI registered for this client; the callback route.
    pub redirect_uri: Url,

    /// Scopes requested in the authorization URL.
    pub scopes: Vec<String>,

    /// Timeout for requests to the token endpoint.
    pub timeout: Duration,

    /// Tokens with less remaining lifetime than this are refreshed before use.
    pub refresh_skew: Duration,

    /// Lifetime of a pending authorization and of its grant cookie.
    pub grant_ttl: Duration,

    /// User agent string for token endpoint requests.
    pub user_agent: String,
}

impl OAuthConfig {
    /// Default timeout in seconds.
    pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

    /// Creates a configuration with explicit endpoints.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        authorize_url: Url,
        token_url: Url,
        redirect_uri: Url,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            authorize_url,
            token_url,
            redirect_uri,
            scopes: Vec::new(),
            timeout: Duration::from_secs(Self::DEFAULT_TIMEOUT_SECS),
            refresh_skew: Duration::from_secs(DEFAULT_SKEW_SECS as u64),
            grant_ttl: Duration::from_secs(DEFAULT_GRANT_TTL_SECS),
            user_agent: format!("nclink/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Creates a configuration for a Nextcloud instance at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint URLs cannot be derived from `base_url`.
    pub fn nextcloud(
        base_url: &Url,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: Url,
    ) -> Result<Self, url::ParseError> {
        let base = with_trailing_slash(base_url);
        let authorize_url = base.join(NEXTCLOUD_AUTHORIZE_PATH)?;
        let token_url = base.join(NEXTCLOUD_TOKEN_PATH)?;
        Ok(Self::new(
            client_id,
            client_secret,
            authorize_url,
            token_url,
            redirect_uri,
        ))
    }

    /// Sets the requested scopes.
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Sets the token endpoint timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the refresh skew.
    pub fn with_refresh_skew(mut self, skew: Duration) -> Self {
        self.refresh_skew = skew;
        self
    }

    /// Sets the pending authorization lifetime.
    pub fn with_grant_ttl(mut self, ttl: Duration) -> Self {
        self.grant_ttl = ttl;
        self
    }

    /// Overrides the authorization endpoint.
    pub fn with_authorize_url(mut self, url: Url) -> Self {
        self.authorize_url = url;
        self
    }

    /// Overrides the token endpoint.
    pub fn with_token_url(mut self, url: Url) -> Self {
        self.token_url = url;
        self
    }

    /// Refresh skew as a signed chrono duration, for expiry arithmetic.
    pub fn skew(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.refresh_skew)
            .unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_SKEW_SECS))
    }

    /// Builds the authorization URL carrying `state`.
    pub fn authorization_url(&self, state: &str) -> String {
        let scope = self.scopes.join(" ");
        let separator = if self.authorize_url.query().is_some() {
            '&'
        } else {
            '?'
        };

        format!(
            "{}{}response_type=code&client_id={}&redirect_uri={}&scope={}&state={}",
            self.authorize_url,
            separator,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(self.redirect_uri.as_str()),
            urlencoding::encode(&scope),
            urlencoding::encode(state),
        )
    }

    /// Validates that the configuration is usable.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.client_id.trim().is_empty() {
            return Err("client_id is required");
        }
        if self.client_secret.trim().is_empty() {
            return Err("client_secret is required");
        }
        if self.grant_ttl.is_zero() {
            return Err("grant TTL must be positive");
        }
        Ok(())
    }
}

/// Attributes of the grant cookie that ties a browser to its pending flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieSettings {
    /// Cookie name.
    pub name: String,

    /// Path scope. `None` scopes the cookie to the redirect URI's path.
    pub path: Option<String>,

    /// Domain attribute. `None` keeps the cookie host-only.
    pub domain: Option<String>,

    /// Whether to set the `Secure` attribute.
    pub secure: bool,
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            name: Self::DEFAULT_NAME.to_string(),
            path: None,
            domain: None,
            secure: true,
        }
    }
}

impl CookieSettings {
    /// Default grant cookie name.
    pub const DEFAULT_NAME: &'static str = "grant";

    /// Sets the cookie name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the path scope.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Sets the domain attribute.
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Sets the `Secure` attribute.
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }
}

fn with_trailing_slash(url: &Url) -> Url {
    let mut url = url.clone();
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

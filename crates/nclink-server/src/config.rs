//! Server configuration.
//!
//! All settings live in a single `config.toml`, by default at
//! `~/.config/nclink/config.toml`:
//!
//! ```toml
//! listen = "127.0.0.1:8080"
//!
//! [nextcloud]
//! base_url = "https://cloud.example.com"
//! client_id = "env::NCLINK_CLIENT_ID"
//! client_secret = "pass::nextcloud/oauth-secret"
//! redirect_uri = "https://app.example.com/auth/nextcloud/grant"
//!
//! [routes]
//! redirect = "/auth/nextcloud/grant"
//!
//! [logging]
//! level = "debug"
//! ```
//!
//! Credential values (`client_id`, `client_secret`) support secret
//! references, see [`crate::secret`].

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use nclink_core::{
    DEFAULT_GRANT_TTL_SECS, DEFAULT_SKEW_SECS, TracingConfig, TracingOutputFormat, parse_level,
};
use nclink_oauth::{CookieSettings, OAuthConfig};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ServerError, ServerResult};
use crate::secret;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "NCLINK_CONFIG";

/// Configuration for the nclink server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP server listens on.
    pub listen: SocketAddr,

    /// Nextcloud OAuth2 client settings.
    pub nextcloud: Option<NextcloudSettings>,

    /// Grant cookie attributes.
    pub cookie: CookieConfig,

    /// Route paths.
    pub routes: RouteSettings,

    /// Credential store settings.
    pub store: StoreSettings,

    /// Logging settings.
    pub logging: LoggingSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            nextcloud: None,
            cookie: CookieConfig::default(),
            routes: RouteSettings::default(),
            store: StoreSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// Nextcloud OAuth2 client settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NextcloudSettings {
    /// Base URL of the Nextcloud instance.
    pub base_url: String,

    /// OAuth client ID (supports `pass::` and `env::` prefixes).
    pub client_id: String,

    /// OAuth client secret (supports `pass::` and `env::` prefixes).
    pub client_secret: String,

    /// Redirect URI registered with Nextcloud; its path must be the redirect route.
    pub redirect_uri: String,

    /// Scopes requested during authorization.
    #[serde(default)]
    pub scopes: Vec<String>,

    /// Overrides the derived authorization endpoint.
    #[serde(default)]
    pub authorize_url: Option<String>,

    /// Overrides the derived token endpoint.
    #[serde(default)]
    pub token_url: Option<String>,

    /// Token endpoint timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Lifetime of a pending authorization in seconds.
    #[serde(default = "default_grant_ttl_secs")]
    pub grant_ttl_secs: u64,

    /// Refresh skew in seconds.
    #[serde(default = "default_refresh_skew_secs")]
    pub refresh_skew_secs: u64,
}

fn default_timeout_secs() -> u64 {
    OAuthConfig::DEFAULT_TIMEOUT_SECS
}

fn default_grant_ttl_secs() -> u64 {
    DEFAULT_GRANT_TTL_SECS
}

fn default_refresh_skew_secs() -> u64 {
    DEFAULT_SKEW_SECS as u64
}

/// Grant cookie attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieConfig {
    /// Cookie name.
    pub name: String,

    /// Path scope; defaults to the redirect route.
    pub path: Option<String>,

    /// Domain attribute; host-only when unset.
    pub domain: Option<String>,

    /// Whether to mark the cookie `Secure`.
    pub secure: bool,
}

impl Default for CookieConfig {
    fn default() -> Self {
        let defaults = CookieSettings::default();
        Self {
            name: defaults.name,
            path: defaults.path,
            domain: defaults.domain,
            secure: defaults.secure,
        }
    }
}

impl CookieConfig {
    /// Converts to library cookie settings.
    pub fn to_settings(&self) -> CookieSettings {
        let mut settings = CookieSettings::default()
            .with_name(&self.name)
            .with_secure(self.secure);
        if let Some(ref path) = self.path {
            settings = settings.with_path(path);
        }
        if let Some(ref domain) = self.domain {
            settings = settings.with_domain(domain);
        }
        settings
    }
}

/// Paths of the three flow routes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteSettings {
    /// Starts a link flow.
    pub link: String,

    /// Starts an unlink flow.
    pub unlink: String,

    /// Receives the authorization server's callback.
    pub redirect: String,
}

impl Default for RouteSettings {
    fn default() -> Self {
        Self {
            link: "/auth/nextcloud".to_string(),
            unlink: "/auth/nextcloud/unlink".to_string(),
            redirect: "/auth/nextcloud/grant".to_string(),
        }
    }
}

/// Credential store backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// One JSON file per user.
    #[default]
    File,
    /// In memory; lost on restart.
    Memory,
}

/// Credential store settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Which backend to use.
    pub backend: StoreBackend,

    /// Directory of the file backend.
    pub path: Option<PathBuf>,
}

impl StoreSettings {
    /// Directory used by the file backend.
    pub fn dir(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| ServerConfig::default_data_dir().join("users"))
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Minimum level: trace, debug, info, warn or error.
    pub level: String,

    /// Output format: pretty, compact or json.
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

impl LoggingSettings {
    /// Converts to a tracing configuration.
    pub fn to_tracing_config(&self) -> ServerResult<TracingConfig> {
        let level = parse_level(&self.level)?;
        let format = TracingOutputFormat::from_str(&self.format)?;
        Ok(TracingConfig::default()
            .with_level(level)
            .with_format(format))
    }
}

impl ServerConfig {
    /// Loads configuration from `path`, or from the default location.
    ///
    /// A missing file at the default location yields the defaults; a missing
    /// file at an explicit path is an error.
    pub fn load(path: Option<&Path>) -> ServerResult<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::load_from(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> ServerResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ServerError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from TOML text.
    pub fn from_toml(content: &str) -> ServerResult<Self> {
        toml::from_str(content)
            .map_err(|e| ServerError::config(format!("failed to parse config: {}", e)))
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Returns the default configuration directory.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nclink")
    }

    /// Returns the default data directory.
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nclink")
    }

    /// Checks the configuration without resolving secrets.
    pub fn validate(&self) -> ServerResult<()> {
        let nextcloud = self.nextcloud_settings()?;

        if nextcloud.client_id.trim().is_empty() {
            return Err(ServerError::config("nextcloud.client_id is required"));
        }
        if nextcloud.client_secret.trim().is_empty() {
            return Err(ServerError::config("nextcloud.client_secret is required"));
        }
        if nextcloud.grant_ttl_secs == 0 {
            return Err(ServerError::config("nextcloud.grant_ttl_secs must be positive"));
        }

        parse_url("nextcloud.base_url", &nextcloud.base_url)?;
        let redirect_uri = parse_url("nextcloud.redirect_uri", &nextcloud.redirect_uri)?;
        if let Some(ref url) = nextcloud.authorize_url {
            parse_url("nextcloud.authorize_url", url)?;
        }
        if let Some(ref url) = nextcloud.token_url {
            parse_url("nextcloud.token_url", url)?;
        }

        let routes = [
            ("routes.link", &self.routes.link),
            ("routes.unlink", &self.routes.unlink),
            ("routes.redirect", &self.routes.redirect),
        ];
        let mut seen = HashSet::new();
        for (name, path) in routes {
            if !path.starts_with('/') {
                return Err(ServerError::config(format!(
                    "{} must be an absolute path, got {:?}",
                    name, path
                )));
            }
            if !seen.insert(path.as_str()) {
                return Err(ServerError::config(format!(
                    "{} duplicates another route: {}",
                    name, path
                )));
            }
        }

        if redirect_uri.path() != self.routes.redirect {
            return Err(ServerError::config(format!(
                "nextcloud.redirect_uri path {} does not match routes.redirect {}",
                redirect_uri.path(),
                self.routes.redirect
            )));
        }

        if self.cookie.name.trim().is_empty() {
            return Err(ServerError::config("cookie.name must not be empty"));
        }

        self.logging.to_tracing_config()?;
        Ok(())
    }

    /// Builds the OAuth configuration, resolving secret references.
    pub fn oauth_config(&self) -> ServerResult<OAuthConfig> {
        self.validate()?;
        let nextcloud = self.nextcloud_settings()?;

        let client_id = secret::resolve(&nextcloud.client_id)?;
        let client_secret = secret::resolve(&nextcloud.client_secret)?;
        let base_url = parse_url("nextcloud.base_url", &nextcloud.base_url)?;
        let redirect_uri = parse_url("nextcloud.redirect_uri", &nextcloud.redirect_uri)?;

        let mut config = OAuthConfig::nextcloud(&base_url, client_id, client_secret, redirect_uri)
            .map_err(|e| ServerError::config(format!("invalid nextcloud.base_url: {}", e)))?
            .with_scopes(nextcloud.scopes.clone())
            .with_timeout(Duration::from_secs(nextcloud.timeout_secs))
            .with_grant_ttl(Duration::from_secs(nextcloud.grant_ttl_secs))
            .with_refresh_skew(Duration::from_secs(nextcloud.refresh_skew_secs));

        if let Some(ref url) = nextcloud.authorize_url {
            config = config.with_authorize_url(parse_url("nextcloud.authorize_url", url)?);
        }
        if let Some(ref url) = nextcloud.token_url {
            config = config.with_token_url(parse_url("nextcloud.token_url", url)?);
        }

        config
            .validate()
            .map_err(|e| ServerError::config(format!("resolved credentials: {}", e)))?;
        Ok(config)
    }

    fn nextcloud_settings(&self) -> ServerResult<&NextcloudSettings> {
        self.nextcloud.as_ref().ok_or_else(|| {
            ServerError::config(format!(
                "Nextcloud client not configured. Add to {}:\n  \
                 [nextcloud]\n  \
                 base_url = \"https://cloud.example.com\"\n  \
                 client_id = \"YOUR_CLIENT_ID\"\n  \
                 client_secret = \"YOUR_CLIENT_SECRET\"\n  \
                 redirect_uri = \"https://your.app/auth/nextcloud/grant\"",
                Self::default_path().display()
            ))
        })
    }
}

fn parse_url(name: &str, value: &str) -> ServerResult<Url> {
    Url::parse(value).map_err(|e| ServerError::config(format!("invalid {}: {}", name, e)))
}

//! Error types for the authorization lifecycle.
//!
//! [`AuthError`] is what flow and token operations return. Lower layers have
//! their own errors: [`ExchangeError`] for the token endpoint and
//! [`StoreError`] for credential persistence. They are folded into
//! [`AuthError`] by the component that knows which flow step failed.

use std::fmt;

use nclink_core::UserId;
use thiserror::Error;

/// High-level classification of an [`AuthError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthErrorCode {
    /// No grant cookie, unknown grant, or CSRF state mismatch.
    InvalidGrant,
    /// The authorization server rejected the code exchange.
    Unauthorized,
    /// The refresh-token exchange failed.
    RefreshFailed,
    /// The credential store failed.
    PersistenceFailed,
    /// Unlink requested for an account that is not linked.
    NotLinked,
}

impl AuthErrorCode {
    /// Returns a machine-readable name for this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidGrant => "invalid_grant",
            Self::Unauthorized => "unauthorized",
            Self::RefreshFailed => "refresh_failed",
            Self::PersistenceFailed => "persistence_failed",
            Self::NotLinked => "not_linked",
        }
    }

    /// HTTP status code used when the error reaches the HTTP boundary.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidGrant | Self::NotLinked => 400,
            Self::Unauthorized => 401,
            Self::RefreshFailed | Self::PersistenceFailed => 500,
        }
    }

    /// Returns true for errors caused by the caller rather than the service.
    pub fn is_client_error(&self) -> bool {
        self.http_status() < 500
    }
}

impl fmt::Display for AuthErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by the flow controller and the token manager.
///
/// Every variant is terminal for the flow that produced it; nothing here is
/// retried automatically.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The callback could not be tied to a flow this service started.
    #[error("invalid grant: {reason}")]
    InvalidGrant { reason: String },

    /// The authorization server refused to issue a token.
    #[error("not authorized: {reason}")]
    Unauthorized { reason: String },

    /// The refresh-token exchange failed; the stored token is unchanged.
    #[error("token refresh failed for '{user_id}': {source}")]
    Refresh {
        user_id: UserId,
        #[source]
        source: ExchangeError,
    },

    /// The credential store failed.
    #[error("credential store failure while {operation}: {source}")]
    Persistence {
        operation: &'static str,
        #[source]
        source: StoreError,
    },

    /// Unlink requested for an account with no stored credentials.
    #[error("user '{user_id}' is not linked")]
    NotLinked { user_id: UserId },
}

impl AuthError {
    /// Creates an invalid grant error.
    pub fn invalid_grant(reason: impl Into<String>) -> Self {
        Self::InvalidGrant {
            reason: reason.into(),
        }
    }

    /// Creates an unauthorized error.
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized {
            reason: reason.into(),
        }
    }

    /// Creates a persistence error for the given store operation.
    pub fn persistence(operation: &'static str, source: StoreError) -> Self {
        Self::Persistence { operation, source }
    }

    /// Returns the classification of this error.
    pub fn code(&self) -> AuthErrorCode {
        match self {
            Self::InvalidGrant { .. } => AuthErrorCode::InvalidGrant,
            Self::Unauthorized { .. } => AuthErrorCode::Unauthorized,
            Self::Refresh { .. } => AuthErrorCode::RefreshFailed,
            Self::Persistence { .. } => AuthErrorCode::PersistenceFailed,
            Self::NotLinked { .. } => AuthErrorCode::NotLinked,
        }
    }

    /// Human-readable body for an HTTP response carrying this error.
    ///
    /// Internal details (store paths, server bodies) stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::InvalidGrant { .. } => "Auth error: No valid grant found".to_string(),
            Self::Unauthorized { .. } => "Auth error: Not authorized".to_string(),
            Self::Refresh { user_id, .. } => {
                format!("Auth error: Token refresh failed for user '{}'", user_id)
            }
            Self::Persistence { .. } => "Auth error: Credential store failure".to_string(),
            Self::NotLinked { user_id } => format!("Auth error: User '{}' is not linked", user_id),
        }
    }
}

/// A specialized Result type for authorization operations.
pub type AuthResult<T> = Result<T, AuthError>;

/// Errors from the authorization server's token endpoint.
#[derive(Debug, Clone, Error)]
pub enum ExchangeError {
    /// The request never produced a response.
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with a non-success status.
    #[error("token endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The response body was not a usable token response.
    #[error("invalid token response: {0}")]
    InvalidResponse(String),

    /// There is no refresh token to exchange.
    #[error("no refresh token stored")]
    MissingRefreshToken,
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

/// Errors from a [`CredentialStore`](crate::CredentialStore) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Any other backend failure.
    #[error("{0}")]
    Backend(String),
}

/// A specialized Result type for credential store operations.
pub type StoreResult<T> = Result<T, StoreError>;

//! Server error types.

use std::io;

use nclink_core::TracingError;
use nclink_oauth::{AuthError, StoreError};
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur while configuring or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// IO error (listener, config file, etc.).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A secret reference could not be resolved.
    #[error("cannot resolve secret `{reference}`: {message}")]
    Secret { reference: String, message: String },

    /// The HTTP client for the token endpoint could not be built.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// An authorization operation failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The credential store failed outside a flow.
    #[error("credential store error: {0}")]
    Store(#[from] StoreError),

    /// Logging could not be initialized.
    #[error(transparent)]
    Tracing(#[from] TracingError),
}

impl ServerError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a secret resolution error.
    pub fn secret(reference: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Secret {
            reference: reference.into(),
            message: message.into(),
        }
    }
}

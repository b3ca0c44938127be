//! OAuth2 authorization lifecycle for Nextcloud accounts.
//!
//! This crate links remote accounts to a service through the
//! authorization-code grant and keeps their tokens valid afterwards:
//!
//! - [`StateCache`] - Time-bounded, at-most-once store of pending authorizations
//! - [`FlowController`] - Initiates flows and completes callbacks (link, unlink, custom)
//! - [`TokenManager`] - Refreshes stale tokens, persists them, signs requests
//! - [`TokenEndpoint`] - The authorization server's token endpoint ([`NextcloudTokenEndpoint`])
//! - [`CredentialStore`] - Persistence of linked users ([`MemoryCredentialStore`], [`FileCredentialStore`])
//! - [`AuthError`] - Error taxonomy for flow and token operations
//!
//! # Architecture
//!
//! ```text
//!   browser ──► FlowController ──► StateCache
//!                    │
//!                    ▼
//!               TokenManager ──► TokenEndpoint ──► Nextcloud
//!                    │
//!                    ▼
//!             CredentialStore
//! ```
//!
//! # Example
//!
//! ```ignore
//! use nclink_oauth::{CompletionHandler, FlowController, TokenManager};
//!
//! let initiation = controller.initiate(CompletionHandler::Link);
//! // redirect to initiation.redirect_url, set initiation.cookie
//!
//! let response = controller.callback(cookie.as_deref(), params).await;
//! // set response.clear_cookie, render response.result
//!
//! let request = manager.sign(&mut user, client.get(url)).await?;
//! ```

pub mod config;
mod cookies;
pub mod endpoint;
pub mod error;
pub mod flow;
pub mod manager;
mod security;
pub mod state_cache;
pub mod store;

pub use config::{CookieSettings, OAuthConfig};
pub use endpoint::{BoxFuture, NextcloudTokenEndpoint, TokenEndpoint, TokenResponse};
pub use error::{AuthError, AuthErrorCode, AuthResult, ExchangeError, StoreError, StoreResult};
pub use flow::{
    CallbackParams, CallbackResponse, CompletionHandler, CompletionStrategy, FlowController,
    FlowOutcome, Initiation, ResolvedUser,
};
pub use manager::{FreshToken, TokenManager};
pub use security::mask_token;
pub use state_cache::{Grant, PendingAuthorization, StateCache};
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore};

//! Authorization flow controller.
//!
//! A flow moves through `initiated -> redirected -> callback received` and
//! ends either linked (the completion handler ran) or failed. There is no
//! retry within a flow; a failed flow is restarted by initiating again.
//!
//! ```text
//! initiate(handler)            callback(cookie, params)
//!   StateCache::begin ───────►   StateCache::consume (at most once)
//!   Set-Cookie: grant            state check, code exchange
//!   303 -> authorization URL     load or create user
//!                                completion handler
//! ```

use std::fmt;
use std::sync::Arc;

use cookie::Cookie;
use nclink_core::{User, UserId};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::{CookieSettings, OAuthConfig};
use crate::cookies::{grant_cookie, removal_cookie};
use crate::endpoint::BoxFuture;
use crate::error::{AuthError, AuthResult};
use crate::manager::TokenManager;
use crate::security::{fingerprint, mask_token};
use crate::state_cache::StateCache;
use crate::store::CredentialStore;

/// The account resolved by a callback, with its freshly issued token.
#[derive(Debug, Clone)]
pub struct ResolvedUser {
    /// The user, loaded from the store or newly created, holding the new token.
    pub user: User,
    /// Whether the user was already stored before this callback.
    pub existing: bool,
}

/// Caller-supplied completion logic for [`CompletionHandler::Custom`].
pub trait CompletionStrategy: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Completes a flow for `resolved`. Nothing has been persisted yet.
    fn complete<'a>(
        &'a self,
        store: &'a dyn CredentialStore,
        resolved: ResolvedUser,
    ) -> BoxFuture<'a, AuthResult<FlowOutcome>>;
}

/// What to do once the callback has resolved a user.
#[derive(Clone)]
pub enum CompletionHandler {
    /// Store the user and its token.
    Link,
    /// Delete the user; fails with [`AuthError::NotLinked`] if not stored.
    Unlink,
    /// Run caller-supplied logic.
    Custom(Arc<dyn CompletionStrategy>),
}

impl CompletionHandler {
    /// Short name used in logs.
    pub fn name(&self) -> &str {
        match self {
            Self::Link => "link",
            Self::Unlink => "unlink",
            Self::Custom(strategy) => strategy.name(),
        }
    }

    async fn complete(
        &self,
        store: &dyn CredentialStore,
        resolved: ResolvedUser,
    ) -> AuthResult<FlowOutcome> {
        match self {
            Self::Link => {
                store
                    .save_user(&resolved.user)
                    .await
                    .map_err(|e| AuthError::persistence("saving user", e))?;
                Ok(FlowOutcome::Linked(resolved.user.id))
            }
            Self::Unlink => {
                if !resolved.existing {
                    return Err(AuthError::NotLinked {
                        user_id: resolved.user.id,
                    });
                }
                store
                    .delete_user(&resolved.user.id)
                    .await
                    .map_err(|e| AuthError::persistence("deleting user", e))?;
                Ok(FlowOutcome::Unlinked(resolved.user.id))
            }
            Self::Custom(strategy) => strategy.complete(store, resolved).await,
        }
    }
}

impl fmt::Debug for CompletionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Link => f.write_str("Link"),
            Self::Unlink => f.write_str("Unlink"),
            Self::Custom(strategy) => f.debug_tuple("Custom").field(&strategy.name()).finish(),
        }
    }
}

/// The result of a completed flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    /// The user was stored.
    Linked(UserId),
    /// The user was deleted.
    Unlinked(UserId),
    /// A custom handler finished.
    Custom { user_id: UserId, message: String },
}

impl FlowOutcome {
    /// The user the flow completed for.
    pub fn user_id(&self) -> &UserId {
        match self {
            Self::Linked(id) | Self::Unlinked(id) => id,
            Self::Custom { user_id, .. } => user_id,
        }
    }

    /// Confirmation text for the browser.
    pub fn message(&self) -> String {
        match self {
            Self::Linked(id) => format!("User '{}' linked", id),
            Self::Unlinked(id) => format!("User '{}' unlinked", id),
            Self::Custom { message, .. } => message.clone(),
        }
    }
}

/// Query parameters of the redirect callback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CallbackParams {
    /// The authorization code.
    pub code: Option<String>,
    /// The CSRF state echoed by the authorization server.
    pub state: Option<String>,
    /// Error code when the authorization server denied the request.
    pub error: Option<String>,
    /// Human-readable companion to `error`.
    pub error_description: Option<String>,
}

/// A started flow: where to send the browser and the cookie to set.
#[derive(Debug, Clone)]
pub struct Initiation {
    /// Authorization URL carrying the CSRF state.
    pub redirect_url: String,
    /// Grant cookie to set on the redirect response.
    pub cookie: Cookie<'static>,
}

/// A finished callback.
#[derive(Debug)]
pub struct CallbackResponse {
    /// Cookie that removes the grant cookie from the browser.
    pub clear_cookie: Cookie<'static>,
    /// How the flow ended.
    pub result: AuthResult<FlowOutcome>,
}

/// Drives the redirect flows that link and unlink accounts.
pub struct FlowController {
    config: OAuthConfig,
    cookies: CookieSettings,
    cache: StateCache<CompletionHandler>,
    manager: Arc<TokenManager>,
}

impl FlowController {
    /// Creates a controller with its own state cache.
    pub fn new(config: OAuthConfig, cookies: CookieSettings, manager: Arc<TokenManager>) -> Self {
        let cache = StateCache::new(config.grant_ttl);
        Self {
            config,
            cookies,
            cache,
            manager,
        }
    }

    /// The OAuth configuration.
    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Name of the grant cookie read by [`callback`](Self::callback).
    pub fn cookie_name(&self) -> &str {
        &self.cookies.name
    }

    /// The token manager used for code exchange and refresh.
    pub fn manager(&self) -> &Arc<TokenManager> {
        &self.manager
    }

    /// Number of flows awaiting their callback.
    pub fn pending(&self) -> usize {
        self.cache.len()
    }

    /// Starts a flow that runs `handler` on a successful callback.
    pub fn initiate(&self, handler: CompletionHandler) -> Initiation {
        let handler_name = handler.name().to_string();
        let grant = self.cache.begin(handler);
        let cookie = grant_cookie(
            &self.cookies,
            self.default_cookie_path(),
            &grant.grant_id,
            self.config.grant_ttl,
        );

        info!(
            grant = %fingerprint(&grant.grant_id),
            handler = %handler_name,
            "authorization flow initiated"
        );

        Initiation {
            redirect_url: self.config.authorization_url(&grant.state),
            cookie,
        }
    }

    /// Completes a flow from the browser's callback.
    ///
    /// `cookie_value` is the grant cookie, if the browser sent one. The
    /// response always carries a removal cookie.
    pub async fn callback(
        &self,
        cookie_value: Option<&str>,
        params: CallbackParams,
    ) -> CallbackResponse {
        let result = self.complete(cookie_value, params).await;
        match &result {
            Ok(outcome) => info!(
                user_id = %outcome.user_id(),
                "authorization flow completed"
            ),
            Err(e) => warn!(code = %e.code(), error = %e, "authorization flow failed"),
        }

        CallbackResponse {
            clear_cookie: removal_cookie(&self.cookies, self.default_cookie_path()),
            result,
        }
    }

    /// Drops all pending flows.
    pub fn shutdown(&self) {
        self.cache.shutdown();
    }

    async fn complete(
        &self,
        cookie_value: Option<&str>,
        params: CallbackParams,
    ) -> AuthResult<FlowOutcome> {
        let grant_id = cookie_value
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AuthError::invalid_grant("no grant cookie"))?;

        let pending = self
            .cache
            .consume(grant_id, params.state.as_deref())
            .ok_or_else(|| AuthError::invalid_grant("unknown or expired grant"))?;

        if !pending.state_matched() {
            return Err(AuthError::invalid_grant("state mismatch"));
        }

        if let Some(error) = params.error {
            let reason = match params.error_description {
                Some(description) => format!("authorization denied: {}: {}", error, description),
                None => format!("authorization denied: {}", error),
            };
            return Err(AuthError::unauthorized(reason));
        }

        let code = params
            .code
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AuthError::unauthorized("missing authorization code"))?;
        debug!(code = %mask_token(&code), "exchanging authorization code");

        let (user_id, token) = self.manager.exchange_code(&code).await?;

        let store = self.manager.store().as_ref();
        let resolved = match store
            .load_user(&user_id)
            .await
            .map_err(|e| AuthError::persistence("loading user", e))?
        {
            Some(mut user) => {
                user.replace_token(token);
                ResolvedUser {
                    user,
                    existing: true,
                }
            }
            None => ResolvedUser {
                user: User::new(user_id, token),
                existing: false,
            },
        };

        let handler = pending.into_handler();
        debug!(
            user_id = %resolved.user.id,
            existing = resolved.existing,
            handler = %handler.name(),
            "running completion handler"
        );
        handler.complete(store, resolved).await
    }

    fn default_cookie_path(&self) -> &str {
        self.config.redirect_uri.path()
    }
}

impl fmt::Debug for FlowController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowController")
            .field("cookies", &self.cookies)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;
    use nclink_core::Token;
    use url::Url;

    use super::*;
    use crate::endpoint::{TokenEndpoint, TokenResponse};
    use crate::error::{AuthErrorCode, ExchangeError, StoreResult};
    use crate::store::MemoryCredentialStore;

    #[derive(Default)]
    struct FakeEndpoint {
        exchanges: AtomicUsize,
        reject: bool,
    }

    impl TokenEndpoint for FakeEndpoint {
        fn exchange_code<'a>(
            &'a self,
            code: &'a str,
        ) -> BoxFuture<'a, Result<TokenResponse, ExchangeError>> {
            Box::pin(async move {
                self.exchanges.fetch_add(1, Ordering::SeqCst);
                if self.reject {
                    return Err(ExchangeError::Rejected {
                        status: 400,
                        body: "invalid_grant".to_string(),
                    });
                }
                Ok(TokenResponse {
                    access_token: format!("access-for-{code}"),
                    refresh_token: Some("refresh".to_string()),
                    token_type: "Bearer".to_string(),
                    expires_in: 3600,
                    user_id: Some("alice".to_string()),
                })
            })
        }

        fn refresh<'a>(
            &'a self,
            _refresh_token: &'a str,
        ) -> BoxFuture<'a, Result<TokenResponse, ExchangeError>> {
            Box::pin(async { Err(ExchangeError::Network("unused".to_string())) })
        }
    }

    /// Store wrapper that counts deletions.
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryCredentialStore,
        deletes: AtomicUsize,
    }

    impl CredentialStore for CountingStore {
        fn load_user<'a>(&'a self, id: &'a UserId) -> BoxFuture<'a, StoreResult<Option<User>>> {
            self.inner.load_user(id)
        }

        fn save_user<'a>(&'a self, user: &'a User) -> BoxFuture<'a, StoreResult<()>> {
            self.inner.save_user(user)
        }

        fn delete_user<'a>(&'a self, id: &'a UserId) -> BoxFuture<'a, StoreResult<()>> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            self.inner.delete_user(id)
        }

        fn list_users(&self) -> BoxFuture<'_, StoreResult<Vec<User>>> {
            self.inner.list_users()
        }
    }

    struct Fixture {
        controller: FlowController,
        endpoint: Arc<FakeEndpoint>,
        store: Arc<CountingStore>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_endpoint(FakeEndpoint::default())
        }

        fn with_endpoint(endpoint: FakeEndpoint) -> Self {
            let endpoint = Arc::new(endpoint);
            let store = Arc::new(CountingStore::default());
            let manager = Arc::new(TokenManager::new(
                endpoint.clone(),
                store.clone(),
                chrono::Duration::seconds(300),
            ));
            let config = OAuthConfig::nextcloud(
                &Url::parse("https://cloud.example.com").unwrap(),
                "client",
                "secret",
                Url::parse("https://app.example.com/auth/nextcloud/grant").unwrap(),
            )
            .unwrap();
            let controller = FlowController::new(config, CookieSettings::default(), manager);
            Self {
                controller,
                endpoint,
                store,
            }
        }

        fn exchanges(&self) -> usize {
            self.endpoint.exchanges.load(Ordering::SeqCst)
        }

        fn deletes(&self) -> usize {
            self.store.deletes.load(Ordering::SeqCst)
        }
    }

    fn state_of(initiation: &Initiation) -> String {
        let url = Url::parse(&initiation.redirect_url).unwrap();
        url.query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    fn params(code: &str, state: &str) -> CallbackParams {
        CallbackParams {
            code: Some(code.to_string()),
            state: Some(state.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn initiate_sets_cookie_and_redirect() {
        let fx = Fixture::new();
        let initiation = fx.controller.initiate(CompletionHandler::Link);

        assert!(
            initiation
                .redirect_url
                .starts_with("https://cloud.example.com/index.php/apps/oauth2/authorize?")
        );
        assert_eq!(initiation.cookie.name(), "grant");
        assert_eq!(initiation.cookie.path(), Some("/auth/nextcloud/grant"));
        assert_eq!(initiation.cookie.http_only(), Some(true));
        assert_ne!(initiation.cookie.value(), state_of(&initiation));
        assert_eq!(fx.controller.pending(), 1);
    }

    #[tokio::test]
    async fn link_flow_stores_user() {
        let fx = Fixture::new();
        let initiation = fx.controller.initiate(CompletionHandler::Link);
        let state = state_of(&initiation);

        let response = fx
            .controller
            .callback(Some(initiation.cookie.value()), params("c1", &state))
            .await;

        let outcome = response.result.unwrap();
        assert_eq!(outcome, FlowOutcome::Linked(UserId::new("alice")));
        assert_eq!(outcome.message(), "User 'alice' linked");
        assert_eq!(response.clear_cookie.value(), "");
        assert_eq!(fx.exchanges(), 1);

        let stored = fx.store.load_user(&UserId::new("alice")).await.unwrap().unwrap();
        assert_eq!(stored.token.access_token, "access-for-c1");
        assert_eq!(fx.controller.pending(), 0);
    }

    #[tokio::test]
    async fn relink_updates_existing_user() {
        let fx = Fixture::new();
        let existing = User::new(
            "alice",
            Token::issued("old", "old-refresh", "Bearer", 10, Utc::now()),
        );
        fx.store.save_user(&existing).await.unwrap();

        let initiation = fx.controller.initiate(CompletionHandler::Link);
        let state = state_of(&initiation);
        let response = fx
            .controller
            .callback(Some(initiation.cookie.value()), params("c2", &state))
            .await;
        response.result.unwrap();

        let stored = fx.store.load_user(&existing.id).await.unwrap().unwrap();
        assert_eq!(stored.token.access_token, "access-for-c2");
        assert_eq!(stored.created_at, existing.created_at);
    }

    #[tokio::test]
    async fn missing_cookie_is_invalid_grant() {
        let fx = Fixture::new();
        let response = fx.controller.callback(None, params("c", "s")).await;
        assert_eq!(
            response.result.unwrap_err().code(),
            AuthErrorCode::InvalidGrant
        );
        assert_eq!(fx.exchanges(), 0);
    }

    #[tokio::test]
    async fn forged_cookie_is_invalid_grant_without_exchange() {
        let fx = Fixture::new();
        let initiation = fx.controller.initiate(CompletionHandler::Link);
        let state = state_of(&initiation);

        let response = fx
            .controller
            .callback(Some("forged"), params("c", &state))
            .await;

        assert_eq!(
            response.result.unwrap_err().code(),
            AuthErrorCode::InvalidGrant
        );
        assert_eq!(fx.exchanges(), 0);
        // The real flow is untouched.
        assert_eq!(fx.controller.pending(), 1);
    }

    #[tokio::test]
    async fn replayed_callback_is_invalid_grant() {
        let fx = Fixture::new();
        let initiation = fx.controller.initiate(CompletionHandler::Link);
        let state = state_of(&initiation);
        let grant = initiation.cookie.value().to_string();

        let first = fx.controller.callback(Some(&grant), params("c", &state)).await;
        assert!(first.result.is_ok());

        let replay = fx.controller.callback(Some(&grant), params("c", &state)).await;
        assert_eq!(replay.result.unwrap_err().code(), AuthErrorCode::InvalidGrant);
        assert_eq!(fx.exchanges(), 1);
    }

    #[tokio::test]
    async fn state_mismatch_is_invalid_grant_and_burns_grant() {
        let fx = Fixture::new();
        let initiation = fx.controller.initiate(CompletionHandler::Link);
        let state = state_of(&initiation);
        let grant = initiation.cookie.value().to_string();

        let response = fx
            .controller
            .callback(Some(&grant), params("c", "not-the-state"))
            .await;
        assert_eq!(
            response.result.unwrap_err().code(),
            AuthErrorCode::InvalidGrant
        );

        let retry = fx.controller.callback(Some(&grant), params("c", &state)).await;
        assert_eq!(retry.result.unwrap_err().code(), AuthErrorCode::InvalidGrant);
        assert_eq!(fx.exchanges(), 0);
    }

    #[tokio::test]
    async fn missing_state_is_invalid_grant() {
        let fx = Fixture::new();
        let initiation = fx.controller.initiate(CompletionHandler::Link);
        let response = fx
            .controller
            .callback(
                Some(initiation.cookie.value()),
                CallbackParams {
                    code: Some("c".to_string()),
                    ..Default::default()
                },
            )
            .await;
        assert_eq!(
            response.result.unwrap_err().code(),
            AuthErrorCode::InvalidGrant
        );
        assert_eq!(fx.exchanges(), 0);
    }

    #[tokio::test]
    async fn rejected_exchange_is_unauthorized() {
        let fx = Fixture::with_endpoint(FakeEndpoint {
            reject: true,
            ..Default::default()
        });
        let initiation = fx.controller.initiate(CompletionHandler::Link);
        let state = state_of(&initiation);

        let response = fx
            .controller
            .callback(Some(initiation.cookie.value()), params("c", &state))
            .await;

        let err = response.result.unwrap_err();
        assert_eq!(err.code(), AuthErrorCode::Unauthorized);
        assert_eq!(err.public_message(), "Auth error: Not authorized");
        assert!(fx.store.inner.is_empty().await);
    }

    #[tokio::test]
    async fn denied_authorization_is_unauthorized_without_exchange() {
        let fx = Fixture::new();
        let initiation = fx.controller.initiate(CompletionHandler::Link);
        let state = state_of(&initiation);

        let response = fx
            .controller
            .callback(
                Some(initiation.cookie.value()),
                CallbackParams {
                    state: Some(state),
                    error: Some("access_denied".to_string()),
                    ..Default::default()
                },
            )
            .await;

        assert_eq!(
            response.result.unwrap_err().code(),
            AuthErrorCode::Unauthorized
        );
        assert_eq!(fx.exchanges(), 0);
    }

    #[tokio::test]
    async fn missing_code_is_unauthorized_without_exchange() {
        let fx = Fixture::new();
        let initiation = fx.controller.initiate(CompletionHandler::Link);
        let state = state_of(&initiation);

        let response = fx
            .controller
            .callback(
                Some(initiation.cookie.value()),
                CallbackParams {
                    state: Some(state),
                    ..Default::default()
                },
            )
            .await;

        assert_eq!(
            response.result.unwrap_err().code(),
            AuthErrorCode::Unauthorized
        );
        assert_eq!(fx.exchanges(), 0);
    }

    #[tokio::test]
    async fn unlink_unknown_user_is_not_linked_without_delete() {
        let fx = Fixture::new();
        let initiation = fx.controller.initiate(CompletionHandler::Unlink);
        let state = state_of(&initiation);

        let response = fx
            .controller
            .callback(Some(initiation.cookie.value()), params("c", &state))
            .await;

        let err = response.result.unwrap_err();
        assert_eq!(err.code(), AuthErrorCode::NotLinked);
        assert_eq!(fx.deletes(), 0);
        assert!(fx.store.inner.is_empty().await);
    }

    #[tokio::test]
    async fn unlink_deletes_linked_user() {
        let fx = Fixture::new();
        fx.store
            .save_user(&User::new(
                "alice",
                Token::issued("a", "r", "Bearer", 3600, Utc::now()),
            ))
            .await
            .unwrap();

        let initiation = fx.controller.initiate(CompletionHandler::Unlink);
        let state = state_of(&initiation);
        let response = fx
            .controller
            .callback(Some(initiation.cookie.value()), params("c", &state))
            .await;

        let outcome = response.result.unwrap();
        assert_eq!(outcome.message(), "User 'alice' unlinked");
        assert_eq!(fx.deletes(), 1);
        assert!(fx.store.inner.is_empty().await);
    }

    struct Audit;

    impl CompletionStrategy for Audit {
        fn name(&self) -> &str {
            "audit"
        }

        fn complete<'a>(
            &'a self,
            _store: &'a dyn CredentialStore,
            resolved: ResolvedUser,
        ) -> BoxFuture<'a, AuthResult<FlowOutcome>> {
            Box::pin(async move {
                Ok(FlowOutcome::Custom {
                    message: format!(
                        "audited {} (existing: {})",
                        resolved.user.id, resolved.existing
                    ),
                    user_id: resolved.user.id,
                })
            })
        }
    }

    #[tokio::test]
    async fn custom_handler_runs_instead_of_persisting() {
        let fx = Fixture::new();
        let initiation = fx
            .controller
            .initiate(CompletionHandler::Custom(Arc::new(Audit)));
        let state = state_of(&initiation);

        let response = fx
            .controller
            .callback(Some(initiation.cookie.value()), params("c", &state))
            .await;

        let outcome = response.result.unwrap();
        assert_eq!(outcome.message(), "audited alice (existing: false)");
        assert!(fx.store.inner.is_empty().await);
    }

    #[tokio::test]
    async fn shutdown_drops_pending_flows() {
        let fx = Fixture::new();
        let initiation = fx.controller.initiate(CompletionHandler::Link);
        let state = state_of(&initiation);

        fx.controller.shutdown();

        let response = fx
            .controller
            .callback(Some(initiation.cookie.value()), params("c", &state))
            .await;
        assert_eq!(
            response.result.unwrap_err().code(),
            AuthErrorCode::InvalidGrant
        );
    }
}

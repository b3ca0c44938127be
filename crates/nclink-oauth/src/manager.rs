//! Token lifecycle: staleness checks, refresh, persistence and signing.
//!
//! Refreshes for one user are serialized. A caller that finds its token stale
//! takes the user's refresh lock, reloads the persisted copy (another caller
//! may have refreshed while it waited) and only exchanges the refresh token
//! if that copy is still stale. Concurrent stale callers for the same user
//! therefore cause a single exchange.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use nclink_core::{Token, User, UserId};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::endpoint::TokenEndpoint;
use crate::error::{AuthError, AuthResult, ExchangeError};
use crate::store::CredentialStore;

type Guards = Mutex<HashMap<UserId, Arc<AsyncMutex<()>>>>;

/// Result of [`TokenManager::ensure_fresh`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreshToken {
    /// A token usable for at least the skew margin.
    pub token: Token,
    /// Whether this call performed a refresh exchange.
    pub refreshed: bool,
}

/// Keeps users' tokens valid and signs outbound requests with them.
pub struct TokenManager {
    endpoint: Arc<dyn TokenEndpoint>,
    store: Arc<dyn CredentialStore>,
    skew: chrono::Duration,
    guards: Guards,
}

impl TokenManager {
    /// Creates a manager refreshing through `endpoint` and persisting to `store`.
    pub fn new(
        endpoint: Arc<dyn TokenEndpoint>,
        store: Arc<dyn CredentialStore>,
        skew: chrono::Duration,
    ) -> Self {
        Self {
            endpoint,
            store,
            skew,
            guards: Mutex::new(HashMap::new()),
        }
    }

    /// The refresh skew.
    pub fn skew(&self) -> chrono::Duration {
        self.skew
    }

    /// The token endpoint this manager exchanges against.
    pub fn endpoint(&self) -> &Arc<dyn TokenEndpoint> {
        &self.endpoint
    }

    /// The credential store refreshed users are written to.
    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Usable seconds left on `token`, recomputed now.
    pub fn expires_in(&self, token: &Token) -> i64 {
        token.expires_in(self.skew)
    }

    /// Exchanges an authorization code, returning the account it was issued
    /// for and its token.
    ///
    /// Any failure, including a response that names no account, is
    /// [`AuthError::Unauthorized`]. Nothing is persisted here.
    pub async fn exchange_code(&self, code: &str) -> AuthResult<(UserId, Token)> {
        let issued_at = Utc::now();
        let response = self.endpoint.exchange_code(code).await.map_err(|e| {
            warn!(error = %e, "authorization code exchange failed");
            AuthError::unauthorized(e.to_string())
        })?;

        let user_id = match response.user_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => UserId::new(id),
            _ => {
                warn!("token response carries no user_id");
                return Err(AuthError::unauthorized("token response carries no user_id"));
            }
        };

        Ok((user_id, response.into_token(issued_at, None)))
    }

    /// Returns a token for `user` that stays valid for at least the skew.
    ///
    /// A stale token is refreshed and the user persisted. On a failed
    /// exchange `user` and the store are left unchanged. If the exchange
    /// succeeds but persisting fails, `user` already holds the new token and
    /// a persistence error is returned. A stale user missing from the store
    /// fails with [`AuthError::NotLinked`] and is not refreshed.
    pub async fn ensure_fresh(&self, user: &mut User) -> AuthResult<FreshToken> {
        if !user.token.is_stale(self.skew) {
            return Ok(FreshToken {
                token: user.token.clone(),
                refreshed: false,
            });
        }

        let lease = GuardLease::acquire(&self.guards, &user.id);
        let _permit = lease.lock.lock().await;

        self.reload(user).await?;
        if !user.token.is_stale(self.skew) {
            debug!(user_id = %user.id, "token was refreshed by a concurrent caller");
            return Ok(FreshToken {
                token: user.token.clone(),
                refreshed: false,
            });
        }

        let token = self.refresh(user).await?;
        Ok(FreshToken {
            token,
            refreshed: true,
        })
    }

    /// Refreshes `user`'s token regardless of its remaining lifetime.
    pub async fn force_refresh(&self, user: &mut User) -> AuthResult<Token> {
        let lease = GuardLease::acquire(&self.guards, &user.id);
        let _permit = lease.lock.lock().await;

        self.reload(user).await?;
        self.refresh(user).await
    }

    /// Ensures `user`'s token is fresh and attaches it to `request`.
    pub async fn sign(
        &self,
        user: &mut User,
        request: reqwest::RequestBuilder,
    ) -> AuthResult<reqwest::RequestBuilder> {
        let fresh = self.ensure_fresh(user).await?;
        Ok(request.header(
            reqwest::header::AUTHORIZATION,
            fresh.token.authorization_header(),
        ))
    }

    /// Replaces `user` with its persisted copy if that copy differs.
    ///
    /// A user with no persisted copy has been unlinked; refreshing it would
    /// store it again, so it fails with [`AuthError::NotLinked`].
    async fn reload(&self, user: &mut User) -> AuthResult<()> {
        let stored = self
            .store
            .load_user(&user.id)
            .await
            .map_err(|e| AuthError::persistence("loading user", e))?;

        let Some(stored) = stored else {
            warn!(user_id = %user.id, "refusing to refresh a user that is not linked");
            return Err(AuthError::NotLinked {
                user_id: user.id.clone(),
            });
        };

        if stored.token != user.token {
            debug!(user_id = %user.id, "using persisted token");
            *user = stored;
        }
        Ok(())
    }

    /// Exchanges the refresh token and persists the result. Caller holds the
    /// user's refresh lock.
    async fn refresh(&self, user: &mut User) -> AuthResult<Token> {
        if user.token.refresh_token.is_empty() {
            warn!(user_id = %user.id, "cannot refresh without a refresh token");
            return Err(AuthError::Refresh {
                user_id: user.id.clone(),
                source: ExchangeError::MissingRefreshToken,
            });
        }

        let issued_at = Utc::now();
        let response = match self.endpoint.refresh(&user.token.refresh_token).await {
            Ok(response) => response,
            Err(source) => {
                warn!(user_id = %user.id, error = %source, "token refresh failed");
                return Err(AuthError::Refresh {
                    user_id: user.id.clone(),
                    source,
                });
            }
        };

        let token = response.into_token(issued_at, Some(&user.token.refresh_token));
        user.replace_token(token.clone());

        self.store
            .save_user(user)
            .await
            .map_err(|e| AuthError::persistence("saving refreshed user", e))?;

        info!(
            user_id = %user.id,
            expires_in = token.expires_in(self.skew),
            "refreshed access token"
        );
        Ok(token)
    }
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("skew", &self.skew)
            .finish_non_exhaustive()
    }
}

/// A user's refresh lock, removed from the map when no other caller holds it.
struct GuardLease<'a> {
    guards: &'a Guards,
    id: UserId,
    lock: Arc<AsyncMutex<()>>,
}

impl<'a> GuardLease<'a> {
    fn acquire(guards: &'a Guards, id: &UserId) -> Self {
        let lock = guards
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id.clone())
            .or_default()
            .clone();
        Self {
            guards,
            id: id.clone(),
            lock,
        }
    }
}

impl Drop for GuardLease<'_> {
    fn drop(&mut self) {
        let mut guards = self.guards.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference is the map's, one is ours.
        if Arc::strong_count(&self.lock) == 2 {
            guards.remove(&self.id);
        }
    }
}

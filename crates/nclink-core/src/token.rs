//! OAuth2 token and linked-user data model.
//!
//! A [`Token`] tracks its expiry as an absolute instant computed from the
//! `expires_in` value at issuance. Staleness and "seconds remaining" are
//! always evaluated against the current time at use, reduced by a skew
//! margin so that a token reported as usable stays usable for that margin.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Safety margin subtracted from a token's remaining lifetime, in seconds.
pub const DEFAULT_SKEW_SECS: i64 = 300;

/// Lifetime of a pending authorization (and of its grant cookie), in seconds.
pub const DEFAULT_GRANT_TTL_SECS: u64 = 600;

/// Identifier of a remote Nextcloud account, as reported by the
/// authorization server in the `user_id` field of its token response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Creates a user identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// An OAuth2 access/refresh token pair.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// The access token sent with outbound requests.
    pub access_token: String,

    /// The refresh token used to obtain a new access token.
    pub refresh_token: String,

    /// The token type, e.g. `Bearer`.
    pub token_type: String,

    /// When the access token expires, computed at issuance.
    pub expires_at: DateTime<Utc>,
}

impl Token {
    /// Creates a token issued at `issued_at` that lives for `expires_in_secs`.
    ///
    /// Lifetimes past the representable range saturate at the earliest or
    /// latest instant.
    pub fn issued(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        token_type: impl Into<String>,
        expires_in_secs: i64,
        issued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            token_type: token_type.into(),
            expires_at: expiry_after(issued_at, expires_in_secs),
        }
    }

    /// Returns true if the remaining lifetime at `now` is within `skew`.
    pub fn is_stale_at(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        self.expires_at - now <= skew
    }

    /// Returns true if the token must be refreshed before use.
    pub fn is_stale(&self, skew: Duration) -> bool {
        self.is_stale_at(Utc::now(), skew)
    }

    /// Usable seconds left at `now`: the remaining lifetime floored to whole
    /// seconds, minus `skew`. Negative once the token is stale.
    pub fn expires_in_at(&self, now: DateTime<Utc>, skew: Duration) -> i64 {
        let remaining_ms = (self.expires_at - now).num_milliseconds();
        remaining_ms.div_euclid(1000) - skew.num_seconds()
    }

    /// Usable seconds left right now.
    pub fn expires_in(&self, skew: Duration) -> i64 {
        self.expires_in_at(Utc::now(), skew)
    }

    /// Value of the `Authorization` header for this token.
    pub fn authorization_header(&self) -> String {
        if self.token_type.eq_ignore_ascii_case("bearer") {
            format!("Bearer {}", self.access_token)
        } else {
            format!("{} {}", self.token_type, self.access_token)
        }
    }
}

fn expiry_after(issued_at: DateTime<Utc>, secs: i64) -> DateTime<Utc> {
    let saturated = if secs < 0 {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    };
    Duration::try_seconds(secs)
        .and_then(|lifetime| issued_at.checked_add_signed(lifetime))
        .unwrap_or(saturated)
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// A Nextcloud account linked to this service, with its token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Remote account identifier.
    pub id: UserId,

    /// The account's current token.
    pub token: Token,

    /// When the account was first linked.
    pub created_at: DateTime<Utc>,

    /// When the token was last replaced.
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Creates a user record owning `token`.
    pub fn new(id: impl Into<UserId>, token: Token) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            token,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replaces the token and bumps `updated_at`.
    pub fn replace_token(&mut self, token: Token) {
        self.token = token;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn skew() -> Duration {
        Duration::seconds(DEFAULT_SKEW_SECS)
    }

    fn token_expiring_in(secs: i64) -> Token {
        Token::issued("access", "refresh", "Bearer", secs, Utc::now())
    }

    #[test]
    fn expiry_is_relative_to_issuance() {
        let issued_at = Utc::now() - Duration::hours(2);
        let token = Token::issued("a", "r", "Bearer", 3600, issued_at);
        assert_eq!(token.expires_at, issued_at + Duration::seconds(3600));
        assert!(token.is_stale(skew()));
    }

    #[test]
    fn fresh_token_is_not_stale() {
        let token = token_expiring_in(3600);
        assert!(!token.is_stale(skew()));
    }

    #[test]
    fn token_inside_skew_window_is_stale() {
        let token = token_expiring_in(DEFAULT_SKEW_SECS - 10);
        assert!(token.is_stale(skew()));

        let now = Utc::now();
        let boundary = Token {
            expires_at: now + skew(),
            ..token_expiring_in(0)
        };
        assert!(boundary.is_stale_at(now, skew()));
    }

    #[test]
    fn expires_in_is_reduced_by_skew() {
        let token = token_expiring_in(3600);
        let remaining = token.expires_in(skew());
        assert!((remaining - (3600 - DEFAULT_SKEW_SECS)).abs() <= 2);
    }

    #[test]
    fn expires_in_is_floored() {
        let now = Utc::now();
        let token = Token {
            expires_at: now + Duration::milliseconds(10_900),
            ..token_expiring_in(0)
        };
        assert_eq!(token.expires_in_at(now, Duration::zero()), 10);

        let expired = Token {
            expires_at: now - Duration::milliseconds(100),
            ..token_expiring_in(0)
        };
        assert_eq!(expired.expires_in_at(now, Duration::zero()), -1);
    }

    #[test]
    fn authorization_header_schemes() {
        let mut token = token_expiring_in(3600);
        token.token_type = "bearer".to_string();
        assert_eq!(token.authorization_header(), "Bearer access");

        token.token_type = "MAC".to_string();
        assert_eq!(token.authorization_header(), "MAC access");
    }

    #[test]
    fn debug_redacts_secrets() {
        let issued_at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let token = Token::issued("access", "refresh", "Bearer", 3600, issued_at);
        insta::assert_snapshot!(
            format!("{:?}", token),
            @r#"Token { access_token: "<redacted>", refresh_token: "<redacted>", token_type: "Bearer", expires_at: 2026-01-01T01:00:00Z }"#
        );
    }

    #[test]
    fn oversized_lifetime_saturates() {
        let now = Utc::now();
        let token = Token::issued("a", "r", "Bearer", 9_000_000_000_000_000, now);
        assert_eq!(token.expires_at, DateTime::<Utc>::MAX_UTC);
        assert!(!token.is_stale_at(now, skew()));
        assert!(token.expires_in_at(now, skew()) > 0);

        let token = Token::issued("a", "r", "Bearer", i64::MIN, now);
        assert_eq!(token.expires_at, DateTime::<Utc>::MIN_UTC);
        assert!(token.is_stale_at(now, skew()));
    }

    #[test]
    fn replace_token_bumps_updated_at() {
        let mut user = User::new("alice", token_expiring_in(10));
        let created = user.created_at;
        user.replace_token(token_expiring_in(3600));
        assert!(user.updated_at >= created);
        assert!(!user.token.is_stale(skew()));
    }

    #[test]
    fn user_serde_roundtrip() {
        let user = User::new("alice", token_expiring_in(3600));
        let json = serde_json::to_string(&user).unwrap();
        assert!(json.contains("\"id\":\"alice\""));
        let parsed: User = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, user);
    }
}

//! Grant cookie construction.

use std::time::Duration;

use cookie::{Cookie, SameSite};
use time::OffsetDateTime;

use crate::config::CookieSettings;

/// Builds the cookie carrying a freshly issued grant identifier.
///
/// `default_path` is used when the settings do not pin a path; it is the
/// callback route so the browser only sends the cookie back there.
pub(crate) fn grant_cookie(
    settings: &CookieSettings,
    default_path: &str,
    grant_id: &str,
    ttl: Duration,
) -> Cookie<'static> {
    let ttl = time::Duration::seconds(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX));

    let mut builder = Cookie::build((settings.name.clone(), grant_id.to_string()))
        .http_only(true)
        .secure(settings.secure)
        .same_site(SameSite::Lax)
        .path(cookie_path(settings, default_path))
        .max_age(ttl)
        .expires(OffsetDateTime::now_utc().saturating_add(ttl));

    if let Some(ref domain) = settings.domain {
        builder = builder.domain(domain.clone());
    }

    builder.build()
}

/// Builds a cookie that makes the browser drop the grant cookie.
pub(crate) fn removal_cookie(settings: &CookieSettings, default_path: &str) -> Cookie<'static> {
    let mut builder = Cookie::build((settings.name.clone(), String::new()))
        .http_only(true)
        .secure(settings.secure)
        .same_site(SameSite::Lax)
        .path(cookie_path(settings, default_path))
        .max_age(time::Duration::ZERO)
        .expires(OffsetDateTime::UNIX_EPOCH);

    if let Some(ref domain) = settings.domain {
        builder = builder.domain(domain.clone());
    }

    builder.build()
}

fn cookie_path(settings: &CookieSettings, default_path: &str) -> String {
    settings
        .path
        .clone()
        .unwrap_or_else(|| default_path.to_string())
}

//! CLI command implementations.

use std::io::Write;

use chrono::Utc;
use nclink_core::{User, UserId};
use nclink_oauth::{AuthError, CredentialStore};

use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::server;
use crate::signals::SignalHandler;
use crate::state::{AppState, build_store};

/// Runs the HTTP server until SIGINT or SIGTERM.
pub async fn serve(config: &ServerConfig) -> ServerResult<()> {
    let signals = SignalHandler::new();
    signals.spawn_listener()?;
    server::run(config, signals.shutdown_handle()).await
}

/// Prints every linked user with the usable seconds left on its token.
pub async fn users(config: &ServerConfig, out: &mut impl Write) -> ServerResult<()> {
    let skew = config.oauth_config()?.skew();
    let store = build_store(&config.store);
    let users = store.list_users().await?;

    if users.is_empty() {
        writeln!(out, "No linked users.")?;
        return Ok(());
    }

    let now = Utc::now();
    for user in users {
        writeln!(out, "{}", describe(&user, now, skew))?;
    }
    Ok(())
}

/// Refreshes `user_id`'s token regardless of its remaining lifetime.
pub async fn refresh(
    config: &ServerConfig,
    user_id: &str,
    out: &mut impl Write,
) -> ServerResult<()> {
    let state = AppState::from_config(config)?;
    let manager = state.manager();
    let id = UserId::new(user_id);

    let mut user = manager
        .store()
        .load_user(&id)
        .await?
        .ok_or(AuthError::NotLinked { user_id: id })?;

    let token = manager.force_refresh(&mut user).await?;
    writeln!(
        out,
        "Refreshed '{}': expires in {}s",
        user.id,
        manager.expires_in(&token)
    )?;
    Ok(())
}

/// Shows the configuration file path.
pub fn config_path(out: &mut impl Write) -> ServerResult<()> {
    writeln!(out, "config: {}", ServerConfig::default_path().display())?;
    Ok(())
}

/// Validates the configuration and resolves its secrets.
pub fn config_validate(config: &ServerConfig, out: &mut impl Write) -> ServerResult<()> {
    config.oauth_config()?;
    writeln!(out, "Configuration is valid.")?;
    Ok(())
}

fn describe(user: &User, now: chrono::DateTime<Utc>, skew: chrono::Duration) -> String {
    let expires_in = user.token.expires_in_at(now, skew);
    let status = if user.token.is_stale_at(now, skew) {
        "refresh due".to_string()
    } else {
        format!("expires in {}s", expires_in)
    };
    format!(
        "{}\t{}\tupdated {}",
        user.id,
        status,
        user.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    )
}

//! HTTP server lifecycle.

use tokio::net::TcpListener;
use tracing::info;

use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::routes::router;
use crate::signals::ShutdownHandle;
use crate::state::AppState;

/// Binds the configured address and serves until shutdown.
pub async fn run(config: &ServerConfig, shutdown: ShutdownHandle) -> ServerResult<()> {
    let state = AppState::from_config(config)?;
    let listener = TcpListener::bind(config.listen).await?;
    serve(listener, state, shutdown).await
}

/// Serves the flow routes on `listener` until `shutdown` is triggered.
///
/// Pending authorizations are dropped once the server has stopped.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: ShutdownHandle,
) -> ServerResult<()> {
    info!(
        addr = %listener.local_addr()?,
        link = %state.routes.link,
        unlink = %state.routes.unlink,
        redirect = %state.routes.redirect,
        "listening"
    );

    let controller = state.controller.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.wait())
        .await?;

    controller.shutdown();
    info!("server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use nclink_oauth::{
        CookieSettings, FlowController, MemoryCredentialStore, NextcloudTokenEndpoint,
        OAuthConfig, TokenManager,
    };
    use url::Url;

    use super::*;
    use crate::config::RouteSettings;
    use crate::signals::SignalHandler;

    fn state() -> AppState {
        let config = OAuthConfig::nextcloud(
            &Url::parse("https://cloud.example.com").unwrap(),
            "client",
            "secret",
            Url::parse("https://app.example.com/auth/nextcloud/grant").unwrap(),
        )
        .unwrap();
        let endpoint = Arc::new(NextcloudTokenEndpoint::new(&config).unwrap());
        let manager = Arc::new(TokenManager::new(
            endpoint,
            Arc::new(MemoryCredentialStore::new()),
            config.skew(),
        ));
        let controller = FlowController::new(config, CookieSettings::default(), manager);
        AppState::new(Arc::new(controller), RouteSettings::default())
    }

    #[tokio::test]
    async fn serves_until_shutdown_and_drops_pending_flows() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = state();
        let controller = state.controller.clone();
        let signals = SignalHandler::new();
        let handle = signals.shutdown_handle();

        let server = tokio::spawn(serve(listener, state, handle.clone()));

        let response = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap()
            .get(format!("http://{addr}/auth/nextcloud"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 303);
        assert_eq!(controller.pending(), 1);

        handle.trigger();
        let result = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(controller.pending(), 0);
    }
}

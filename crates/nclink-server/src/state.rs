//! Shared application state.

use std::sync::Arc;

use nclink_oauth::{
    CredentialStore, FileCredentialStore, FlowController, MemoryCredentialStore,
    NextcloudTokenEndpoint, TokenEndpoint, TokenManager,
};
use tracing::info;

use crate::config::{RouteSettings, ServerConfig, StoreBackend, StoreSettings};
use crate::error::ServerResult;

/// State shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    /// Flow controller owning the state cache.
    pub controller: Arc<FlowController>,
    /// Route paths.
    pub routes: RouteSettings,
}

impl AppState {
    /// Creates state from an assembled controller.
    pub fn new(controller: Arc<FlowController>, routes: RouteSettings) -> Self {
        Self { controller, routes }
    }

    /// Builds the endpoint, store, token manager and flow controller.
    pub fn from_config(config: &ServerConfig) -> ServerResult<Self> {
        let oauth = config.oauth_config()?;
        let endpoint: Arc<dyn TokenEndpoint> = Arc::new(NextcloudTokenEndpoint::new(&oauth)?);
        let store = build_store(&config.store);
        let manager = Arc::new(TokenManager::new(endpoint, store, oauth.skew()));
        let controller = FlowController::new(oauth, config.cookie.to_settings(), manager);

        Ok(Self::new(Arc::new(controller), config.routes.clone()))
    }

    /// The token manager, for signing requests on behalf of linked users.
    pub fn manager(&self) -> &Arc<TokenManager> {
        self.controller.manager()
    }
}

/// Creates the configured credential store.
pub fn build_store(settings: &StoreSettings) -> Arc<dyn CredentialStore> {
    match settings.backend {
        StoreBackend::File => {
            let dir = settings.dir();
            info!(path = %dir.display(), "using file credential store");
            Arc::new(FileCredentialStore::new(dir))
        }
        StoreBackend::Memory => {
            info!("using in-memory credential store");
            Arc::new(MemoryCredentialStore::new())
        }
    }
}

//! HTTP boundary, configuration and CLI for Nextcloud account linking.
//!
//! This crate wires the `nclink-oauth` flow controller into an axum router:
//!
//! - Configuration loading with secret references ([`ServerConfig`])
//! - The link, unlink and redirect routes ([`router`])
//! - Server lifecycle with graceful shutdown ([`server::run`], [`SignalHandler`])
//! - CLI commands for operators ([`cli`], [`commands`])
//!
//! # Example
//!
//! ```rust,no_run
//! use nclink_server::{ServerConfig, SignalHandler, server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::load(None)?;
//!     let signals = SignalHandler::new();
//!     signals.spawn_listener()?;
//!     server::run(&config, signals.shutdown_handle()).await?;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod routes;
pub mod secret;
pub mod server;
pub mod signals;
pub mod state;

pub use config::{
    CONFIG_ENV, CookieConfig, LoggingSettings, NextcloudSettings, RouteSettings, ServerConfig,
    StoreBackend, StoreSettings,
};
pub use error::{ServerError, ServerResult};
pub use routes::router;
pub use signals::{ShutdownHandle, SignalHandler};
pub use state::{AppState, build_store};

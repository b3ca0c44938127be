//! Command-line interface definition.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::CONFIG_ENV;

/// nclink - link Nextcloud accounts through OAuth2 and keep their tokens fresh
#[derive(Debug, Parser)]
#[command(name = "nclink")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = CONFIG_ENV)]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v')]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the link, unlink and redirect routes
    Serve {
        /// Override the listen address
        #[arg(long)]
        listen: Option<SocketAddr>,
    },

    /// List linked users and their token lifetimes
    Users,

    /// Refresh a linked user's token now
    Refresh {
        /// The Nextcloud user ID
        user_id: String,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration actions.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Show the configuration file path
    Path,
    /// Validate the configuration, resolving secrets
    Validate,
}

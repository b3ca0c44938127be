//! nclink entry point.

use std::io;
use std::process::ExitCode;

use clap::Parser;
use nclink_core::{TracingConfig, init_tracing};

use nclink_server::cli::{Cli, Command, ConfigAction};
use nclink_server::commands;
use nclink_server::config::ServerConfig;
use nclink_server::error::ServerResult;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = ServerConfig::load(cli.config.as_deref());

    let tracing = if cli.debug {
        TracingConfig::cli_debug()
    } else {
        config
            .as_ref()
            .ok()
            .and_then(|c| c.logging.to_tracing_config().ok())
            .unwrap_or_default()
    };
    if let Err(e) = init_tracing(tracing) {
        eprintln!("error: {}", e);
        return ExitCode::FAILURE;
    }

    let result = match config {
        Ok(config) => run(cli.command, config).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, mut config: ServerConfig) -> ServerResult<()> {
    let mut out = io::stdout();

    match command {
        Command::Serve { listen } => {
            if let Some(listen) = listen {
                config.listen = listen;
            }
            commands::serve(&config).await
        }
        Command::Users => commands::users(&config, &mut out).await,
        Command::Refresh { user_id } => commands::refresh(&config, &user_id, &mut out).await,
        Command::Config { action } => match action {
            ConfigAction::Path => commands::config_path(&mut out),
            ConfigAction::Validate => commands::config_validate(&config, &mut out),
        },
    }
}

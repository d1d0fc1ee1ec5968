//! Credential proxy - keeps the real API key away from agents.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use credproxy::{
    broker::CredentialBroker,
    cli::{Cli, Command},
    config::Config,
    proxy::CredentialProxy,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::Info) => run_info(),
        Some(Command::Scopes) => run_scopes(),
        Some(Command::Serve) | None => run_server(cli).await,
    }
}

/// Print plugin info
fn run_info() -> ExitCode {
    let info = CredentialBroker::info();
    println!("{} v{}", info.name, info.version);
    println!("  {}", info.description);
    ExitCode::SUCCESS
}

/// Print supported scopes
fn run_scopes() -> ExitCode {
    for scope in CredentialBroker::scopes() {
        println!("{}", scope.pattern);
        println!("  {}", scope.description);
        println!("  examples: {}", scope.examples.join(", "));
    }
    ExitCode::SUCCESS
}

/// Run the proxy server
async fn run_server(cli: Cli) -> ExitCode {
    // Load configuration
    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            // Apply CLI overrides
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        upstream = %config.upstream.base_url,
        "Starting credential proxy"
    );

    let proxy = match CredentialProxy::new(config) {
        Ok(p) => p,
        Err(e) => {
            error!("Failed to create proxy: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = proxy.run().await {
        error!("Proxy error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Proxy shutdown complete");
    ExitCode::SUCCESS
}

//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Credential proxy - hands agents short-lived tokens instead of the real API key
#[derive(Parser, Debug)]
#[command(name = "credproxy")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "CREDPROXY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "CREDPROXY_PORT", global = true)]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "CREDPROXY_HOST", global = true)]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "CREDPROXY_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "CREDPROXY_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the proxy server (default)
    Serve,

    /// Print plugin name, version and description
    Info,

    /// List supported scope patterns
    Scopes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["credproxy", "--port", "9000"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.port, Some(9000));
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["credproxy", "scopes", "--log-format", "json"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Scopes)));
        assert_eq!(cli.log_format.as_deref(), Some("json"));
    }

    #[test]
    fn serve_accepts_listener_overrides() {
        let cli = Cli::try_parse_from(["credproxy", "serve", "-p", "9001", "--host", "0.0.0.0"])
            .unwrap();
        assert!(matches!(cli.command, Some(Command::Serve)));
        assert_eq!(cli.port, Some(9001));
        assert_eq!(cli.host.as_deref(), Some("0.0.0.0"));
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}

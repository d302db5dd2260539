use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "gemini-balance",
    version,
    about = "OpenAI-compatible proxy that load-balances a pool of Gemini API keys",
    long_about = "An OpenAI-compatible chat-completion proxy backed by a pool of Gemini API keys, with health scoring, pluggable selection strategies, retries and automatic failover."
)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "CONFIG_PATH")]
    pub config: Option<PathBuf>,

    /// Server bind address (overrides server.host)
    #[arg(long, env = "GEMINI_BALANCE_HOST")]
    pub host: Option<String>,

    /// Server port (overrides server.port)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Log filter used when RUST_LOG is unset
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long, env = "GEMINI_BALANCE_JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Start the proxy server (default)
    Serve,

    /// Load and validate the configuration, then exit
    CheckConfig,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Serve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_serve() {
        let cli = Cli::try_parse_from(["gemini-balance"]).unwrap();
        assert_eq!(cli.command(), Commands::Serve);
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_check_config_with_overrides() {
        let cli = Cli::try_parse_from([
            "gemini-balance",
            "--config",
            "custom.yaml",
            "--port",
            "9090",
            "check-config",
        ])
        .unwrap();
        assert_eq!(cli.command(), Commands::CheckConfig);
        assert_eq!(cli.port, Some(9090));
        assert_eq!(cli.config, Some(PathBuf::from("custom.yaml")));
    }
}

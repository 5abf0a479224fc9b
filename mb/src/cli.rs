//! CLI command definitions

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::debug;

/// MatterBridge - readiness-gated smart-home bridge
#[derive(Parser)]
#[command(
    name = "mb",
    about = "Bridge smart-home flow nodes onto a commissioning protocol server",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Deploy a flow and run until interrupted (SIGHUP redeploys)
    Run {
        /// Flow file (defaults to the configured one)
        #[arg(short, long)]
        flow: Option<PathBuf>,

        /// Don't start the admin HTTP endpoint
        #[arg(long)]
        no_http: bool,
    },

    /// Validate a flow file and print its build order
    Check {
        #[arg(short, long)]
        flow: Option<PathBuf>,

        #[arg(short = 'o', long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show the pairing code persisted for a node
    Pairing {
        /// Node ID of a standalone device or aggregator
        node_id: String,

        #[arg(short, long)]
        flow: Option<PathBuf>,

        #[arg(short = 'o', long, default_value = "text")]
        format: OutputFormat,
    },

    /// Clear a node's persisted pairing state
    Decommission {
        node_id: String,

        #[arg(short, long)]
        flow: Option<PathBuf>,

        /// Remove the node's whole storage namespace
        #[arg(long)]
        destroy: bool,
    },
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("matterbridge")
        .join("logs")
        .join("mb.log")
}

pub fn generate_after_help() -> String {
    debug!("generate_after_help: called");
    format!("Logs are written to: {}\n", get_log_path().display())
}

/// Output format for check/pairing
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_no_command() {
        let cli = Cli::parse_from(["mb"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_parse_run() {
        let cli = Cli::parse_from(["mb", "run", "--flow", "home.yml", "--no-http"]);
        match cli.command {
            Some(Command::Run { flow, no_http }) => {
                assert_eq!(flow, Some(PathBuf::from("home.yml")));
                assert!(no_http);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_parse_pairing_json() {
        let cli = Cli::parse_from(["mb", "-c", "mb.yml", "pairing", "light", "-o", "json"]);
        assert_eq!(cli.config, Some(PathBuf::from("mb.yml")));
        match cli.command {
            Some(Command::Pairing { node_id, format, .. }) => {
                assert_eq!(node_id, "light");
                assert_eq!(format, OutputFormat::Json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_parse_decommission_destroy() {
        let cli = Cli::parse_from(["mb", "decommission", "agg", "--destroy", "--log-level", "debug"]);
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(matches!(
            cli.command,
            Some(Command::Decommission { destroy: true, .. })
        ));
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!("table".parse::<OutputFormat>().is_err());
    }
}

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::window::View;

#[derive(Parser, Debug)]
#[command(
    name = "brmon",
    about = "Burn rate monitor for AI coding assistant usage logs"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Config file (default: ~/.config/brmon/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Use cached pricing only, don't fetch
    #[arg(long, global = true)]
    pub offline: bool,

    /// Output format: table (default), json
    #[arg(long, global = true, default_value = "table")]
    pub format: OutputFormat,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Serve the dashboard and JSON API (default)
    Serve {
        /// Listen address, overrides `bind` in the config
        #[arg(long)]
        bind: Option<String>,
    },
    /// Print the bucketed burn rate for a view
    Report {
        /// Time window
        #[arg(long, default_value = "current")]
        view: View,
        /// Bucket width in minutes, 1 to 1440 (default: config `bucket_minutes`)
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=1440))]
        bucket: Option<u32>,
        /// Show per-model breakdown within each bucket
        #[arg(long)]
        breakdown: bool,
    },
    /// Summary statistics for today
    Stats,
    /// Show the resolved price and channel rate at an instant
    Prices {
        /// Model to resolve (default: every model in the static table)
        #[arg(long)]
        model: Option<String>,
        /// Local wall-clock time, `YYYY-MM-DD HH:MM[:SS]` (default: now)
        #[arg(long)]
        at: Option<String>,
    },
}

#[derive(ValueEnum, Debug, Clone, PartialEq)]
pub enum OutputFormat {
    Table,
    Json,
}

impl Cli {
    pub fn effective_command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve { bind: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_serve() {
        let cli = Cli::parse_from(["brmon"]);
        assert!(matches!(cli.effective_command(), Command::Serve { bind: None }));
        assert_eq!(cli.format, OutputFormat::Table);
        assert!(!cli.offline);
    }

    #[test]
    fn report_flags() {
        let cli = Cli::parse_from([
            "brmon", "report", "--view", "24h", "--bucket", "5", "--format", "json",
        ]);
        assert_eq!(cli.format, OutputFormat::Json);
        match cli.effective_command() {
            Command::Report {
                view,
                bucket,
                breakdown,
            } => {
                assert_eq!(view, View::Last24h);
                assert_eq!(bucket, Some(5));
                assert!(!breakdown);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from(["brmon", "stats", "--offline", "--config", "/tmp/b.toml"]);
        assert!(cli.offline);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/b.toml")));
        assert!(matches!(cli.effective_command(), Command::Stats));
    }

    #[test]
    fn rejects_out_of_range_buckets() {
        assert!(Cli::try_parse_from(["brmon", "report", "--bucket", "0"]).is_err());
        assert!(Cli::try_parse_from(["brmon", "report", "--bucket", "1441"]).is_err());
        assert!(Cli::try_parse_from(["brmon", "report", "--bucket", "1440"]).is_ok());
    }

    #[test]
    fn rejects_unknown_view() {
        assert!(Cli::try_parse_from(["brmon", "report", "--view", "week"]).is_err());
    }
}

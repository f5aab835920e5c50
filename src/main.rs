mod aggregate;
mod cache;
mod cli;
mod config;
mod cost;
mod dedup;
mod history;
mod loader;
mod monitor;
mod output;
mod parser;
mod pricing;
mod rates;
mod server;
mod stats;
mod types;
mod window;

use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use tracing::info;

use cli::{Cli, Command, OutputFormat};
use monitor::Monitor;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mode = cli.effective_command();

    let config = Arc::new(config::load_config(cli.config.as_deref())?);
    let monitor = Arc::new(Monitor::new(Arc::clone(&config), cli.offline));

    match mode {
        Command::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.bind.clone());
            info!(
                bucket_minutes = config.bucket_minutes,
                refresh_secs = config.refresh_secs,
                "starting brmon"
            );
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(server::serve(monitor, &bind))?;
        }
        Command::Report {
            view,
            bucket,
            breakdown,
        } => {
            let report = monitor.report(view, bucket.unwrap_or(config.bucket_minutes));
            match cli.format {
                OutputFormat::Json => output::print_json(&report)?,
                OutputFormat::Table => output::print_report(&report, breakdown),
            }
        }
        Command::Stats => {
            let stats = monitor.compute_stats_for_today();
            match cli.format {
                OutputFormat::Json => output::print_json(&stats)?,
                OutputFormat::Table => output::print_stats(&stats),
            }
        }
        Command::Prices { model, at } => {
            let at = match at {
                Some(raw) => match history::parse_datetime(&raw) {
                    Some(at) => at,
                    None => bail!("Invalid --at '{raw}', expected YYYY-MM-DD HH:MM[:SS]"),
                },
                None => monitor.now(),
            };
            let models: Vec<String> = match model {
                Some(m) => vec![m],
                None => config.model_pricing.keys().cloned().collect(),
            };

            let rates = monitor.rate_book();
            let channel = rates.channel_at(at);
            let report = output::PriceReport {
                at,
                channel: output::ChannelRow {
                    channel: channel.to_string(),
                    name: rates.upstream_name(channel).to_string(),
                    multiplier: rates.multiplier(channel, at),
                },
                models: models
                    .into_iter()
                    .map(|model| {
                        let (price, origin) = rates.price_with_origin(&model, at);
                        output::PriceRow {
                            model,
                            price,
                            source: origin.as_str(),
                        }
                    })
                    .collect(),
            };

            match cli.format {
                OutputFormat::Json => output::print_json(&report)?,
                OutputFormat::Table => output::print_prices(&report),
            }
        }
    }

    Ok(())
}

use anyhow::Result;
use chrono::NaiveDateTime;
use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, ContentArrangement, Table};
use serde::Serialize;

use crate::aggregate::short_model_name;
use crate::cost::ModelPrice;
use crate::types::{ChannelTotal, ModelAggregate, Report, Stats, TokenUsage};

fn format_tokens(n: u64) -> String {
    if n >= 1_000_000 {
        format!("{:.1}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.1}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}

fn format_cost(cost: f64) -> String {
    if cost != 0.0 && cost.abs() < 0.01 {
        format!("${:.4}", cost)
    } else {
        format!("${:.2}", cost)
    }
}

fn format_price(price: Option<f64>) -> String {
    match price {
        Some(p) => format!("{p}"),
        None => "-".to_string(),
    }
}

fn new_table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn usage_row(label: String, count: u64, tokens: &TokenUsage, cost: f64) -> Vec<Cell> {
    vec![
        Cell::new(label),
        Cell::new(count),
        Cell::new(format_tokens(tokens.input_tokens)),
        Cell::new(format_tokens(tokens.output_tokens)),
        Cell::new(format_tokens(tokens.cache_creation_input_tokens)),
        Cell::new(format_tokens(tokens.cache_read_input_tokens)),
        Cell::new(format_cost(cost)),
    ]
}

fn model_row(m: &ModelAggregate, indent: &str) -> Vec<Cell> {
    usage_row(
        format!("{indent}{}", short_model_name(&m.model)),
        m.count,
        &m.tokens,
        m.cost,
    )
}

const USAGE_HEADER: [&str; 7] = [
    "Bucket",
    "Requests",
    "Input",
    "Output",
    "Cache Write",
    "Cache Read",
    "Cost",
];

pub fn print_report(report: &Report, breakdown: bool) {
    let resp = &report.response;
    if resp.data.is_empty() {
        eprintln!("No usage in view '{}'.", resp.view.as_str());
        return;
    }

    let mut table = new_table();
    table.set_header(USAGE_HEADER);
    for bucket in &resp.data {
        table.add_row(usage_row(
            bucket.timestamp.format("%Y-%m-%d %H:%M").to_string(),
            bucket.count,
            &bucket.tokens,
            bucket.cost,
        ));
        if breakdown {
            for m in &bucket.models {
                table.add_row(model_row(m, "  "));
            }
        }
    }
    let requests = resp.data.iter().map(|b| b.count).sum();
    table.add_row(usage_row(
        "TOTAL".to_string(),
        requests,
        &resp.stats.total_tokens,
        resp.stats.total_cost,
    ));
    println!("{table}");

    println!(
        "view {} · {}m buckets · current {} · avg {} · peak {}",
        resp.view.as_str(),
        resp.bucket_minutes,
        format_cost(resp.current_rate),
        format_cost(resp.stats.average_rate),
        format_cost(resp.stats.peak_rate),
    );

    if !report.channels.is_empty() {
        print_channels(&report.channels);
    }
}

fn print_channels(channels: &[ChannelTotal]) {
    let mut table = new_table();
    table.set_header(["Channel", "Requests", "List Price", "Billed"]);
    for c in channels {
        let label = if c.name == c.channel {
            c.channel.clone()
        } else {
            format!("{} ({})", c.name, c.channel)
        };
        table.add_row(vec![
            Cell::new(label),
            Cell::new(c.count),
            Cell::new(format_cost(c.raw_cost)),
            Cell::new(format_cost(c.cost)),
        ]);
    }
    println!("{table}");
}

pub fn print_stats(stats: &Stats) {
    let mut summary = new_table();
    summary.set_header(["Today", ""]);
    summary.add_row(vec![Cell::new("Total cost"), Cell::new(format_cost(stats.total_cost))]);
    summary.add_row(vec![Cell::new("Average / bucket"), Cell::new(format_cost(stats.average_rate))]);
    summary.add_row(vec![Cell::new("Peak / bucket"), Cell::new(format_cost(stats.peak_rate))]);
    summary.add_row(vec![Cell::new("Peak tokens"), Cell::new(format_tokens(stats.peak_tokens))]);
    summary.add_row(vec![Cell::new("Active buckets"), Cell::new(stats.duration_minutes)]);
    println!("{summary}");

    if stats.models.is_empty() {
        return;
    }
    let mut models = new_table();
    let mut header = USAGE_HEADER;
    header[0] = "Model";
    models.set_header(header);
    for m in &stats.models {
        models.add_row(model_row(m, ""));
    }
    println!("{models}");
}

/// One resolved price, for `brmon prices`.
#[derive(Debug, Serialize)]
pub struct PriceRow {
    pub model: String,
    #[serde(flatten)]
    pub price: ModelPrice,
    pub source: &'static str,
}

/// Channel in effect at the queried instant.
#[derive(Debug, Serialize)]
pub struct ChannelRow {
    pub channel: String,
    pub name: String,
    pub multiplier: f64,
}

#[derive(Debug, Serialize)]
pub struct PriceReport {
    pub at: NaiveDateTime,
    pub channel: ChannelRow,
    pub models: Vec<PriceRow>,
}

pub fn print_prices(report: &PriceReport) {
    let mut table = new_table();
    table.set_header([
        "Model",
        "Input",
        "Output",
        "Cache Write",
        "Cache Read",
        "Source",
    ]);
    for row in &report.models {
        table.add_row(vec![
            Cell::new(&row.model),
            Cell::new(row.price.input),
            Cell::new(row.price.output),
            Cell::new(format_price(row.price.cache_write)),
            Cell::new(format_price(row.price.cache_read)),
            Cell::new(row.source),
        ]);
    }
    println!("{table}");
    println!(
        "USD per million tokens at {} · channel {} ({}) × {}",
        report.at.format("%Y-%m-%d %H:%M:%S"),
        report.channel.name,
        report.channel.channel,
        report.channel.multiplier,
    );
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

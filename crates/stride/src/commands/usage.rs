//! Usage command - downloaded content and its storage footprint.

use anyhow::Result;
use clap::Args;
use console::{Style, style};
use serde::Serialize;
use stride_sync::{StorageIndexEntry, UsageSummary};

use super::{Context, format_bytes};

/// Arguments for the usage command.
#[derive(Args, Debug)]
pub struct UsageArgs {
    /// List every downloaded resource
    #[arg(short, long)]
    pub detailed: bool,
}

#[derive(Debug, Serialize)]
struct UsageOutput {
    summary: UsageSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    entries: Option<Vec<StorageIndexEntry>>,
}

/// Run the usage command.
pub async fn run(args: UsageArgs, ctx: &Context) -> Result<()> {
    let engine = ctx.open_engine().await?;
    let accounting = engine.accounting();
    let summary = accounting.usage_summary();

    if ctx.json_output {
        let output = UsageOutput {
            summary,
            entries: args.detailed.then(|| accounting.entries()),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    println!();
    println!("{}", style("Downloaded Content").bold());
    println!("{}", dim.apply_to("─".repeat(40)));
    println!();
    println!("  {} {}", dim.apply_to("Resources:"), summary.count);
    println!(
        "  {} {}",
        dim.apply_to("Size:"),
        format_bytes(summary.total_size_estimate)
    );

    if args.detailed && summary.count > 0 {
        let now = engine.runtime().now();
        let red = Style::new().red();
        println!();
        for entry in accounting.entries() {
            let expires = entry.expires_at.format("%Y-%m-%d %H:%M");
            let expires = if entry.is_expired(now) {
                red.apply_to(format!("expired {expires}")).to_string()
            } else {
                format!("expires {expires}")
            };
            println!(
                "  {:<24} {:>10}  {}",
                entry.resource_id,
                format_bytes(entry.size_estimate),
                dim.apply_to(expires)
            );
        }
    }
    println!();

    Ok(())
}

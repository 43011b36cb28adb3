//! Sweep command - expire downloads and reset stuck updates immediately.

use anyhow::Result;
use clap::Args;
use console::Style;
use serde::Serialize;

use super::Context;

/// Arguments for the sweep command.
#[derive(Args, Debug)]
pub struct SweepArgs {}

#[derive(Debug, Serialize)]
struct SweepOutput {
    removed: Vec<String>,
}

/// Run the sweep command.
pub async fn run(_args: SweepArgs, ctx: &Context) -> Result<()> {
    let engine = ctx.open_engine().await?;
    let removed = engine.sweep_now().await;
    engine.shutdown().await;

    if ctx.json_output {
        println!(
            "{}",
            serde_json::to_string_pretty(&SweepOutput { removed })?
        );
        return Ok(());
    }

    let dim = Style::new().dim();
    if removed.is_empty() {
        println!("{}", dim.apply_to("Nothing expired."));
    } else {
        println!("Removed {} expired download(s):", removed.len());
        for resource_id in &removed {
            println!("  {}", resource_id);
        }
    }

    Ok(())
}

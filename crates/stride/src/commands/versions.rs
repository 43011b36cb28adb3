//! Versions command - persisted reconciliation state.

use anyhow::Result;
use clap::Args;
use console::Style;
use stride_types::VersionStatus;

use super::Context;

/// Arguments for the versions command.
#[derive(Args, Debug)]
pub struct VersionsArgs {
    /// Only show records with this status (ready, updating, failed)
    #[arg(long)]
    pub status: Option<VersionStatus>,
}

/// Run the versions command.
pub async fn run(args: VersionsArgs, ctx: &Context) -> Result<()> {
    let engine = ctx.open_engine().await?;
    let mut records = engine.versions().records();
    if let Some(status) = args.status {
        records.retain(|r| r.status == status);
    }
    records.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    if records.is_empty() {
        println!("{}", dim.apply_to("No version records."));
        return Ok(());
    }

    for record in &records {
        let status = match record.status {
            VersionStatus::Ready => Style::new().green(),
            VersionStatus::Updating => Style::new().yellow(),
            VersionStatus::Failed => Style::new().red(),
        };
        println!(
            "  {:<24} {:<10} {} {}",
            record.resource_id,
            status.apply_to(record.status),
            record.downloaded_version.as_deref().unwrap_or("-"),
            dim.apply_to(format!("(remote {})", record.remote_version))
        );
        if ctx.verbose {
            println!(
                "  {:<24} {}",
                "",
                dim.apply_to(format!(
                    "changed {}",
                    record.last_status_change_at.to_rfc3339()
                ))
            );
        }
    }

    Ok(())
}

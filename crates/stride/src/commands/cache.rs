//! Cache command - inspect or clear cached entries.

use anyhow::Result;
use clap::{Args, Subcommand};
use console::Style;
use serde::Serialize;
use stride_types::ResourceKey;

use super::Context;

/// Arguments for the cache command.
#[derive(Args, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
    /// List cached keys
    List {
        /// Only show entries owned by this owner
        #[arg(long)]
        owner: Option<String>,
    },

    /// Remove cached entries
    Clear {
        /// Only remove entries owned by this owner
        #[arg(long)]
        owner: Option<String>,
    },

    /// Show the cached payload for one key (`kind/owner/entity`)
    Show {
        key: ResourceKey,
    },
}

#[derive(Debug, Serialize)]
struct ClearOutput {
    removed: usize,
}

/// Run the cache command.
pub async fn run(args: CacheArgs, ctx: &Context) -> Result<()> {
    match args.command {
        CacheCommand::List { owner } => cmd_list(ctx, owner.as_deref()).await,
        CacheCommand::Clear { owner } => cmd_clear(ctx, owner.as_deref()).await,
        CacheCommand::Show { key } => cmd_show(ctx, &key).await,
    }
}

async fn cmd_list(ctx: &Context, owner: Option<&str>) -> Result<()> {
    let engine = ctx.open_engine().await?;
    let mut keys = engine.cache().keys().await?;
    if let Some(owner) = owner {
        keys.retain(|k| k.is_owned_by(owner));
    }
    keys.sort();

    if ctx.json_output {
        let keys: Vec<String> = keys.iter().map(ToString::to_string).collect();
        println!("{}", serde_json::to_string_pretty(&keys)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    if keys.is_empty() {
        println!("{}", dim.apply_to("Cache is empty."));
    }
    for key in &keys {
        println!("  {}", key);
    }
    Ok(())
}

async fn cmd_clear(ctx: &Context, owner: Option<&str>) -> Result<()> {
    let engine = ctx.open_engine().await?;

    let removed = match owner {
        Some(owner) => engine.cache().purge_owner(owner).await?,
        None => {
            let mut removed = 0;
            // Downloaded content goes through the version engine so the
            // storage index and version records are dropped with it.
            for entry in engine.accounting().entries() {
                engine.versions().forget(&entry.resource_id).await?;
                removed += 1;
            }
            for key in engine.cache().keys().await? {
                engine.cache().remove(&key).await?;
                removed += 1;
            }
            removed
        }
    };

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&ClearOutput { removed })?);
    } else {
        let noun = if removed == 1 { "entry" } else { "entries" };
        println!("Removed {} cached {}", removed, noun);
    }
    Ok(())
}

async fn cmd_show(ctx: &Context, key: &ResourceKey) -> Result<()> {
    let engine = ctx.open_engine().await?;
    // Inspecting must not evict, so bypass the validating read.
    let Some(entry) = engine.cache().peek(key).await? else {
        anyhow::bail!("'{}' is not cached", key);
    };

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&entry)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    let ttl = engine.cache().ttl_for(key);
    let stale = engine.cache().is_stale(entry.last_synced_at, ttl);
    let shape = engine
        .cache()
        .settings()
        .shapes
        .validate(key.kind, &entry.payload);
    println!(
        "{} {}",
        dim.apply_to("Synced:"),
        entry.last_synced_at.to_rfc3339()
    );
    println!(
        "{} {}",
        dim.apply_to("Fresh:"),
        if stale { "no" } else { "yes" }
    );
    match shape {
        Ok(()) => println!("{} yes", dim.apply_to("Valid:")),
        Err(e) => println!("{} no ({})", dim.apply_to("Valid:"), Style::new().red().apply_to(e)),
    }
    println!("{}", serde_json::to_string_pretty(&entry.payload)?);
    Ok(())
}

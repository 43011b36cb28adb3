//! Config command - configuration management.

use anyhow::{Context as _, Result};
use clap::{Args, Subcommand};
use console::Style;
use stride_config::StrideConfig;

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the resolved configuration, defaults filled in
    Show,

    /// Show which config files are loaded and their precedence
    Which,

    /// Show the user configuration file path
    Path,

    /// Write a config file with every default spelled out
    Init {
        /// Create project-local config (./stride.toml) instead of user config
        #[arg(long)]
        local: bool,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(ctx),
        ConfigCommand::Which => cmd_which(ctx),
        ConfigCommand::Path => cmd_path(ctx),
        ConfigCommand::Init { local, force } => cmd_init(local, force),
    }
}

/// The loaded config with every section present.
fn resolved(config: &StrideConfig) -> StrideConfig {
    StrideConfig {
        cache: Some(config.cache_section()),
        sync: Some(config.sync_section()),
        storage: Some(config.storage_section()),
    }
}

fn cmd_show(ctx: &Context) -> Result<()> {
    let config = resolved(&ctx.loaded.config);

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    let sources = ctx.loaded.loaded_from();
    if sources.is_empty() {
        println!("{}", dim.apply_to("# No config files loaded (using defaults)"));
    } else {
        for path in sources {
            println!("{}", dim.apply_to(format!("# from {}", path.display())));
        }
    }
    if let Ok(path) = ctx.database_path() {
        println!("{}", dim.apply_to(format!("# database {}", path.display())));
    }
    println!();
    print!("{}", config.to_toml()?);
    Ok(())
}

fn cmd_which(ctx: &Context) -> Result<()> {
    let green = Style::new().green();
    let dim = Style::new().dim();

    println!("Config file search order (later overrides earlier):\n");
    for source in &ctx.loaded.sources {
        let status = if source.loaded {
            green.apply_to("✓ loaded")
        } else {
            dim.apply_to("· not found")
        };
        println!("  {} {}", status, source.path.display());
    }

    println!();
    let loaded_count = ctx.loaded.loaded_from().len();
    if loaded_count == 0 {
        println!("No config files found. Run 'stride config init' to create one.");
    } else {
        println!("{} config file(s) loaded.", loaded_count);
    }
    for warning in &ctx.loaded.warnings {
        println!("  {} {}", Style::new().yellow().apply_to("!"), warning);
    }
    Ok(())
}

fn cmd_path(ctx: &Context) -> Result<()> {
    let path =
        stride_config::user_config_path().context("could not determine the config directory")?;
    if ctx.json_output {
        println!("{}", serde_json::json!({ "path": path }));
    } else {
        println!("{}", path.display());
    }
    Ok(())
}

fn cmd_init(local: bool, force: bool) -> Result<()> {
    let path = if local {
        std::path::PathBuf::from("stride.toml")
    } else {
        stride_config::user_config_path().context("could not determine the config directory")?
    };

    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    stride_config::save_config(&resolved(&StrideConfig::new()), &path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

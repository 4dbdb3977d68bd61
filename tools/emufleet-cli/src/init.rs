//! Init command - write a default emufleet.toml

use anyhow::{Context, Result};
use clap::Args;
use emufleet_core::config::{CONFIG_FILE_NAME, Config};
use std::path::PathBuf;

/// Arguments for the init command
#[derive(Args)]
pub struct InitArgs {
    /// Where to write the config
    #[arg(default_value = CONFIG_FILE_NAME)]
    pub path: PathBuf,

    /// Content file to put in the config
    #[arg(long)]
    pub content: Option<PathBuf>,

    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

/// Execute the init command
pub fn execute(args: InitArgs) -> Result<()> {
    if args.path.exists() && !args.force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            args.path.display()
        );
    }

    let mut config = Config::default();
    if let Some(content) = args.content {
        config.emulator.content = content;
    }
    config
        .save(&args.path)
        .with_context(|| format!("Failed to write {}", args.path.display()))?;

    println!("Created {}", args.path.display());
    if config.emulator.content.as_os_str().is_empty() {
        println!("  Set [emulator].content before running the fleet.");
    }
    Ok(())
}

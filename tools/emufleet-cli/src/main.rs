//! Emufleet CLI - Run and poke emulator fleets
//!
//! # Commands
//!
//! - `emufleet init` - Write a default emufleet.toml
//! - `emufleet run` - Launch N emulators and drive a routine on each until one finds the target
//! - `emufleet press` - Send key events to one running emulator
//! - `emufleet listen` - Print lines sent by one running emulator
//! - `emufleet probe` - Read a pixel from a screenshot
//!
//! # Usage
//!
//! ```bash
//! # Four instances on ports 8888..8891
//! emufleet run routines/hatch.toml --instances 4
//!
//! # Tap A on the instance at 8889, then hold Left for half a second
//! emufleet press --instance 1 a hold:left wait:500 release:left
//! ```
//!
//! Configuration is read from `--config`, then `./emufleet.toml`, then the
//! per-user config directory. Missing files mean defaults.

mod init;
mod interrupt;
mod listen;
mod press;
mod probe;
mod run;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use emufleet_core::config::{self, Config};

/// Emufleet CLI - Run and poke emulator fleets
#[derive(Parser)]
#[command(name = "emufleet")]
#[command(about = "Emulator fleet automation")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./emufleet.toml, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default emufleet.toml
    Init(init::InitArgs),

    /// Launch the fleet and run a routine on every instance
    Run(run::RunArgs),

    /// Send key events to one running emulator
    Press(press::PressArgs),

    /// Print lines sent by one running emulator
    Listen(listen::ListenArgs),

    /// Read a pixel from a screenshot
    Probe(probe::ProbeArgs),
}

fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let path = explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(config::default_config_path);
    tracing::debug!(path = %path.display(), "Loading config");
    Config::load(&path).with_context(|| format!("Failed to load config {}", path.display()))
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init(args) => init::execute(args),
        Commands::Run(args) => run::execute(args, load_config(cli.config.as_deref())?),
        Commands::Press(args) => press::execute(args, load_config(cli.config.as_deref())?),
        Commands::Listen(args) => listen::execute(args, load_config(cli.config.as_deref())?),
        Commands::Probe(args) => probe::execute(args),
    }
}

//! Probe command - read a pixel from a screenshot
//!
//! Used to pick the `[check]` coordinates and color for a routine.

use anyhow::Result;
use clap::Args;
use emufleet_core::probe;
use std::path::PathBuf;

/// Arguments for the probe command
#[derive(Args)]
pub struct ProbeArgs {
    /// Screenshot to read
    pub image: PathBuf,

    pub x: u32,

    pub y: u32,

    /// Also save a copy with a crosshair through the pixel
    #[arg(long)]
    pub crosshair: Option<PathBuf>,
}

/// Execute the probe command
pub fn execute(args: ProbeArgs) -> Result<()> {
    let hex = probe::pixel_hex(&args.image, args.x, args.y)?;
    println!("{}", hex);

    if let Some(out) = &args.crosshair {
        probe::save_with_crosshair(&args.image, out, args.x, args.y)?;
        println!("Crosshair: {}", out.display());
    }
    Ok(())
}

//! Run command - launch the fleet and drive a routine on every instance
//!
//! Orchestrates: load routine → start emulators → settle → run until found
//! → tear down. Ctrl+C stops the fleet; a second grace period later any
//! emulator still alive is killed.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use clap::Args;
use emufleet_core::config::Config;
use emufleet_core::fleet::{Fleet, FleetReport};
use emufleet_core::ledger;
use emufleet_core::routine::{Routine, RoutineTask};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::interrupt;

/// Arguments for the run command
#[derive(Args)]
pub struct RunArgs {
    /// Routine file run by every instance
    pub routine: PathBuf,

    /// Number of instances (overrides [fleet].instances)
    #[arg(short = 'n', long)]
    pub instances: Option<usize>,

    /// Port of instance 0 (overrides [fleet].base_port)
    #[arg(long)]
    pub base_port: Option<u16>,

    /// Content file to load (overrides [emulator].content)
    #[arg(long)]
    pub content: Option<PathBuf>,

    /// Emulator executable (overrides [emulator].exe)
    #[arg(long)]
    pub exe: Option<PathBuf>,

    /// Also write the final report as JSON
    #[arg(long)]
    pub report: Option<PathBuf>,
}

/// Report file contents
#[derive(Serialize)]
struct RunSummary<'a> {
    finished_at: DateTime<Local>,
    routine: &'a Path,
    #[serde(flatten)]
    report: &'a FleetReport,
    /// Entries emulator-side scripts appended during the run
    ledger: Vec<serde_json::Value>,
}

fn apply_overrides(args: &RunArgs, config: &mut Config) {
    if let Some(instances) = args.instances {
        config.fleet.instances = instances;
    }
    if let Some(port) = args.base_port {
        config.fleet.base_port = port;
    }
    if let Some(content) = &args.content {
        config.emulator.content = content.clone();
    }
    if let Some(exe) = &args.exe {
        config.emulator.exe = exe.clone();
    }
}

/// Resolve a bare executable name through PATH; anything with a directory
/// component must exist as given.
fn resolve_exe(exe: &Path) -> Result<PathBuf> {
    if exe.components().count() > 1 {
        if !exe.exists() {
            anyhow::bail!("Emulator not found: {}", exe.display());
        }
        return Ok(exe.to_path_buf());
    }
    which::which(exe).with_context(|| {
        format!(
            "Could not find emulator '{}' on PATH.\n\
            Set [emulator].exe in emufleet.toml or pass --exe",
            exe.display()
        )
    })
}

/// Execute the run command
pub fn execute(args: RunArgs, mut config: Config) -> Result<()> {
    apply_overrides(&args, &mut config);
    config.validate()?;
    config.emulator.exe = resolve_exe(&config.emulator.exe)?;

    let routine = Routine::load(&args.routine)?;
    let interrupt = interrupt::install()?;

    println!("=== Launching ===");
    println!("  Emulator: {}", config.emulator.exe.display());
    println!("  Content:  {}", config.emulator.content.display());
    println!(
        "  Instances: {} (ports {}..={})",
        config.fleet.instances,
        config.fleet.base_port,
        config.fleet.port_for(config.fleet.instances - 1)?
    );

    let task = RoutineTask::from_config(routine, &config);
    let mut fleet = Fleet::new(&config)?.with_interrupt(interrupt);
    fleet.start_all().context("Failed to start fleet")?;

    println!("=== Running (Ctrl+C to stop) ===");
    let report = fleet.run(&task);
    drop(fleet);

    let entries = read_ledger(&config.runtime.ledger_path());
    print_report(&report);
    println!("  Ledger entries: {}", entries.len());
    if let Some(path) = &args.report {
        write_report(path, &args.routine, &report, entries)?;
        println!("  Report: {}", path.display());
    }

    if report.found_by.is_none() && report.killed && !report.interrupted {
        anyhow::bail!("Fleet stopped without finding the target");
    }
    Ok(())
}

fn print_report(report: &FleetReport) {
    println!("=== Finished ===");
    match report.found_by {
        Some(index) => println!("  Found by instance {} after {} attempts", index, report.attempts),
        None if report.interrupted => println!("  Interrupted after {} attempts", report.attempts),
        None => println!("  Stopped after {} attempts", report.attempts),
    }
    for (index, end) in report.instances.iter().enumerate() {
        println!("    instance {}: {:?}", index, end);
    }
}

/// Ledger contents after a run; an unreadable ledger counts as empty
fn read_ledger(path: &Path) -> Vec<serde_json::Value> {
    ledger::read(path).unwrap_or_else(|e| {
        tracing::warn!(path = %path.display(), error = %e, "Failed to read ledger");
        Vec::new()
    })
}

fn write_report(
    path: &Path,
    routine: &Path,
    report: &FleetReport,
    ledger: Vec<serde_json::Value>,
) -> Result<()> {
    let summary = RunSummary {
        finished_at: Local::now(),
        routine,
        report,
        ledger,
    };
    let json = serde_json::to_string_pretty(&summary)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

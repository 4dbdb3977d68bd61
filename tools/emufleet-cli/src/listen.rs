//! Listen command - print lines sent by one running emulator
//!
//! Keep-alive pings run while listening. Ctrl+C stops cleanly.

use anyhow::{Context, Result};
use clap::Args;
use emufleet_core::config::Config;
use emufleet_core::connection::{ControlConnection, ListenEnd};
use std::sync::atomic::Ordering;

use crate::interrupt;

/// Arguments for the listen command
#[derive(Args)]
pub struct ListenArgs {
    /// Instance to listen to (port = base_port + instance)
    #[arg(short, long, default_value = "0")]
    pub instance: usize,

    /// Explicit port (overrides --instance)
    #[arg(short, long)]
    pub port: Option<u16>,
}

/// Execute the listen command
pub fn execute(args: ListenArgs, config: Config) -> Result<()> {
    let port = crate::press::resolve_port(args.port, args.instance, &config)?;
    let stop = interrupt::install()?;

    let mut conn = ControlConnection::new(
        config.connection.host.clone(),
        port,
        config.connection.clone(),
    );
    conn.connect()
        .with_context(|| format!("Is the emulator scripting server listening on {}?", conn.addr()))?;

    println!("=== Listening on {} (Ctrl+C to stop) ===", conn.addr());
    let end = conn.listen(
        |line| println!("{}", line),
        || stop.load(Ordering::SeqCst),
    )?;

    match end {
        ListenEnd::Stopped => println!("Stopped."),
        ListenEnd::PeerClosed => println!("Emulator closed the connection."),
        ListenEnd::ConnectionLost => anyhow::bail!("Connection lost"),
    }
    Ok(())
}

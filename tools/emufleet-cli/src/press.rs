//! Press command - send key events to one running emulator
//!
//! Actions run in order:
//! - `a`, `start:250` - push a key (optionally for N ms)
//! - `hold:left`, `release:left` - change held state
//! - `wait:500` - pause

use anyhow::{Context, Result};
use clap::Args;
use emufleet_core::config::Config;
use emufleet_core::connection::ControlConnection;
use emufleet_core::input::{KeyEvent, KeyType};
use std::str::FromStr;
use std::thread;
use std::time::Duration;

/// One command-line action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressAction {
    Push(KeyType, Option<Duration>),
    Hold(KeyType),
    Release(KeyType),
    Wait(Duration),
}

impl FromStr for PressAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = |name: &str| name.parse::<KeyType>().map_err(|e| e.to_string());
        let millis = |value: &str| {
            value
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| format!("'{}' is not a number of milliseconds", value))
        };

        match s.trim().split_once(':') {
            Some(("hold", name)) => Ok(Self::Hold(key(name)?)),
            Some(("release", name)) => Ok(Self::Release(key(name)?)),
            Some(("wait", ms)) => Ok(Self::Wait(millis(ms)?)),
            Some((name, ms)) => Ok(Self::Push(key(name)?, Some(millis(ms)?))),
            None => Ok(Self::Push(key(s)?, None)),
        }
    }
}

/// Arguments for the press command
#[derive(Args)]
pub struct PressArgs {
    /// Actions to send, in order
    #[arg(required = true)]
    pub actions: Vec<PressAction>,

    /// Instance to talk to (port = base_port + instance)
    #[arg(short, long, default_value = "0")]
    pub instance: usize,

    /// Explicit port (overrides --instance)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Reset the emulator before the actions
    #[arg(long)]
    pub reset: bool,

    /// Request a screenshot with this name after the actions
    #[arg(long)]
    pub screenshot: Option<String>,
}

/// Port for `--port`, or the instance's port when none is given
pub(crate) fn resolve_port(port: Option<u16>, instance: usize, config: &Config) -> Result<u16> {
    match port {
        Some(port) => Ok(port),
        None => Ok(config.fleet.port_for(instance)?),
    }
}

/// Execute the press command
pub fn execute(args: PressArgs, config: Config) -> Result<()> {
    let port = resolve_port(args.port, args.instance, &config)?;
    let mut conn = ControlConnection::new(
        config.connection.host.clone(),
        port,
        config.connection.clone(),
    );
    conn.connect()
        .with_context(|| format!("Is the emulator scripting server listening on {}?", conn.addr()))?;

    if args.reset {
        conn.reset(config.timings.reset_settle())?;
    }

    for action in &args.actions {
        match *action {
            PressAction::Push(key, duration) => {
                let duration = duration.unwrap_or(config.input.default_push_time());
                conn.execute(KeyEvent::push_for(key, duration))?;
            }
            PressAction::Hold(key) => conn.execute(KeyEvent::hold(key))?,
            PressAction::Release(key) => conn.execute(KeyEvent::release(key))?,
            PressAction::Wait(duration) => thread::sleep(duration),
        }
        tracing::info!(?action, held = %conn.key_state().encode_flags(), "Sent");
    }

    if let Some(file) = &args.screenshot {
        conn.save_screenshot(file, config.timings.screenshot_settle())?;
        println!("Screenshot requested: {}", file);
    }

    conn.disconnect();
    Ok(())
}

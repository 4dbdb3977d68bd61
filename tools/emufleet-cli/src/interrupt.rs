//! Ctrl+C / SIGTERM as a polled flag

use anyhow::{Context, Result};
use signal_hook::consts::{SIGINT, SIGTERM};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// Flag raised by SIGINT or SIGTERM instead of killing the process, so
/// the fleet gets to tear its emulators down
pub fn install() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&flag))
            .with_context(|| format!("Failed to install handler for signal {}", signal))?;
    }
    Ok(flag)
}

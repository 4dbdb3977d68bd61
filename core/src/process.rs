//! Emulator process launching and termination.
//!
//! Command line shape: `<exe> [--script <path>]... <content>`. Script paths
//! are passed through verbatim and in order; what they do inside the
//! emulator is not this layer's concern.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::EmulatorConfig;

/// Process lifecycle errors
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The OS refused to create the process.
    #[error("failed to launch {}: {source}", exe.display())]
    Launch {
        exe: PathBuf,
        #[source]
        source: io::Error,
    },

    /// `start` while a previous child is still alive.
    #[error("emulator already running (pid {pid})")]
    AlreadyRunning { pid: u32 },

    /// Kill or reap failed.
    #[error("failed to terminate pid {pid}: {source}")]
    Terminate {
        pid: u32,
        #[source]
        source: io::Error,
    },
}

type ChildSlot = Arc<Mutex<Option<Child>>>;

fn lock(slot: &ChildSlot) -> MutexGuard<'_, Option<Child>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Non-blocking liveness poll
fn child_running(child: &mut Child) -> bool {
    match child.try_wait() {
        Ok(None) => true,
        Ok(Some(status)) => {
            tracing::trace!(pid = child.id(), %status, "Emulator has exited");
            false
        }
        Err(e) => {
            tracing::warn!(pid = child.id(), error = %e, "Failed to poll emulator status");
            false
        }
    }
}

/// Kill (if alive) and reap. Returns whether a live process was killed.
fn terminate(slot: &ChildSlot) -> Result<bool, ProcessError> {
    let Some(mut child) = lock(slot).take() else {
        return Ok(false);
    };
    let pid = child.id();

    if !child_running(&mut child) {
        return Ok(false);
    }

    child
        .kill()
        .and_then(|()| child.wait())
        .map_err(|source| ProcessError::Terminate { pid, source })?;
    tracing::info!(pid, "Emulator terminated");
    Ok(true)
}

/// One emulator binary launch: executable, content, and attached scripts.
///
/// Holds at most one live child at a time.
#[derive(Debug)]
pub struct EmulatorProcess {
    exe: PathBuf,
    content: PathBuf,
    scripts: Vec<PathBuf>,
    child: ChildSlot,
}

impl EmulatorProcess {
    pub fn new(exe: impl Into<PathBuf>, content: impl Into<PathBuf>, scripts: Vec<PathBuf>) -> Self {
        Self {
            exe: exe.into(),
            content: content.into(),
            scripts,
            child: Arc::new(Mutex::new(None)),
        }
    }

    pub fn from_config(config: &EmulatorConfig) -> Self {
        Self::new(&config.exe, &config.content, config.scripts.clone())
    }

    pub fn exe(&self) -> &Path {
        &self.exe
    }

    pub fn content(&self) -> &Path {
        &self.content
    }

    pub fn scripts(&self) -> &[PathBuf] {
        &self.scripts
    }

    /// Arguments after the executable
    pub fn args(&self) -> Vec<OsString> {
        let mut args = Vec::with_capacity(self.scripts.len() * 2 + 1);
        for script in &self.scripts {
            args.push(OsString::from("--script"));
            args.push(script.clone().into_os_string());
        }
        args.push(self.content.clone().into_os_string());
        args
    }

    /// Build the launch command
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.exe);
        cmd.args(self.args());
        cmd
    }

    /// Spawn the emulator. Returns its pid.
    ///
    /// Fails if a previous child is still running; a child that has since
    /// exited is replaced.
    pub fn start(&mut self) -> Result<u32, ProcessError> {
        let mut slot = lock(&self.child);
        if let Some(child) = slot.as_mut()
            && child_running(child)
        {
            return Err(ProcessError::AlreadyRunning { pid: child.id() });
        }

        let mut cmd = self.command();
        tracing::info!("Launching emulator: {:?}", cmd);

        let child = cmd.spawn().map_err(|source| ProcessError::Launch {
            exe: self.exe.clone(),
            source,
        })?;
        let pid = child.id();
        *slot = Some(child);

        tracing::debug!(pid, "Emulator started");
        Ok(pid)
    }

    /// Terminate the emulator (no graceful handshake) and reap it.
    ///
    /// A no-op when never started or already exited.
    pub fn stop(&mut self) -> Result<(), ProcessError> {
        terminate(&self.child).map(|_| ())
    }

    /// Point-in-time, non-blocking liveness check
    pub fn is_running(&self) -> bool {
        lock(&self.child).as_mut().is_some_and(child_running)
    }

    /// Pid of the current child, if any
    pub fn pid(&self) -> Option<u32> {
        lock(&self.child).as_ref().map(Child::id)
    }

    /// Handle that can terminate this process from another thread
    pub fn killer(&self) -> ProcessKiller {
        ProcessKiller {
            child: Arc::clone(&self.child),
        }
    }
}

impl Drop for EmulatorProcess {
    fn drop(&mut self) {
        if let Err(e) = terminate(&self.child) {
            tracing::warn!(error = %e, "Failed to stop emulator on drop");
        }
    }
}

/// Cloneable handle for forced termination of an [`EmulatorProcess`] owned
/// elsewhere
#[derive(Debug, Clone)]
pub struct ProcessKiller {
    child: ChildSlot,
}

impl ProcessKiller {
    pub fn is_running(&self) -> bool {
        lock(&self.child).as_mut().is_some_and(child_running)
    }

    /// Kill and reap if still alive. Returns whether anything was killed.
    pub fn kill(&self) -> Result<bool, ProcessError> {
        terminate(&self.child)
    }
}

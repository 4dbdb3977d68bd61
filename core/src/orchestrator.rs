//! One emulator instance: a process paired with its control connection

use crate::connection::ControlConnection;
use crate::process::{EmulatorProcess, ProcessKiller};

/// Pairs an [`EmulatorProcess`] with the [`ControlConnection`] that drives it.
///
/// The two have independent lifecycles: disconnecting leaves the process
/// running and stopping the process leaves the socket open. [`exit`]
/// tears down both.
///
/// [`exit`]: Orchestrator::exit
#[derive(Debug)]
pub struct Orchestrator {
    index: usize,
    process: EmulatorProcess,
    connection: ControlConnection,
}

impl Orchestrator {
    pub fn new(index: usize, process: EmulatorProcess, connection: ControlConnection) -> Self {
        Self {
            index,
            process,
            connection,
        }
    }

    /// Position in the fleet
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn process(&self) -> &EmulatorProcess {
        &self.process
    }

    pub fn connection(&self) -> &ControlConnection {
        &self.connection
    }

    pub fn killer(&self) -> ProcessKiller {
        self.process.killer()
    }

    /// Run caller-supplied automation against this instance.
    ///
    /// This is the only extension point; everything game-specific lives in
    /// `task`.
    pub fn perform_task<R>(
        &mut self,
        task: impl FnOnce(&mut EmulatorProcess, &mut ControlConnection) -> R,
    ) -> R {
        task(&mut self.process, &mut self.connection)
    }

    /// True while the emulator process is alive
    pub fn is_healthy(&self) -> bool {
        self.process.is_running()
    }

    /// Disconnect, then terminate the process.
    ///
    /// Failures are logged, never returned, so a shutdown sequence always
    /// runs to the end. Safe to call repeatedly.
    pub fn exit(&mut self) {
        self.connection.disconnect();
        if let Err(e) = self.process.stop() {
            tracing::warn!(instance = self.index, error = %e, "Error exiting orchestrator");
        }
    }
}

//! Emufleet Core - Emulator fleet automation
//!
//! This crate drives one or more emulator processes through a small line
//! protocol spoken by a scripting server running inside each emulator.
//!
//! # Architecture
//!
//! - [`KeyState`] - Held/released snapshot of the fixed key set, sent whole
//! - [`ControlConnection`] - Persistent socket session: keys, reset, screenshots, keep-alive
//! - [`EmulatorProcess`] - Spawns and terminates the emulator binary
//! - [`Orchestrator`] - One process paired with one connection
//! - [`Fleet`] - N orchestrators in parallel with shared stop signals
//! - [`Routine`] - Data-driven automation run by the fleet

pub mod config;
pub mod connection;
pub mod fleet;
pub mod input;
#[cfg(test)]
mod integration;
pub mod ledger;
pub mod orchestrator;
pub mod probe;
pub mod process;
pub mod protocol;
pub mod routine;
#[cfg(test)]
pub mod test_utils;

// Re-export the main types
pub use config::{Config, ConfigError};
pub use connection::{ConnectionError, ControlConnection, ListenEnd, Transport};
pub use fleet::{
    CycleContext, CycleOutcome, Fleet, FleetError, FleetReport, FleetSignals, InstanceEnd,
    InstanceTask, task_fn,
};
pub use input::{KeyEvent, KeyEventKind, KeyState, KeyType};
pub use orchestrator::Orchestrator;
pub use process::{EmulatorProcess, ProcessError, ProcessKiller};
pub use protocol::Frame;
pub use routine::{Routine, RoutineError, RoutineTask};

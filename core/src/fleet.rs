//! Fleet coordination: N emulator instances driven in parallel
//!
//! # Lifecycle
//!
//! ```text
//! Fleet::new ──▶ start_all ──▶ run(task) ──▶ exit_all
//!   N pairs      staggered      one thread     every process stopped,
//!   on ports     launches,      per instance   every connection closed
//!   base+i       then settle
//! ```
//!
//! Instances only share a [`FleetSignals`] block: an attempt counter, a
//! found flag and a kill flag. Each instance polls the flags at the top of
//! every cycle, so a stop request is honoured one cycle late at worst.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Instant;

use serde::Serialize;

use crate::config::{Config, ConfigError, FleetConfig};
use crate::connection::{ControlConnection, ConnectionError};
use crate::ledger;
use crate::orchestrator::Orchestrator;
use crate::process::{EmulatorProcess, ProcessError, ProcessKiller};

// ============================================================================
// Shared Signals
// ============================================================================

/// Cross-instance state shared by every instance thread.
///
/// Flags are atomics and the counter uses `fetch_add`, so the attempt count
/// is exact. It is still only informational: nothing orders a cycle's
/// increment against another instance's flag checks.
#[derive(Debug, Default)]
pub struct FleetSignals {
    attempts: AtomicU64,
    found: OnceLock<(usize, Instant)>,
    killed: AtomicBool,
}

impl FleetSignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts started so far across the fleet
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Count a new attempt and return its 1-based number
    pub fn next_attempt(&self) -> u64 {
        self.attempts.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn is_found(&self) -> bool {
        self.found.get().is_some()
    }

    /// Instance that found the target first
    pub fn finder(&self) -> Option<usize> {
        self.found.get().map(|(index, _)| *index)
    }

    /// Record a find. Returns false if another instance got there first.
    pub fn mark_found(&self, index: usize) -> bool {
        self.found.set((index, Instant::now())).is_ok()
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    /// Ask every instance to stop
    pub fn kill(&self) {
        self.killed.store(true, Ordering::SeqCst);
    }

    /// Found or killed
    pub fn should_stop(&self) -> bool {
        self.is_found() || self.is_killed()
    }

    fn found_at(&self) -> Option<Instant> {
        self.found.get().map(|(_, at)| *at)
    }
}

// ============================================================================
// Tasks
// ============================================================================

/// Result of one automation cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing yet; run another cycle
    Continue,
    /// Target condition observed; stop the fleet
    Found,
}

/// Everything a cycle may touch
pub struct CycleContext<'a> {
    /// Instance position in the fleet
    pub index: usize,
    /// Fleet-wide attempt number of this cycle
    pub attempt: u64,
    pub process: &'a mut EmulatorProcess,
    pub connection: &'a mut ControlConnection,
    pub signals: &'a FleetSignals,
}

/// Automation run by every instance, one cycle at a time.
///
/// A cycle error is fatal for the whole fleet, the same as an unhealthy
/// instance.
pub trait InstanceTask: Send + Sync {
    fn run_cycle(&self, cx: &mut CycleContext<'_>) -> anyhow::Result<CycleOutcome>;
}

impl<F> InstanceTask for F
where
    F: Fn(&mut CycleContext<'_>) -> anyhow::Result<CycleOutcome> + Send + Sync,
{
    fn run_cycle(&self, cx: &mut CycleContext<'_>) -> anyhow::Result<CycleOutcome> {
        self(cx)
    }
}

/// Pin a closure to the [`InstanceTask`] signature so its argument types
/// are inferred
pub fn task_fn<F>(f: F) -> F
where
    F: Fn(&mut CycleContext<'_>) -> anyhow::Result<CycleOutcome> + Send + Sync,
{
    f
}

// ============================================================================
// Reports and Errors
// ============================================================================

/// How one instance thread ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceEnd {
    /// This instance found the target
    Found,
    /// Stopped because of another instance's signal
    Stopped,
    /// Its process died
    Unhealthy,
    /// Never managed to connect
    ConnectFailed,
    /// A cycle returned an error
    Failed,
    /// The thread panicked or could not be spawned
    Crashed,
}

/// Summary of a fleet run
#[derive(Debug, Clone, Serialize)]
pub struct FleetReport {
    pub attempts: u64,
    pub found_by: Option<usize>,
    pub killed: bool,
    pub interrupted: bool,
    /// Time between the find and the coordinator noticing it
    pub found_observed_after_ms: Option<u64>,
    pub elapsed_ms: u64,
    pub instances: Vec<InstanceEnd>,
}

/// Fleet-level failures
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    /// An emulator did not launch; everything already started was stopped.
    #[error("instance {index} failed to launch: {source}")]
    Launch {
        index: usize,
        #[source]
        source: ProcessError,
    },

    /// The scratch ledger could not be initialized.
    #[error("failed to initialize ledger {}: {source}", path.display())]
    Ledger {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The operator interrupted startup.
    #[error("interrupted during startup")]
    Interrupted,
}

// ============================================================================
// Fleet
// ============================================================================

/// Coordinator for N independently running instances
pub struct Fleet {
    config: FleetConfig,
    instances: Vec<Orchestrator>,
    signals: Arc<FleetSignals>,
    interrupt: Arc<AtomicBool>,
    ledger: Option<PathBuf>,
}

impl Fleet {
    /// Build `config.fleet.instances` orchestrators, instance `i` on port
    /// `base_port + i`. Nothing is started yet.
    ///
    /// Fails if an instance's port falls outside the port range.
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        let instances = (0..config.fleet.instances)
            .map(|index| -> Result<Orchestrator, ConfigError> {
                Ok(Orchestrator::new(
                    index,
                    EmulatorProcess::from_config(&config.emulator),
                    ControlConnection::new(
                        config.connection.host.clone(),
                        config.fleet.port_for(index)?,
                        config.connection.clone(),
                    ),
                ))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_instances(config.fleet.clone(), instances)
            .with_ledger(config.runtime.ledger_path()))
    }

    /// Coordinate pre-built instances
    pub fn from_instances(config: FleetConfig, instances: Vec<Orchestrator>) -> Self {
        Self {
            config,
            instances,
            signals: Arc::new(FleetSignals::new()),
            interrupt: Arc::new(AtomicBool::new(false)),
            ledger: None,
        }
    }

    /// Flag that, once set, stops the fleet and force-kills stragglers
    /// after the grace period
    pub fn with_interrupt(mut self, interrupt: Arc<AtomicBool>) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Reset this scratch ledger in [`start_all`](Self::start_all)
    pub fn with_ledger(mut self, path: PathBuf) -> Self {
        self.ledger = Some(path);
        self
    }

    pub fn signals(&self) -> Arc<FleetSignals> {
        Arc::clone(&self.signals)
    }

    pub fn instances(&self) -> &[Orchestrator] {
        &self.instances
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    /// Launch every emulator, staggered, then wait for them to settle.
    ///
    /// A launch failure stops everything started so far and is returned;
    /// whether to retry or give up is the caller's decision.
    pub fn start_all(&mut self) -> Result<(), FleetError> {
        if let Some(path) = &self.ledger {
            ledger::initialize(path).map_err(|source| FleetError::Ledger {
                path: path.clone(),
                source,
            })?;
        }

        let mut failure = None;
        for (i, orch) in self.instances.iter_mut().enumerate() {
            if i > 0 {
                thread::sleep(self.config.stagger());
            }
            let port = orch.connection().port();
            match orch.perform_task(|emu, _| emu.start()) {
                Ok(pid) => tracing::info!(instance = i, pid, port, "Emulator started"),
                Err(source) => {
                    tracing::error!(instance = i, error = %source, "Emulator failed to launch");
                    failure = Some(FleetError::Launch { index: i, source });
                    break;
                }
            }
        }
        if let Some(err) = failure {
            self.exit_all();
            return Err(err);
        }

        if self.is_empty() {
            return Ok(());
        }

        tracing::info!(
            instances = self.len(),
            settle_ms = self.config.settle_ms,
            "All emulators launched, settling"
        );
        let deadline = Instant::now() + self.config.settle();
        while Instant::now() < deadline {
            if self.interrupted() {
                tracing::warn!("Interrupted while settling");
                self.exit_all();
                return Err(FleetError::Interrupted);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            thread::sleep(remaining.min(self.config.poll_interval()));
        }
        Ok(())
    }

    /// Run `task` on every instance in its own thread until one finds the
    /// target, one fails, or the interrupt flag is raised. Every instance is
    /// torn down before this returns.
    pub fn run<T: InstanceTask>(&mut self, task: &T) -> FleetReport {
        let started = Instant::now();
        let Fleet {
            config,
            instances,
            signals,
            interrupt,
            ..
        } = self;
        let signals: &FleetSignals = signals;
        let config: &FleetConfig = config;
        let killers: Vec<ProcessKiller> = instances.iter().map(Orchestrator::killer).collect();

        let mut found_observed_after = None;
        let mut interrupted = false;

        let ends: Vec<InstanceEnd> = thread::scope(|scope| {
            let handles: Vec<_> = instances
                .iter_mut()
                .map(|orch| {
                    let index = orch.index();
                    let spawned = thread::Builder::new()
                        .name(format!("instance-{}", index))
                        .spawn_scoped(scope, move || run_instance(orch, task, signals, config));
                    if let Err(e) = &spawned {
                        tracing::error!(instance = index, error = %e, "Failed to spawn instance thread");
                        signals.kill();
                    }
                    spawned.ok()
                })
                .collect();

            let mut kill_logged = false;
            let mut interrupted_at: Option<Instant> = None;
            let mut forced = false;

            while !handles.iter().flatten().all(|h| h.is_finished()) {
                if found_observed_after.is_none()
                    && let Some(at) = signals.found_at()
                {
                    found_observed_after = Some(at.elapsed());
                    tracing::info!(
                        instance = signals.finder(),
                        attempts = signals.attempts(),
                        "Target found, stopping fleet"
                    );
                }
                if !kill_logged && signals.is_killed() {
                    kill_logged = true;
                    tracing::warn!("Kill signal raised, stopping fleet");
                }
                if interrupted_at.is_none() && interrupt.load(Ordering::SeqCst) {
                    interrupted = true;
                    interrupted_at = Some(Instant::now());
                    tracing::warn!("Interrupted, stopping fleet");
                    signals.kill();
                }
                if !forced
                    && let Some(at) = interrupted_at
                    && at.elapsed() >= config.interrupt_grace()
                {
                    forced = true;
                    force_kill(&killers);
                }
                thread::sleep(config.poll_interval());
            }

            handles
                .into_iter()
                .map(|handle| match handle {
                    Some(h) => h.join().unwrap_or_else(|_| {
                        tracing::error!("Instance thread panicked");
                        signals.kill();
                        InstanceEnd::Crashed
                    }),
                    None => InstanceEnd::Crashed,
                })
                .collect()
        });

        if found_observed_after.is_none() {
            found_observed_after = signals.found_at().map(|at| at.elapsed());
        }

        self.exit_all();

        let report = FleetReport {
            attempts: self.signals.attempts(),
            found_by: self.signals.finder(),
            killed: self.signals.is_killed(),
            interrupted,
            found_observed_after_ms: found_observed_after.map(|d| d.as_millis() as u64),
            elapsed_ms: started.elapsed().as_millis() as u64,
            instances: ends,
        };
        tracing::info!(
            attempts = report.attempts,
            found_by = ?report.found_by,
            killed = report.killed,
            "Fleet finished"
        );
        report
    }

    /// Disconnect and stop every instance. Idempotent.
    pub fn exit_all(&mut self) {
        for orch in &mut self.instances {
            orch.exit();
        }
    }
}

impl Drop for Fleet {
    fn drop(&mut self) {
        self.exit_all();
    }
}

fn force_kill(killers: &[ProcessKiller]) {
    for (index, killer) in killers.iter().enumerate() {
        match killer.kill() {
            Ok(true) => tracing::warn!(instance = index, "Force-killed emulator"),
            Ok(false) => {}
            Err(e) => tracing::error!(instance = index, error = %e, "Force-kill failed"),
        }
    }
}

/// Connect, retrying on the fleet's schedule. The connection itself never
/// retries.
fn connect_with_retry(orch: &mut Orchestrator, config: &FleetConfig) -> Result<(), ConnectionError> {
    let attempts = config.connect_attempts.max(1);
    let mut attempt = 1;
    loop {
        match orch.perform_task(|_, conn| conn.connect()) {
            Ok(()) => return Ok(()),
            Err(e) if attempt < attempts => {
                tracing::debug!(attempt, error = %e, "Connect attempt failed, retrying");
                attempt += 1;
                thread::sleep(config.connect_retry());
            }
            Err(e) => return Err(e),
        }
    }
}

fn run_instance(
    orch: &mut Orchestrator,
    task: &dyn InstanceTask,
    signals: &FleetSignals,
    config: &FleetConfig,
) -> InstanceEnd {
    let index = orch.index();
    let span = tracing::info_span!("instance", index, port = orch.connection().port());
    let _enter = span.enter();

    let end = match connect_with_retry(orch, config) {
        Err(e) => {
            tracing::error!(instance = index, error = %e, "Instance could not connect, stopping the whole fleet");
            signals.kill();
            InstanceEnd::ConnectFailed
        }
        Ok(()) => cycle_until_stopped(orch, task, signals),
    };

    orch.exit();
    end
}

fn cycle_until_stopped(
    orch: &mut Orchestrator,
    task: &dyn InstanceTask,
    signals: &FleetSignals,
) -> InstanceEnd {
    let index = orch.index();
    loop {
        if signals.should_stop() {
            return InstanceEnd::Stopped;
        }
        if !orch.is_healthy() {
            tracing::error!(
                instance = index,
                "Instance is unhealthy, shared timing assumptions no longer hold; stopping the whole fleet"
            );
            signals.kill();
            return InstanceEnd::Unhealthy;
        }

        let attempt = signals.next_attempt();
        tracing::debug!(attempt, "Cycle");

        let outcome = orch.perform_task(|process, connection| {
            let mut cx = CycleContext {
                index,
                attempt,
                process,
                connection,
                signals,
            };
            task.run_cycle(&mut cx)
        });

        match outcome {
            Ok(CycleOutcome::Continue) => {}
            Ok(CycleOutcome::Found) => return record_find(signals, index, attempt),
            Err(e) => {
                tracing::error!(instance = index, error = %format!("{:#}", e), "Cycle failed, stopping the whole fleet");
                signals.kill();
                return InstanceEnd::Failed;
            }
        }
    }
}

/// Claim the find for `index`. Only the first claimant ends as `Found`;
/// a later one is reported as stopped so the report names a single finder.
fn record_find(signals: &FleetSignals, index: usize, attempt: u64) -> InstanceEnd {
    if signals.mark_found(index) {
        tracing::info!(instance = index, attempt, "Target found");
        InstanceEnd::Found
    } else {
        tracing::debug!(
            instance = index,
            attempt,
            finder = ?signals.finder(),
            "Target also found, another instance was first"
        );
        InstanceEnd::Stopped
    }
}

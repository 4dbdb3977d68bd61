//! Data-driven automation routines
//!
//! A routine is a TOML file of ordered steps plus an optional pixel check:
//!
//! ```toml
//! step_delay_ms = 700
//!
//! [[step]]
//! action = "press"
//! key = "a"
//!
//! [[step]]
//! action = "jitter"
//! max_ms = 1000
//!
//! [check]
//! x = 120
//! y = 48
//! color = "#f8d030"
//! found_when = "matches"
//! ```
//!
//! [`RoutineTask`] runs one pass of the steps per fleet cycle, screenshots,
//! and probes the pixel to decide whether the target was found.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::{Config, TimingConfig};
use crate::connection::{ConnectionError, ControlConnection, is_valid_filename};
use crate::fleet::{CycleContext, CycleOutcome, InstanceTask};
use crate::input::{KeyEvent, KeyType};
use crate::probe;

/// One routine step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Tap a key; `ms` overrides the configured push time
    Press {
        key: KeyType,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ms: Option<u64>,
    },
    Hold {
        key: KeyType,
    },
    Release {
        key: KeyType,
    },
    Wait {
        ms: u64,
    },
    /// Uniform random wait in `0..=max_ms`
    Jitter {
        max_ms: u64,
    },
    /// Wait `instance index * ms_per_instance` so instances drift apart
    Offset {
        ms_per_instance: u64,
    },
    Reset,
    /// Defaults to `<instance>.png`
    Screenshot {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file: Option<String>,
    },
}

/// When a probed pixel counts as a find
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoundWhen {
    #[default]
    Matches,
    Differs,
}

/// Pixel test run after the steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Check {
    pub x: u32,
    pub y: u32,
    /// `#rrggbb`, any case
    pub color: String,
    #[serde(default)]
    pub found_when: FoundWhen,
}

impl Check {
    /// Whether a probed `#rrggbb` value counts as a find
    pub fn is_found(&self, probed: &str) -> bool {
        let matches = probe::normalize_hex(probed) == probe::normalize_hex(&self.color);
        match self.found_when {
            FoundWhen::Matches => matches,
            FoundWhen::Differs => !matches,
        }
    }
}

/// Parsed routine file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Routine {
    /// Pause after every key step
    #[serde(default)]
    pub step_delay_ms: u64,

    #[serde(default, rename = "step")]
    pub steps: Vec<Step>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<Check>,
}

#[derive(Debug, thiserror::Error)]
pub enum RoutineError {
    #[error("failed to read routine {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse routine {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid routine: {0}")]
    Invalid(String),
}

impl Routine {
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn load(path: &Path) -> Result<Self, RoutineError> {
        let content = std::fs::read_to_string(path).map_err(|source| RoutineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let routine = Self::from_toml(&content).map_err(|source| RoutineError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        routine.validate()?;
        Ok(routine)
    }

    pub fn validate(&self) -> Result<(), RoutineError> {
        if self.steps.is_empty() && self.check.is_none() {
            return Err(RoutineError::Invalid(
                "routine has no steps and no check".to_string(),
            ));
        }
        for step in &self.steps {
            if let Step::Screenshot { file: Some(file) } = step {
                if !is_valid_filename(file) {
                    return Err(RoutineError::Invalid(format!(
                        "screenshot file {:?} contains a line break",
                        file
                    )));
                }
            }
        }
        if let Some(check) = &self.check {
            let hex = check.color.trim().trim_start_matches('#');
            if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(RoutineError::Invalid(format!(
                    "check color {:?} is not #rrggbb",
                    check.color
                )));
            }
        }
        Ok(())
    }

    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }
}

/// Runs a [`Routine`] as a fleet task
#[derive(Debug, Clone)]
pub struct RoutineTask {
    routine: Routine,
    temp_dir: PathBuf,
    default_push: Duration,
    timings: TimingConfig,
}

impl RoutineTask {
    pub fn new(
        routine: Routine,
        temp_dir: impl Into<PathBuf>,
        default_push: Duration,
        timings: TimingConfig,
    ) -> Self {
        Self {
            routine,
            temp_dir: temp_dir.into(),
            default_push,
            timings,
        }
    }

    pub fn from_config(routine: Routine, config: &Config) -> Self {
        Self::new(
            routine,
            &config.runtime.temp_dir,
            config.input.default_push_time(),
            config.timings.clone(),
        )
    }

    pub fn routine(&self) -> &Routine {
        &self.routine
    }

    fn run_step(
        &self,
        step: &Step,
        index: usize,
        conn: &mut ControlConnection,
    ) -> Result<(), ConnectionError> {
        match step {
            Step::Press { key, ms } => {
                let duration = ms.map(Duration::from_millis).unwrap_or(self.default_push);
                self.key_step(conn, KeyEvent::push_for(*key, duration))?;
            }
            Step::Hold { key } => self.key_step(conn, KeyEvent::hold(*key))?,
            Step::Release { key } => self.key_step(conn, KeyEvent::release(*key))?,
            Step::Wait { ms } => thread::sleep(Duration::from_millis(*ms)),
            Step::Jitter { max_ms } => {
                let ms = rand::rng().random_range(0..=*max_ms);
                thread::sleep(Duration::from_millis(ms));
            }
            Step::Offset { ms_per_instance } => {
                thread::sleep(Duration::from_millis(ms_per_instance * index as u64));
            }
            Step::Reset => conn.reset(self.timings.reset_settle())?,
            Step::Screenshot { file } => {
                let file = file.clone().unwrap_or_else(|| screenshot_name(index));
                conn.save_screenshot(&file, self.timings.screenshot_settle())?;
            }
        }
        Ok(())
    }

    fn key_step(&self, conn: &mut ControlConnection, event: KeyEvent) -> Result<(), ConnectionError> {
        conn.execute(event)?;
        if self.routine.step_delay_ms > 0 {
            thread::sleep(self.routine.step_delay());
        }
        Ok(())
    }
}

fn screenshot_name(index: usize) -> String {
    format!("{}.png", index)
}

/// Name of the screenshot kept when a target is found
pub fn found_screenshot_name(attempt: u64) -> String {
    format!("found-at-attempt-{}.png", attempt)
}

impl InstanceTask for RoutineTask {
    fn run_cycle(&self, cx: &mut CycleContext<'_>) -> anyhow::Result<CycleOutcome> {
        for step in &self.routine.steps {
            if cx.signals.should_stop() {
                return Ok(CycleOutcome::Continue);
            }
            self.run_step(step, cx.index, cx.connection)?;
        }

        let Some(check) = &self.routine.check else {
            return Ok(CycleOutcome::Continue);
        };

        let file = screenshot_name(cx.index);
        cx.connection
            .save_screenshot(&file, self.timings.screenshot_settle())?;
        let probed = probe::pixel_hex(&self.temp_dir.join(&file), check.x, check.y)?;
        tracing::debug!(attempt = cx.attempt, %probed, "Pixel probed");

        if !check.is_found(&probed) {
            return Ok(CycleOutcome::Continue);
        }

        cx.connection.save_screenshot(
            &found_screenshot_name(cx.attempt),
            self.timings.screenshot_settle(),
        )?;
        Ok(CycleOutcome::Found)
    }
}

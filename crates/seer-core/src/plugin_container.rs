//! Scheduling wrapper around one plugin instance.
//!
//! A [`PluginContainer`] owns a plugin and drives it through the
//! [`BackgroundTask`] state machine:
//!
//! ```text
//!   IDLE --dispatch--> RUNNING --process returns--> DONE --harvest--> IDLE
//! ```
//!
//! The core loop dispatches a container when it is idle and its period has
//! elapsed, and harvests it once it is done. A container whose plugin never
//! returns stays `Running` and is skipped by every later harvest.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::error::Result;
use crate::plugin::{Plugin, PluginContext};
use crate::update_request::UpdateRequest;
use crate::worker::{BackgroundTask, TaskOutcome, TaskState};
use crate::world_model::WorldModel;

/// Counters describing a container's history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContainerStats {
    /// Executions started.
    pub dispatches: u64,
    /// Executions that returned a request.
    pub completed: u64,
    /// Executions that panicked.
    pub panics: u64,
}

/// Owns one plugin and schedules its executions.
pub struct PluginContainer {
    name: String,
    plugin: Arc<Mutex<Box<dyn Plugin>>>,
    task: BackgroundTask<UpdateRequest>,
    period: f64,
    last_dispatch: Option<f64>,
    stats: ContainerStats,
    last_error: Option<String>,
}

impl PluginContainer {
    /// Wraps a configured plugin.
    ///
    /// `frequency` is in Hz; a non-positive or non-finite frequency means the
    /// plugin is due on every cycle in which it is idle.
    #[must_use]
    pub fn new(name: impl Into<String>, plugin: Box<dyn Plugin>, frequency: f64) -> Self {
        let name = name.into();
        let period = if frequency.is_finite() && frequency > 0.0 {
            frequency.recip()
        } else {
            0.0
        };
        Self {
            task: BackgroundTask::new(format!("plugin-{name}")),
            name,
            plugin: Arc::new(Mutex::new(plugin)),
            period,
            last_dispatch: None,
            stats: ContainerStats::default(),
            last_error: None,
        }
    }

    /// Instance name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Minimum time between dispatches in seconds.
    #[must_use]
    pub fn period(&self) -> f64 {
        self.period
    }

    /// Current scheduling state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.task.state()
    }

    /// Execution counters.
    #[must_use]
    pub fn stats(&self) -> ContainerStats {
        self.stats
    }

    /// Panic message of the most recent failed execution, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Returns true if the container is idle and its period has elapsed.
    #[must_use]
    pub fn is_due(&self, now: f64) -> bool {
        self.task.state() == TaskState::Idle
            && self.last_dispatch.map_or(true, |last| now - last >= self.period)
    }

    /// Starts the plugin on `world` if the container is due.
    ///
    /// Returns whether an execution was started.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the execution thread could not be spawned.
    pub fn dispatch(&mut self, world: &Arc<WorldModel>, now: f64) -> Result<bool> {
        if !self.is_due(now) {
            return Ok(false);
        }

        let plugin = Arc::clone(&self.plugin);
        let world = Arc::clone(world);
        let started = self.task.start(move |cancel| {
            let ctx = PluginContext {
                cycle: world.cycle(),
                time: world.time(),
                cancel: cancel.clone(),
            };
            let mut request = UpdateRequest::new();
            let mut plugin = plugin.lock().unwrap_or_else(PoisonError::into_inner);
            plugin.process(&ctx, &world, &mut request);
            request
        })?;

        if started {
            self.last_dispatch = Some(now);
            self.stats.dispatches += 1;
            tracing::trace!(plugin = %self.name, now, "dispatched");
        }
        Ok(started)
    }

    /// Checks for completion and returns the new state.
    pub fn poll(&mut self) -> TaskState {
        self.task.poll()
    }

    /// Takes the request of a finished execution and resets to idle.
    ///
    /// Returns `None` while running, when idle, or if the execution panicked;
    /// a panicking execution's partial request is discarded.
    pub fn harvest(&mut self) -> Option<UpdateRequest> {
        if self.task.poll() != TaskState::Done {
            return None;
        }
        match self.task.take()? {
            TaskOutcome::Completed(request) => {
                self.stats.completed += 1;
                self.last_error = None;
                Some(request)
            }
            TaskOutcome::Panicked(message) => {
                self.stats.panics += 1;
                tracing::warn!(plugin = %self.name, %message, "plugin panicked; request discarded");
                self.last_error = Some(message);
                None
            }
        }
    }

    /// Cancels a running execution and waits up to `timeout` for it.
    ///
    /// Returns false if the execution had to be abandoned.
    pub fn shutdown(&mut self, timeout: Duration) -> bool {
        self.task.shutdown(timeout)
    }
}

impl std::fmt::Debug for PluginContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContainer")
            .field("name", &self.name)
            .field("state", &self.task.state())
            .field("period", &self.period)
            .field("stats", &self.stats)
            .field("last_error", &self.last_error)
            .finish_non_exhaustive()
    }
}

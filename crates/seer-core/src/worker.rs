//! Background execution primitive shared by plugin containers and the
//! perception stage.
//!
//! A [`BackgroundTask`] runs one closure at a time on a named OS thread and
//! walks the state machine `Idle -> Running -> Done -> Idle`:
//!
//! - [`BackgroundTask::start`] moves `Idle` to `Running`.
//! - [`BackgroundTask::poll`] notices a finished closure and moves to `Done`.
//! - [`BackgroundTask::take`] hands the outcome back and resets to `Idle`.
//!
//! The closure runs inside `catch_unwind`; a panic becomes
//! [`TaskOutcome::Panicked`] instead of tearing down the core loop. Results
//! travel over a one-slot `crossbeam-channel`, so the owner never blocks
//! except in [`BackgroundTask::shutdown`], which waits a bounded time and
//! then detaches the thread.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, TryRecvError};

// =============================================================================
// Cancellation
// =============================================================================

/// Cooperative cancellation flag shared between owner and worker.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates an unset token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns true once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

// =============================================================================
// Task State
// =============================================================================

/// Scheduling state of a [`BackgroundTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Nothing running; ready to start.
    Idle,
    /// A closure is executing.
    Running,
    /// The closure finished; its outcome waits to be taken.
    Done,
}

/// How a background closure ended.
#[derive(Debug)]
pub enum TaskOutcome<T> {
    /// The closure returned normally.
    Completed(T),
    /// The closure panicked; holds the panic message.
    Panicked(String),
}

impl<T> TaskOutcome<T> {
    /// Returns the value if the closure completed.
    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Panicked(_) => None,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// =============================================================================
// Background Task
// =============================================================================

/// Runs closures one at a time on a background thread.
pub struct BackgroundTask<T> {
    name: String,
    state: TaskState,
    cancel: CancelToken,
    receiver: Option<Receiver<TaskOutcome<T>>>,
    handle: Option<JoinHandle<()>>,
    outcome: Option<TaskOutcome<T>>,
}

impl<T: Send + 'static> BackgroundTask<T> {
    /// Creates an idle task. `name` becomes the thread name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: TaskState::Idle,
            cancel: CancelToken::new(),
            receiver: None,
            handle: None,
            outcome: None,
        }
    }

    /// Thread name used for executions.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, without checking for completion.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Starts `f` on a new thread with a fresh cancellation token.
    ///
    /// Returns `Ok(false)` without starting anything unless the task is idle.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the thread could not be spawned; the task
    /// stays idle.
    pub fn start<F>(&mut self, f: F) -> std::io::Result<bool>
    where
        F: FnOnce(&CancelToken) -> T + Send + 'static,
    {
        if self.state != TaskState::Idle {
            return Ok(false);
        }

        let cancel = CancelToken::new();
        let worker_cancel = cancel.clone();
        let (sender, receiver) = bounded(1);

        let handle = thread::Builder::new().name(self.name.clone()).spawn(move || {
            let outcome = match panic::catch_unwind(AssertUnwindSafe(|| f(&worker_cancel))) {
                Ok(value) => TaskOutcome::Completed(value),
                Err(payload) => TaskOutcome::Panicked(panic_message(payload.as_ref())),
            };
            // The owner may have detached; nobody left to tell.
            let _ = sender.send(outcome);
        })?;

        self.cancel = cancel;
        self.receiver = Some(receiver);
        self.handle = Some(handle);
        self.state = TaskState::Running;
        Ok(true)
    }

    /// Checks a running task for completion and returns the new state.
    pub fn poll(&mut self) -> TaskState {
        if self.state != TaskState::Running {
            return self.state;
        }
        let Some(receiver) = &self.receiver else {
            return self.state;
        };

        match receiver.try_recv() {
            Ok(outcome) => self.finish(outcome),
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => {
                self.finish(TaskOutcome::Panicked("worker exited without a result".to_string()));
            }
        }
        self.state
    }

    /// Takes the outcome of a finished task and resets it to idle.
    pub fn take(&mut self) -> Option<TaskOutcome<T>> {
        if self.state != TaskState::Done {
            return None;
        }
        self.state = TaskState::Idle;
        self.outcome.take()
    }

    /// Requests cancellation of the running closure.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancels and waits up to `timeout` for the closure to return.
    ///
    /// Returns false if the closure was still running at the deadline, in
    /// which case its thread is detached and its result will be dropped.
    pub fn shutdown(&mut self, timeout: Duration) -> bool {
        self.cancel();
        if self.state != TaskState::Running {
            return true;
        }
        let Some(receiver) = &self.receiver else {
            return true;
        };

        match receiver.recv_timeout(timeout) {
            Ok(outcome) => {
                self.finish(outcome);
                true
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.finish(TaskOutcome::Panicked("worker exited without a result".to_string()));
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::error!(task = %self.name, ?timeout, "execution did not stop in time; detaching");
                self.handle = None;
                self.receiver = None;
                self.state = TaskState::Idle;
                false
            }
        }
    }

    fn finish(&mut self, outcome: TaskOutcome<T>) {
        if let Some(handle) = self.handle.take() {
            // The result has been sent, so the thread is already exiting.
            let _ = handle.join();
        }
        self.receiver = None;
        self.outcome = Some(outcome);
        self.state = TaskState::Done;
    }
}

impl<T> Drop for BackgroundTask<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl<T> std::fmt::Debug for BackgroundTask<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundTask")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

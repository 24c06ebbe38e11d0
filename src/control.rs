//! Cooperative run control shared between a driver loop and its controllers.
//!
//! A [`RunControl`] is a cheap, cloneable handle. Any clone may pause, resume
//! or stop the run; the driver blocks on [`RunControl::wait_until_runnable`]
//! between chunks, never in the middle of one.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

// ─────────────────────────────────────────────────────────────────────────────
// Run State
// ─────────────────────────────────────────────────────────────────────────────

/// Run-level state. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Paused,
    Stopped,
}

// ─────────────────────────────────────────────────────────────────────────────
// Run Control
// ─────────────────────────────────────────────────────────────────────────────

/// Shared pause/resume/stop handle.
#[derive(Debug, Clone)]
pub struct RunControl {
    state: Arc<watch::Sender<RunState>>,
    cancel: CancellationToken,
}

impl RunControl {
    /// Creates a control in the `Running` state.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(RunState::Running);
        Self {
            state: Arc::new(tx),
            cancel: CancellationToken::new(),
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Pauses a running run. Returns true if the state changed.
    pub fn pause(&self) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if *state == RunState::Running {
                *state = RunState::Paused;
                true
            } else {
                false
            }
        });
        if changed {
            info!("[CONTROL] Run paused");
        }
        changed
    }

    /// Resumes a paused run. A no-op unless currently paused.
    pub fn resume(&self) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if *state == RunState::Paused {
                *state = RunState::Running;
                true
            } else {
                false
            }
        });
        if changed {
            info!("[CONTROL] Run resumed");
        }
        changed
    }

    /// Stops the run for good and fires the cancellation token.
    pub fn stop(&self) {
        let changed = self.state.send_if_modified(|state| {
            if *state != RunState::Stopped {
                *state = RunState::Stopped;
                true
            } else {
                false
            }
        });
        self.cancel.cancel();
        if changed {
            info!("[CONTROL] Run stopped");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.state() == RunState::Paused
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == RunState::Stopped
    }

    /// Token cancelled when the run is stopped.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Blocks while paused. Returns `Running` or `Stopped`.
    pub async fn wait_until_runnable(&self) -> RunState {
        let mut rx = self.state.subscribe();
        let state = match rx.wait_for(|state| *state != RunState::Paused).await {
            Ok(state) => *state,
            // The sender lives as long as `self`, so this is unreachable in practice.
            Err(_) => RunState::Stopped,
        };
        state
    }
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

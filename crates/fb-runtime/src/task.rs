use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use fb_core::error::{ExecError, ExecResult};

use crate::task_manager::TaskManager;

/// Process-unique, monotonically assigned task identifier.
pub type TaskId = u64;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------------------
// TaskState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Created, not yet handed to a task manager.
    Idle,
    /// Start was requested but rejected; terminal.
    FalseStart,
    /// Accepted by a task manager, waiting for a worker slot.
    Starting,
    /// Executing on a worker.
    Running,
    /// Cancel requested; the only exit is `Finished`.
    Cancelling,
    /// Absorbed by a master task; finished by the master's broadcast.
    Merged,
    /// Terminal.
    Finished,
}

// ---------------------------------------------------------------------------
// TaskCore
// ---------------------------------------------------------------------------

/// Shared machinery of every runnable task: identity, state machine,
/// progress, cancel event, timestamps and the lifecycle-done signal.
///
/// The master / slave merge relation lives one level up, in
/// [`ModuleTask`](crate::module_task::ModuleTask); this type only enforces
/// the per-task transition rules.
pub struct TaskCore {
    id: TaskId,
    name: String,
    state: Mutex<TaskState>,
    progress: Mutex<f32>,
    cancel: CancellationToken,
    owner: OnceLock<Arc<TaskManager>>,
    created_at: Instant,
    begun_at: Mutex<Option<Instant>>,
    ended_at: Mutex<Option<Instant>>,
    done_tx: watch::Sender<bool>,
}

impl TaskCore {
    pub fn new(name: String) -> Self {
        Self::named(|_| name)
    }

    /// Build a core whose name may embed the freshly assigned id.
    pub fn named(name: impl FnOnce(TaskId) -> String) -> Self {
        let id = NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed);
        let (done_tx, _) = watch::channel(false);
        Self {
            id,
            name: name(id),
            state: Mutex::new(TaskState::Idle),
            progress: Mutex::new(0.0),
            cancel: CancellationToken::new(),
            owner: OnceLock::new(),
            created_at: Instant::now(),
            begun_at: Mutex::new(None),
            ended_at: Mutex::new(None),
            done_tx,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> TaskState {
        *self.state.lock().expect("task state lock poisoned")
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn begun_at(&self) -> Option<Instant> {
        *self.begun_at.lock().expect("task time lock poisoned")
    }

    pub fn ended_at(&self) -> Option<Instant> {
        *self.ended_at.lock().expect("task time lock poisoned")
    }

    pub(crate) fn mark_begun(&self) {
        *self.begun_at.lock().expect("task time lock poisoned") = Some(Instant::now());
    }

    pub(crate) fn mark_ended(&self) {
        *self.ended_at.lock().expect("task time lock poisoned") = Some(Instant::now());
    }

    pub(crate) fn bind_owner(&self, owner: &Arc<TaskManager>) {
        let _ = self.owner.set(Arc::clone(owner));
    }

    pub(crate) fn owner(&self) -> Option<Arc<TaskManager>> {
        self.owner.get().cloned()
    }

    /// Drive the state machine.
    ///
    /// Rules:
    /// - out of `Cancelling`, only `Finished` is reachable (a repeated
    ///   cancel is a no-op so cancellation stays idempotent);
    /// - out of `Merged`, only `Finished` is reachable;
    /// - `Starting` requires `Idle`, `Running` requires `Starting`,
    ///   `Merged` requires `Idle` or `Starting`;
    /// - terminal states swallow cancel requests.
    pub fn transition(&self, to: TaskState) -> ExecResult<()> {
        let mut state = self.state.lock().expect("task state lock poisoned");

        if to != TaskState::Finished {
            match *state {
                TaskState::Cancelling => {
                    if to == TaskState::Cancelling {
                        return Ok(());
                    }
                    return Err(ExecError::Cancelled);
                }
                TaskState::Merged => return Err(ExecError::Merged),
                TaskState::Finished | TaskState::FalseStart => {
                    if to == TaskState::Cancelling {
                        return Ok(());
                    }
                    return Err(ExecError::Scheduling(format!(
                        "task {} is terminal, can not move to {to:?}",
                        self.name
                    )));
                }
                _ => {}
            }
        }

        match to {
            TaskState::Starting => {
                if *state != TaskState::Idle {
                    return Err(ExecError::Scheduling(format!(
                        "trying to start task {} that is not idle",
                        self.name
                    )));
                }
            }
            TaskState::Running => {
                if *state != TaskState::Starting {
                    return Err(ExecError::Scheduling(format!(
                        "trying to run task {} that is not started",
                        self.name
                    )));
                }
            }
            TaskState::Merged => {
                if !matches!(*state, TaskState::Idle | TaskState::Starting) {
                    return Err(ExecError::Scheduling(format!(
                        "trying to merge task {} that is neither idle nor starting",
                        self.name
                    )));
                }
            }
            _ => {}
        }

        *state = to;
        drop(state);

        if matches!(to, TaskState::Finished) {
            let _ = self.done_tx.send(true);
        }
        Ok(())
    }

    /// Unconditionally close the task. Used by the master's finished
    /// broadcast and by queue purges, where the regular rules do not apply.
    pub(crate) fn force_finished(&self) {
        *self.state.lock().expect("task state lock poisoned") = TaskState::Finished;
        let _ = self.done_tx.send(true);
    }

    /// Terminal failure-to-start.
    pub(crate) fn mark_false_start(&self) {
        *self.state.lock().expect("task state lock poisoned") = TaskState::FalseStart;
        let _ = self.done_tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == TaskState::Cancelling
    }

    /// Block for the given amount of time; return `true` iff the cancel
    /// event fired during (or before) the wait.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => true,
            _ = tokio::time::sleep(duration) => self.is_cancelled(),
        }
    }

    /// Yield to other tasks; return `true` iff cancellation was requested.
    pub async fn yield_now(&self) -> bool {
        tokio::task::yield_now().await;
        self.is_cancelled() || self.cancel.is_cancelled()
    }

    pub fn progress(&self) -> f32 {
        *self.progress.lock().expect("task progress lock poisoned")
    }

    /// Store the progress, clamped to [0, 1]. Returns `true` when the
    /// stored value changed (the caller decides whether to notify).
    pub(crate) fn store_progress(&self, progress: f32) -> bool {
        let clamped = progress.clamp(0.0, 1.0);
        let mut current = self.progress.lock().expect("task progress lock poisoned");
        if (*current - clamped).abs() > f32::EPSILON {
            *current = clamped;
            true
        } else {
            false
        }
    }

    /// Resolve once the task has reached a terminal state.
    pub async fn wait_done(&self) {
        let mut rx = self.done_tx.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

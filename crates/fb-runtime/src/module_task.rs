use std::sync::{Arc, Mutex, RwLock, Weak};

use fb_core::error::{ExecError, ExecResult};

use crate::module::Module;
use crate::task::{TaskCore, TaskId, TaskState};
use crate::task_manager::TaskManager;

// ---------------------------------------------------------------------------
// RunningState
// ---------------------------------------------------------------------------

/// Sub-state of a running module task, sampled by diagnostics and by the
/// watchdog report when a frozen graph is dumped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunningState {
    /// Not running yet (queued or waiting for a worker slot).
    NotAvailable,
    /// Acquiring the module's processing slot, checking the start condition.
    Starting,
    /// Catching input ports, waiting for parameters.
    Retrieving,
    /// Inside the module's process hook.
    Processing,
    /// The run is over; the task is flushing and releasing.
    NotApplicable,
}

// ---------------------------------------------------------------------------
// ModuleTask
// ---------------------------------------------------------------------------

struct MergeLinks {
    /// Back-reference; weak so a slave never keeps a finished master alive.
    master: Option<Weak<ModuleTask>>,
    slaves: Vec<Arc<ModuleTask>>,
}

/// A task bound to one [`Module`]; its body is that module's process hook.
///
/// Module tasks can be *merged*: a task that is still `Idle` or `Starting`
/// may be absorbed as a slave of an equivalent task (the master), so that
/// one execution satisfies both requesters. A slave never runs its body;
/// the master forces it to `Finished` when it finishes itself. Only the
/// master emits progress / fail / cancel notifications.
pub struct ModuleTask {
    core: TaskCore,
    module: Arc<Module>,
    trigger: Option<usize>,
    running_state: Mutex<RunningState>,
    merge: RwLock<MergeLinks>,
}

impl ModuleTask {
    pub(crate) fn new(module: &Arc<Module>, trigger: Option<usize>) -> Arc<Self> {
        let core = TaskCore::named(|id| match trigger {
            Some(idx) => format!(
                "{}:{}#{id}",
                module.name(),
                module.in_port_name(idx).unwrap_or("?")
            ),
            None => format!("{}#{id}", module.name()),
        });
        Arc::new(Self {
            core,
            module: Arc::clone(module),
            trigger,
            running_state: Mutex::new(RunningState::NotAvailable),
            merge: RwLock::new(MergeLinks {
                master: None,
                slaves: Vec::new(),
            }),
        })
    }

    pub fn id(&self) -> TaskId {
        self.core.id()
    }

    pub fn name(&self) -> &str {
        self.core.name()
    }

    pub fn state(&self) -> TaskState {
        self.core.state()
    }

    pub fn module(&self) -> &Arc<Module> {
        &self.module
    }

    /// Index of the in-port whose data readiness created this task, if any.
    pub fn trigger(&self) -> Option<usize> {
        self.trigger
    }

    pub(crate) fn core(&self) -> &TaskCore {
        &self.core
    }

    pub fn running_state(&self) -> RunningState {
        *self
            .running_state
            .lock()
            .expect("running state lock poisoned")
    }

    pub(crate) fn set_running_state(&self, state: RunningState) {
        *self
            .running_state
            .lock()
            .expect("running state lock poisoned") = state;
    }

    fn master(&self) -> Option<Arc<ModuleTask>> {
        self.merge
            .read()
            .expect("merge lock poisoned")
            .master
            .as_ref()
            .and_then(Weak::upgrade)
    }

    pub fn is_slave(&self) -> bool {
        self.merge
            .read()
            .expect("merge lock poisoned")
            .master
            .is_some()
    }

    /// Observable progress; a slave reports its master's progress.
    pub fn progress(&self) -> f32 {
        match self.master() {
            Some(master) => master.progress(),
            None => self.core.progress(),
        }
    }

    /// Update the progress and notify the owning task manager (coalesced
    /// there at 100 ms granularity).
    pub fn set_progress(&self, progress: f32) {
        if self.core.store_progress(progress) {
            if let Some(owner) = self.core.owner() {
                owner.task_progress(self, self.core.progress());
            }
        }
    }

    /// Request cancellation.
    ///
    /// A slave delegates to its master. Otherwise the request escalates to
    /// the owning module, which cancels its whole task set and fans out to
    /// its neighbours through the dispatcher.
    pub fn cancel(self: &Arc<Self>) {
        if let Some(master) = self.master() {
            master.cancel();
            return;
        }
        self.cancel_direct();
        self.module.immediate_cancel();
    }

    /// Task-level cancellation only: state, cancel event, owner
    /// notification. Idempotent.
    pub(crate) fn cancel_direct(&self) {
        if self.core.cancel_token().is_cancelled() {
            return;
        }
        let _ = self.core.transition(TaskState::Cancelling);
        self.core.cancel_token().cancel();
        if let Some(owner) = self.core.owner() {
            owner.task_cancelled(self);
        }
    }

    /// Absorb `slave` into this task. Fails unless the slave is still
    /// `Idle` or `Starting`.
    pub(crate) fn merge(self: &Arc<Self>, slave: &Arc<ModuleTask>) -> ExecResult<()> {
        {
            let mut links = self.merge.write().expect("merge lock poisoned");
            slave.core.transition(TaskState::Merged)?;
            *slave.merge.write().expect("merge lock poisoned") = MergeLinks {
                master: Some(Arc::downgrade(self)),
                slaves: Vec::new(),
            };
            links.slaves.push(Arc::clone(slave));
        }
        if let Some(owner) = self.core.owner() {
            owner.task_enslaved(self, slave);
        }
        fb_log!(debug, task, master = %self.name(), slave = %slave.name(), "task merged");
        Ok(())
    }

    /// Force this task and every slave into `Finished` and post the
    /// corresponding notifications. The slave set is cleared so slaves can
    /// be collected.
    fn finish_broadcast(&self, owner: Option<&Arc<TaskManager>>) {
        self.core.force_finished();
        if let Some(tm) = owner {
            tm.task_finished(self);
        }

        let slaves = {
            let mut links = self.merge.write().expect("merge lock poisoned");
            std::mem::take(&mut links.slaves)
        };
        for slave in slaves {
            slave.core.force_finished();
            if let Some(tm) = slave.core.owner() {
                tm.task_finished(&slave);
            }
        }
    }

    /// Close a task that will never run (queue purge, start failure).
    pub(crate) fn force_finish(&self) {
        self.finish_broadcast(self.core.owner().as_ref());
    }

    /// Release the data held by the triggering in-port when the task dies
    /// before catching it.
    pub(crate) fn release_trigger_input(&self) {
        if let Some(idx) = self.trigger {
            self.module.release_in_port_on_failure(idx);
        }
    }

    /// Resolve once the task has reached a terminal state.
    pub(crate) async fn wait_done(&self) {
        self.core.wait_done().await;
    }

    /// Task body, invoked by a worker (or inline for a synchronous start).
    ///
    /// Exceptions never escape this boundary: a `Merged` outcome aborts
    /// silently (the master finishes this task on its behalf), a
    /// `Cancelled` outcome is reported as a non-fatal
    /// failed-on-cancellation, anything else as a task failure.
    pub(crate) async fn run(self: Arc<Self>) {
        // A slave's lifecycle is owned by its master, and a purged task
        // was already closed by its module; neither runs a body.
        if self.is_slave()
            || matches!(
                self.state(),
                TaskState::Finished | TaskState::FalseStart
            )
        {
            return;
        }

        let owner = self.core.owner();
        if let Some(tm) = &owner {
            tm.task_started(&self);
        }
        self.core.mark_begun();

        let result = Arc::clone(&self.module).execute(&self).await;

        self.core.mark_ended();
        match result {
            Ok(()) => {}
            Err(ExecError::Merged) => {
                fb_log!(debug, task, task = %self.name(), "absorbed by a master during preparation");
                return;
            }
            Err(ExecError::Cancelled) => {
                if let Some(tm) = &owner {
                    tm.task_failed_on_cancellation(&self, ExecError::Cancelled);
                }
            }
            Err(error) => {
                fb_log!(error, task, task = %self.name(), error = %error, "task failed");
                if let Some(tm) = &owner {
                    tm.task_failed(&self, error);
                }
            }
        }

        self.finish_broadcast(owner.as_ref());
    }
}

impl std::fmt::Debug for ModuleTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleTask")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

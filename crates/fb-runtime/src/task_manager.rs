use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{Semaphore, broadcast};

use fb_core::error::{ExecError, ExecResult};

use crate::module_task::ModuleTask;
use crate::task::{TaskId, TaskState};

/// Progress notifications for one manager are coalesced at this granularity.
const MIN_PROGRESS_NOTIFICATION_INTERVAL: Duration = Duration::from_millis(100);

/// Capacity of the lifecycle event channel. A lagging observer drops the
/// oldest events rather than blocking task execution.
const EVENT_CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// TaskEvent
// ---------------------------------------------------------------------------

/// Lifecycle notifications posted by the [`TaskManager`].
///
/// Events are emitted after the manager's own bookkeeping is visible:
/// `Finished` in particular is sent only after the task has left the live
/// list, so observers always see a consistent count.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    Started { id: TaskId, name: String },
    Progress { id: TaskId, progress: f32 },
    Cancelled { id: TaskId },
    Enslaved { master: TaskId, slave: TaskId },
    Finished { id: TaskId },
    Failed { id: TaskId, error: Arc<ExecError> },
    FailedOnCancellation { id: TaskId, error: Arc<ExecError> },
}

// ---------------------------------------------------------------------------
// TaskManager
// ---------------------------------------------------------------------------

/// Owns the live task list, starts tasks on the worker pool and posts
/// lifecycle notifications to subscribers.
pub struct TaskManager {
    tasks: Mutex<Vec<Arc<ModuleTask>>>,
    events: broadcast::Sender<TaskEvent>,
    pool: Arc<Semaphore>,
    last_progress: Mutex<Option<Instant>>,
}

impl TaskManager {
    pub fn new(pool: Arc<Semaphore>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            tasks: Mutex::new(Vec::new()),
            events,
            pool,
            last_progress: Mutex::new(None),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Accept the task and hand it to the worker pool.
    ///
    /// Under the manager's lock: bind the owner, move the task to
    /// `Starting`, append it to the live list. A task that can not start
    /// (already cancelling, not idle) is moved to `FalseStart` and the
    /// error is returned; the list is left untouched.
    pub fn start(self: &Arc<Self>, task: &Arc<ModuleTask>) -> ExecResult<()> {
        {
            let mut list = self.tasks.lock().expect("task list lock poisoned");
            task.core().bind_owner(self);
            if let Err(e) = task.core().transition(TaskState::Starting) {
                task.core().mark_false_start();
                return Err(e);
            }
            list.push(Arc::clone(task));
        }

        let pool = Arc::clone(&self.pool);
        let running = Arc::clone(task);
        tokio::spawn(async move {
            let _permit = pool
                .acquire_owned()
                .await
                .expect("worker pool semaphore closed");
            running.run().await;
        });
        Ok(())
    }

    /// Identical bookkeeping to [`start`](Self::start), but the task body
    /// runs inline on the caller's worker.
    pub async fn start_sync(self: &Arc<Self>, task: &Arc<ModuleTask>) -> ExecResult<()> {
        {
            let mut list = self.tasks.lock().expect("task list lock poisoned");
            task.core().bind_owner(self);
            if let Err(e) = task.core().transition(TaskState::Starting) {
                task.core().mark_false_start();
                return Err(e);
            }
            list.push(Arc::clone(task));
        }

        Arc::clone(task).run().await;
        Ok(())
    }

    /// Request cancellation of every task in the live list.
    pub fn cancel_all(&self) {
        let snapshot: Vec<_> = self
            .tasks
            .lock()
            .expect("task list lock poisoned")
            .clone();
        for task in snapshot {
            task.cancel();
        }
    }

    pub fn count(&self) -> usize {
        self.tasks.lock().expect("task list lock poisoned").len()
    }

    /// Identity snapshot of the live task set, sampled by the watchdog.
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.tasks
            .lock()
            .expect("task list lock poisoned")
            .iter()
            .map(|t| t.id())
            .collect()
    }

    // -- Notification entry points (called from the tasks themselves) -------

    pub(crate) fn task_started(&self, task: &ModuleTask) {
        fb_log!(debug, task, task = %task.name(), "started");
        let _ = self.events.send(TaskEvent::Started {
            id: task.id(),
            name: task.name().to_string(),
        });
    }

    /// Coalesced to at most one notification per
    /// [`MIN_PROGRESS_NOTIFICATION_INTERVAL`] per manager.
    pub(crate) fn task_progress(&self, task: &ModuleTask, progress: f32) {
        let now = Instant::now();
        {
            let mut last = self
                .last_progress
                .lock()
                .expect("progress stamp lock poisoned");
            if last.is_some_and(|t| now.duration_since(t) < MIN_PROGRESS_NOTIFICATION_INTERVAL) {
                return;
            }
            *last = Some(now);
        }
        let _ = self.events.send(TaskEvent::Progress {
            id: task.id(),
            progress,
        });
    }

    pub(crate) fn task_cancelled(&self, task: &ModuleTask) {
        let _ = self.events.send(TaskEvent::Cancelled { id: task.id() });
    }

    /// Remove the task from the live list, then notify. The removal comes
    /// first so observers of `Finished` see a consistent count.
    pub(crate) fn task_finished(&self, task: &ModuleTask) {
        {
            let mut list = self.tasks.lock().expect("task list lock poisoned");
            list.retain(|t| t.id() != task.id());
        }
        fb_log!(debug, task, task = %task.name(), "finished");
        let _ = self.events.send(TaskEvent::Finished { id: task.id() });
    }

    pub(crate) fn task_failed(&self, task: &ModuleTask, error: ExecError) {
        let _ = self.events.send(TaskEvent::Failed {
            id: task.id(),
            error: Arc::new(error),
        });
    }

    pub(crate) fn task_failed_on_cancellation(&self, task: &ModuleTask, error: ExecError) {
        fb_log!(debug, task, task = %task.name(), "failed on cancellation request");
        let _ = self.events.send(TaskEvent::FailedOnCancellation {
            id: task.id(),
            error: Arc::new(error),
        });
    }

    pub(crate) fn task_enslaved(self: &Arc<Self>, master: &ModuleTask, slave: &Arc<ModuleTask>) {
        slave.core().bind_owner(self);
        let _ = self.events.send(TaskEvent::Enslaved {
            master: master.id(),
            slave: slave.id(),
        });
    }
}

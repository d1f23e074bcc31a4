use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use fb_config::SchedulerConfig;
use fb_core::error::{ExecError, ExecResult};

use crate::module_task::ModuleTask;
use crate::registry::ModuleRegistry;
use crate::task::TaskId;
use crate::task_manager::{TaskEvent, TaskManager};

/// Poll period of the quiescence loops in `wait_all` / `cancel_all`.
const WAIT_POLL: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// The sole process-wide scheduler.
///
/// Owns the worker pool (a semaphore bounding concurrent module tasks),
/// the [`TaskManager`], and `pending`: every module task it has accepted
/// that has not yet finished. An observer task consumes the task manager's
/// event stream to unregister finished tasks and to turn the first task
/// failure of a wave into a graph-wide cancellation.
///
/// The watchdog and data-logger runs are plain spawned tasks that hold no
/// pool permit, so `pool_busy` never counts them.
pub struct Scheduler {
    task_manager: Arc<TaskManager>,
    pool: Arc<Semaphore>,
    pool_capacity: usize,
    pending: RwLock<HashMap<TaskId, Arc<ModuleTask>>>,
    cancelling_all: AtomicBool,
    module_failure: AtomicBool,
    stop_on_cancel: AtomicBool,
    stop_on_failure: AtomicBool,
    registry: Mutex<Weak<ModuleRegistry>>,
}

impl Scheduler {
    pub fn new(config: &SchedulerConfig) -> Arc<Self> {
        let capacity = config.max_parallel_tasks.max(1);
        let pool = Arc::new(Semaphore::new(capacity));
        Arc::new(Self {
            task_manager: TaskManager::new(Arc::clone(&pool)),
            pool,
            pool_capacity: capacity,
            pending: RwLock::new(HashMap::new()),
            cancelling_all: AtomicBool::new(false),
            module_failure: AtomicBool::new(false),
            stop_on_cancel: AtomicBool::new(false),
            stop_on_failure: AtomicBool::new(false),
            registry: Mutex::new(Weak::new()),
        })
    }

    /// Late-bound link to the module registry, used by the ready checks.
    /// Weak so the registry's modules may hold the scheduler strongly.
    pub fn bind_registry(&self, registry: &Arc<ModuleRegistry>) {
        *self.registry.lock().expect("registry link lock poisoned") = Arc::downgrade(registry);
    }

    pub fn task_manager(&self) -> &Arc<TaskManager> {
        &self.task_manager
    }

    /// Spawn the observer consuming task lifecycle events. One per engine.
    pub fn spawn_observer(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        let mut events = self.task_manager.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => scheduler.handle_event(event).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        fb_log!(warn, sys, missed, "task event observer lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn handle_event(self: &Arc<Self>, event: TaskEvent) {
        match event {
            TaskEvent::Finished { id } => {
                let task = self.lookup(id);
                self.unregister_module_task(id);
                if let Some(task) = task {
                    Arc::clone(task.module()).try_unregister_task(id).await;
                }
            }
            TaskEvent::Failed { id, error } => {
                fb_log!(error, task, task = id, error = %error, "module task failed, cancellation request");
                if let Some(task) = self.lookup(id) {
                    if !self.module_failure.swap(true, Ordering::SeqCst) {
                        self.stop_on_failure.store(true, Ordering::SeqCst);
                        task.module().immediate_cancel();
                        self.module_failure.store(false, Ordering::SeqCst);
                    } else {
                        task.module().immediate_cancel();
                    }
                }
            }
            TaskEvent::FailedOnCancellation { id, .. } => {
                fb_log!(debug, task, task = id, "failed on cancellation request");
            }
            TaskEvent::Cancelled { .. } => {
                // A cancel wave is running somewhere in the graph; the
                // drain must surface it to wait_all's caller.
                self.stop_on_cancel.store(true, Ordering::SeqCst);
            }
            TaskEvent::Started { .. }
            | TaskEvent::Progress { .. }
            | TaskEvent::Enslaved { .. } => {}
        }
    }

    // -- Pending-set bookkeeping -------------------------------------------

    /// Accept a freshly created module task. Fails while a graph-wide
    /// cancellation is in progress.
    pub fn register_new_module_task(&self, task: &Arc<ModuleTask>) -> ExecResult<()> {
        if self.cancelling_all.load(Ordering::SeqCst) {
            return Err(ExecError::Scheduling(format!(
                "cancelling all, can not register the new task {}",
                task.name()
            )));
        }
        self.pending
            .write()
            .expect("pending lock poisoned")
            .insert(task.id(), Arc::clone(task));
        Ok(())
    }

    /// Remove a finished task from the pending set. Idempotent.
    pub fn unregister_module_task(&self, id: TaskId) {
        self.pending
            .write()
            .expect("pending lock poisoned")
            .remove(&id);
    }

    fn lookup(&self, id: TaskId) -> Option<Arc<ModuleTask>> {
        self.pending
            .read()
            .expect("pending lock poisoned")
            .get(&id)
            .cloned()
    }

    /// Number of accepted, unfinished module tasks.
    pub fn count(&self) -> usize {
        self.pending.read().expect("pending lock poisoned").len()
    }

    /// Worker slots currently taken by module tasks.
    pub fn pool_busy(&self) -> usize {
        self.pool_capacity - self.pool.available_permits()
    }

    pub fn pool_capacity(&self) -> usize {
        self.pool_capacity
    }

    /// Identity snapshot of the task manager's live list.
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.task_manager.task_ids()
    }

    pub fn is_cancelling_all(&self) -> bool {
        self.cancelling_all.load(Ordering::SeqCst)
    }

    // -- Task starts --------------------------------------------------------

    /// Forward to the task manager. Refused while a graph cancellation is
    /// in progress; the task's held trigger data is released in that case.
    pub(crate) async fn start_module_task(&self, task: &Arc<ModuleTask>) -> ExecResult<()> {
        if self.cancelling_all.load(Ordering::SeqCst) {
            task.release_trigger_input();
            self.unregister_module_task(task.id());
            return Err(ExecError::Scheduling(format!(
                "cancelling all, can not start {}",
                task.name()
            )));
        }
        match self.task_manager.start(task) {
            Ok(()) => Ok(()),
            Err(ExecError::Merged) => Err(ExecError::Merged),
            Err(e) => {
                fb_log!(debug, task, task = %task.name(), error = %e, "failed to start");
                task.release_trigger_input();
                self.unregister_module_task(task.id());
                Err(e)
            }
        }
    }

    /// Like [`start_module_task`](Self::start_module_task), but runs the
    /// task inline on the caller's worker.
    pub(crate) async fn start_sync_module_task(&self, task: &Arc<ModuleTask>) -> ExecResult<()> {
        if self.cancelling_all.load(Ordering::SeqCst) {
            task.release_trigger_input();
            self.unregister_module_task(task.id());
            return Err(ExecError::Scheduling(format!(
                "cancelling all, can not sync start {}",
                task.name()
            )));
        }
        match self.task_manager.start_sync(task).await {
            Ok(()) => Ok(()),
            Err(ExecError::Merged) => Err(ExecError::Merged),
            Err(e) => {
                task.release_trigger_input();
                self.unregister_module_task(task.id());
                Err(e)
            }
        }
    }

    /// Run a data-logger (or any fire-and-forget runnable) outside the
    /// worker pool accounting.
    pub fn start_data_logger(&self, run: impl Future<Output = ()> + Send + 'static) {
        tokio::spawn(run);
    }

    // -- Graph-wide synchronisation ----------------------------------------

    fn all_modules_ready(&self) -> bool {
        match self
            .registry
            .lock()
            .expect("registry link lock poisoned")
            .upgrade()
        {
            Some(registry) => registry.all_ready(),
            None => true,
        }
    }

    /// Block until the pending set is empty, the pool is idle and no
    /// cancellation is in flight.
    ///
    /// When the drain was provoked by a cancellation or by a module
    /// failure, wait additionally until every module reports ready, then
    /// surface the matching error. The stop flags are consumed.
    pub async fn wait_all(&self) -> ExecResult<()> {
        loop {
            let idle = self.count() == 0
                && self.pool_busy() == 0
                && !self.cancelling_all.load(Ordering::SeqCst);
            if idle {
                break;
            }
            tokio::time::sleep(WAIT_POLL).await;
        }

        let failed = self.stop_on_failure.swap(false, Ordering::SeqCst);
        let cancelled = self.stop_on_cancel.swap(false, Ordering::SeqCst);
        if failed || cancelled {
            fb_log!(info, sys,
                "execution stopped on cancellation or failure, waiting for all modules ready"
            );
            while !self.all_modules_ready() {
                tokio::time::sleep(WAIT_POLL).await;
            }
            if failed {
                return Err(ExecError::ModuleFailure(
                    "stopped on module failure".to_string(),
                ));
            }
            return Err(ExecError::Cancelled);
        }

        fb_log!(debug, sys, "all tasks have stopped");
        Ok(())
    }

    /// Operator-initiated graph cancellation.
    ///
    /// Idempotent per wave: a second call while a wave is in flight
    /// returns immediately. Snapshots the pending set, cancels every task
    /// (which fans out through the modules' port graphs), then polls until
    /// the pool drains and every module reports ready.
    pub async fn cancel_all(&self) {
        if self.cancelling_all.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_on_cancel.store(true, Ordering::SeqCst);

        let snapshot: Vec<_> = self
            .pending
            .read()
            .expect("pending lock poisoned")
            .values()
            .cloned()
            .collect();
        fb_log!(info, sys, tasks = snapshot.len(), "cancel all: dispatching cancel to active tasks");
        for task in snapshot {
            task.cancel();
        }

        while self.count() > 0 || self.pool_busy() > 0 {
            tokio::time::sleep(WAIT_POLL).await;
        }
        while !self.all_modules_ready() {
            tokio::time::sleep(WAIT_POLL).await;
        }

        fb_log!(info, sys, "cancel all done, all modules ready");
        self.cancelling_all.store(false, Ordering::SeqCst);
    }

    /// Frozen-graph cancellation; reported as a module failure.
    pub async fn cancel_all_from_watchdog(&self) {
        fb_log!(warn, sys, "watchdog signalled, cancelling all");
        self.stop_on_failure.store(true, Ordering::SeqCst);
        self.cancel_all().await;
    }
}

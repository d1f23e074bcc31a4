use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use fb_core::error::{ExecError, ExecResult};
use fb_core::value::ValueType;

use crate::dispatcher::Dispatcher;
use crate::module_task::{ModuleTask, RunningState};
use crate::parameter::ParamSet;
use crate::port::{InPort, InPortKind, OutPort};
use crate::process::{ProcessCtx, Processor, StartCondition};
use crate::registry::ModuleRegistry;
use crate::scheduler::Scheduler;
use crate::task::TaskId;

static NEXT_MODULE_ID: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------------------
// ModuleHost — the runtime services a module is created against
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ModuleHost {
    pub scheduler: Arc<Scheduler>,
    pub dispatcher: Arc<Dispatcher>,
    pub registry: Arc<ModuleRegistry>,
}

// ---------------------------------------------------------------------------
// PortLayout — declarative port construction
// ---------------------------------------------------------------------------

/// Ordered port declarations of a module under construction.
#[derive(Default)]
pub struct PortLayout {
    inputs: Vec<(String, String, InPortKind)>,
    outputs: Vec<(String, String, ValueType)>,
}

impl PortLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a typed data input.
    pub fn in_data(mut self, name: &str, description: &str, ty: ValueType) -> Self {
        self.inputs
            .push((name.to_string(), description.to_string(), InPortKind::Data(ty)));
        self
    }

    /// Append a pure trigger input accepting any source type.
    pub fn in_trig(mut self, name: &str, description: &str) -> Self {
        self.inputs
            .push((name.to_string(), description.to_string(), InPortKind::Trig));
        self
    }

    /// Append a typed output.
    pub fn out(mut self, name: &str, description: &str, ty: ValueType) -> Self {
        self.outputs
            .push((name.to_string(), description.to_string(), ty));
        self
    }
}

// ---------------------------------------------------------------------------
// Module
// ---------------------------------------------------------------------------

/// Which cancellation flavour a module receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelMode {
    /// Purge the queue, cancel the running task, call the user hook.
    Immediate,
    /// Let the current run complete and flush; only prevent new runs.
    Lazy,
}

struct TaskQueueState {
    queue: VecDeque<Arc<ModuleTask>>,
    launched: HashMap<TaskId, Arc<ModuleTask>>,
    starting: Option<Arc<ModuleTask>>,
    running: Option<TaskId>,
}

struct CancelState {
    immediate: bool,
    lazy: bool,
}

/// A dataflow vertex: typed input and output ports around a user-supplied
/// [`Processor`].
///
/// The module is the per-vertex execution coordinator. It guarantees that
/// at most one of its tasks runs the processor at a time, keeps the task
/// queue strictly FIFO (modulo merges), and drives the cancel /
/// wait-cancelled / reset sub-protocol.
pub struct Module {
    id: u64,
    name: String,
    internal_name: String,
    description: String,
    imp: Box<dyn Processor>,
    in_ports: Vec<Arc<InPort>>,
    out_ports: Vec<Arc<OutPort>>,
    params: ParamSet,
    scheduler: Arc<Scheduler>,
    dispatcher: Arc<Dispatcher>,
    /// Task queue bookkeeping; never held across an await point.
    queue: Mutex<TaskQueueState>,
    /// Held by the executing task from preparation until
    /// `processing_terminated` (or the exit path).
    processing: Arc<tokio::sync::Mutex<()>>,
    /// Keeps output reservations of consecutive tasks in queue order.
    output_order: Arc<tokio::sync::Mutex<()>>,
    /// Serialises the cancel sub-protocol flags.
    cancel_state: Mutex<CancelState>,
    /// False from cancellation start until the listener saw every task
    /// finish; true otherwise (including after reset).
    quiesced: watch::Sender<bool>,
    /// Set once the cancellation became effective, cleared by reset.
    cancel_done: AtomicBool,
}

impl Module {
    /// Build a module, wire its ports and register it.
    ///
    /// `name` is the user-chosen custom name; the internal name is
    /// generated from it. Both are globally unique.
    pub fn create(
        host: &ModuleHost,
        name: &str,
        description: &str,
        layout: PortLayout,
        imp: Box<dyn Processor>,
    ) -> ExecResult<Arc<Module>> {
        ModuleRegistry::check_name(name)?;
        let internal_name = host.registry.claim_internal_name("module");

        let module = Arc::new_cyclic(|weak| {
            let in_ports = layout
                .inputs
                .iter()
                .enumerate()
                .map(|(index, (port_name, port_desc, kind))| {
                    InPort::new(weak.clone(), port_name, port_desc, *kind, index)
                })
                .collect();
            let out_ports = layout
                .outputs
                .iter()
                .enumerate()
                .map(|(index, (port_name, port_desc, ty))| {
                    OutPort::new(weak.clone(), port_name, port_desc, *ty, index)
                })
                .collect();
            let (quiesced, _) = watch::channel(true);
            Module {
                id: NEXT_MODULE_ID.fetch_add(1, Ordering::Relaxed),
                name: name.to_string(),
                internal_name: internal_name.clone(),
                description: description.to_string(),
                imp,
                in_ports,
                out_ports,
                params: ParamSet::new(),
                scheduler: Arc::clone(&host.scheduler),
                dispatcher: Arc::clone(&host.dispatcher),
                queue: Mutex::new(TaskQueueState {
                    queue: VecDeque::new(),
                    launched: HashMap::new(),
                    starting: None,
                    running: None,
                }),
                processing: Arc::new(tokio::sync::Mutex::new(())),
                output_order: Arc::new(tokio::sync::Mutex::new(())),
                cancel_state: Mutex::new(CancelState {
                    immediate: false,
                    lazy: false,
                }),
                quiesced,
                cancel_done: AtomicBool::new(false),
            }
        });

        if let Err(e) = host.registry.register(&module) {
            host.registry.free_internal_name(&internal_name);
            return Err(e);
        }
        fb_log!(debug, flow, module = %name, internal = %internal_name, "module created");
        Ok(module)
    }

    // -- Identity -----------------------------------------------------------

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn internal_name(&self) -> &str {
        &self.internal_name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    // -- Ports & parameters -------------------------------------------------

    pub fn in_ports(&self) -> &[Arc<InPort>] {
        &self.in_ports
    }

    pub fn out_ports(&self) -> &[Arc<OutPort>] {
        &self.out_ports
    }

    pub fn in_port(&self, name: &str) -> Option<&Arc<InPort>> {
        self.in_ports.iter().find(|p| p.name() == name)
    }

    pub fn out_port(&self, name: &str) -> Option<&Arc<OutPort>> {
        self.out_ports.iter().find(|p| p.name() == name)
    }

    pub(crate) fn in_port_name(&self, index: usize) -> Option<&str> {
        self.in_ports.get(index).map(|p| p.name())
    }

    pub fn params(&self) -> &ParamSet {
        &self.params
    }

    pub(crate) fn scheduler_ref(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub(crate) fn dispatcher_ref(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub(crate) fn processing_lock(&self) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(&self.processing)
    }

    pub(crate) fn output_order_lock(&self) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(&self.output_order)
    }

    pub(crate) fn processor(&self) -> &dyn Processor {
        self.imp.as_ref()
    }

    pub(crate) fn release_in_port_on_failure(&self, index: usize) {
        if let Some(port) = self.in_ports.get(index) {
            port.release_on_failure();
        }
    }

    fn plugged_count(&self) -> usize {
        self.in_ports.iter().filter(|p| p.has_source()).count()
    }

    // -- Task scheduling ----------------------------------------------------

    /// Produce a fresh task with no triggering port and enqueue it.
    ///
    /// The synchronous start path is attempted when `sync_allowed` and the
    /// processing slot happens to be free.
    pub async fn run_module(self: &Arc<Self>, sync_allowed: bool) -> ExecResult<Arc<ModuleTask>> {
        let task = ModuleTask::new(self, None);
        self.scheduler.register_new_module_task(&task)?;
        self.enqueue_task(Arc::clone(&task), sync_allowed).await?;
        Ok(task)
    }

    /// Append a task to the queue and start it when the module is idle.
    ///
    /// If the task was trigged by the same in-port as the task currently
    /// starting (which therefore has not begun running), the new task is
    /// merged into it instead: one execution satisfies both notifications.
    pub(crate) async fn enqueue_task(
        self: &Arc<Self>,
        task: Arc<ModuleTask>,
        sync_allowed: bool,
    ) -> ExecResult<()> {
        if self.is_cancelling() {
            task.release_trigger_input();
            task.cancel_direct();
            task.force_finish();
            self.scheduler.unregister_module_task(task.id());
            return Err(ExecError::Cancelled);
        }

        let merge_candidate = {
            let queue = self.queue.lock().expect("task queue lock poisoned");
            match (task.trigger(), &queue.starting) {
                (Some(_), Some(starting))
                    if starting.trigger() == task.trigger()
                        && matches!(
                            starting.state(),
                            crate::task::TaskState::Idle | crate::task::TaskState::Starting
                        ) =>
                {
                    Some(Arc::clone(starting))
                }
                _ => None,
            }
        };
        if let Some(master) = merge_candidate {
            if master.merge(&task).is_ok() {
                if let Some(index) = task.trigger() {
                    if let Some(port) = self.in_ports.get(index) {
                        port.collapse_duplicate_hold();
                    }
                }
                return Ok(());
            }
        }

        let start_now = {
            let mut queue = self.queue.lock().expect("task queue lock poisoned");
            queue.queue.push_back(Arc::clone(&task));
            queue.starting.is_none() && queue.running.is_none()
        };
        if start_now {
            self.pop_task(sync_allowed).await?;
        }
        Ok(())
    }

    /// Dequeue and start the next task, if the module is idle.
    async fn pop_task(self: &Arc<Self>, sync_allowed: bool) -> ExecResult<()> {
        if self.is_cancelling() {
            return Ok(());
        }
        let task = {
            let mut queue = self.queue.lock().expect("task queue lock poisoned");
            if queue.starting.is_some() || queue.running.is_some() {
                return Ok(());
            }
            let Some(task) = queue.queue.pop_front() else {
                return Ok(());
            };
            queue.starting = Some(Arc::clone(&task));
            queue.launched.insert(task.id(), Arc::clone(&task));
            task
        };

        let sync = sync_allowed && self.processing.try_lock().is_ok();
        let started = if sync {
            self.scheduler.start_sync_module_task(&task).await
        } else {
            self.scheduler.start_module_task(&task).await
        };

        if let Err(e) = started {
            {
                let mut queue = self.queue.lock().expect("task queue lock poisoned");
                queue.launched.remove(&task.id());
                if queue.starting.as_ref().is_some_and(|t| t.id() == task.id()) {
                    queue.starting = None;
                }
            }
            if !matches!(e, ExecError::Merged) {
                task.force_finish();
            }
            return Err(e);
        }
        Ok(())
    }

    /// Forget a finished task and start the next queued one, if any.
    /// Called from the scheduler's finished observer; idempotent.
    pub(crate) async fn try_unregister_task(self: Arc<Self>, id: TaskId) {
        {
            let mut queue = self.queue.lock().expect("task queue lock poisoned");
            queue.launched.remove(&id);
            if queue.starting.as_ref().is_some_and(|t| t.id() == id) {
                queue.starting = None;
            }
            if queue.running == Some(id) {
                queue.running = None;
            }
        }
        if let Err(e) = self.pop_task(false).await {
            if !e.is_benign() {
                fb_log!(warn, flow, module = %self.name, error = %e, "failed to start next queued task");
            }
        }
    }

    /// Look into the task queue for a task trigged by the given in-port;
    /// merge it into `master` and catch the port on its behalf.
    pub(crate) fn try_catch_from_queue(&self, master: &Arc<ModuleTask>, index: usize) -> bool {
        let slave = {
            let mut queue = self.queue.lock().expect("task queue lock poisoned");
            let position = queue
                .queue
                .iter()
                .position(|t| t.trigger() == Some(index));
            position.and_then(|p| queue.queue.remove(p))
        };
        let Some(slave) = slave else {
            return false;
        };
        match master.merge(&slave) {
            Ok(()) => self.in_ports[index].try_catch(),
            Err(_) => {
                self.queue
                    .lock()
                    .expect("task queue lock poisoned")
                    .queue
                    .push_front(slave);
                false
            }
        }
    }

    // -- Task execution body ------------------------------------------------

    /// Body of a [`ModuleTask`]; never invoked by user code.
    ///
    /// Acquires the processing slot, checks for a meanwhile-merge, walks
    /// the start condition, waits for parameters, runs the processor, and
    /// releases every still-held port on the way out.
    pub(crate) async fn execute(self: Arc<Self>, task: &Arc<ModuleTask>) -> ExecResult<()> {
        task.set_running_state(RunningState::NotAvailable);

        let permit = tokio::select! {
            biased;
            _ = task.core().cancel_token().cancelled() => {
                task.release_trigger_input();
                return Err(ExecError::Cancelled);
            }
            permit = self.processing_lock().lock_owned() => permit,
        };

        // A merge that happened while this task waited surfaces here.
        if let Err(e) = task.core().transition(crate::task::TaskState::Running) {
            if !matches!(e, ExecError::Merged) {
                task.release_trigger_input();
            }
            return Err(e);
        }
        {
            let mut queue = self.queue.lock().expect("task queue lock poisoned");
            if queue.starting.as_ref().is_some_and(|t| t.id() == task.id()) {
                queue.starting = None;
            }
            queue.running = Some(task.id());
        }

        let mut ctx = ProcessCtx::new(&self, task, permit);
        let result = self.run_body(&mut ctx).await;
        ctx.finish();
        result
    }

    async fn run_body(&self, ctx: &mut ProcessCtx<'_>) -> ExecResult<()> {
        if self.is_immediate_cancelling() {
            return Err(ExecError::Cancelled);
        }
        ctx.set_running_state(RunningState::Starting);
        let start = self.start_condition(ctx).await?;
        ctx.set_running_state(RunningState::Retrieving);
        self.params.wait_ready(ctx.task_core()).await?;
        ctx.set_running_state(RunningState::Processing);
        let result = self.imp.process(ctx, start).await;
        ctx.set_running_state(RunningState::NotApplicable);
        result
    }

    /// Walk the input ports until the start condition resolves.
    ///
    /// The triggering port is caught first (it is known to have data).
    /// Other ports are caught by absorbing their queued sibling tasks.
    /// When every plugged port is caught but unplugged ports remain, the
    /// run proceeds with partial data.
    async fn start_condition(&self, ctx: &mut ProcessCtx<'_>) -> ExecResult<StartCondition> {
        if self.in_ports.is_empty() {
            return Ok(StartCondition::NoData);
        }
        let Some(trigger) = ctx.trigger_index() else {
            return Ok(StartCondition::NoData);
        };
        ctx.catch_trigger(trigger)?;

        loop {
            let mut all_present = true;
            for index in 0..self.in_ports.len() {
                if ctx.is_caught(index) {
                    continue;
                }
                if self.try_catch_from_queue(ctx.task_ref(), index) {
                    ctx.mark_caught(index);
                } else {
                    all_present = false;
                }
            }
            if all_present {
                return Ok(StartCondition::AllData);
            }
            if ctx.caught_count() == self.plugged_count() {
                return Ok(StartCondition::AllPluggedData);
            }
            if ctx.yield_now().await {
                return Err(ExecError::Cancelled);
            }
        }
    }

    // -- Cancellation sub-protocol -----------------------------------------

    pub fn is_cancelling(&self) -> bool {
        let state = self.cancel_state.lock().expect("cancel state lock poisoned");
        state.immediate || state.lazy
    }

    pub(crate) fn is_immediate_cancelling(&self) -> bool {
        self.cancel_state
            .lock()
            .expect("cancel state lock poisoned")
            .immediate
    }

    /// Force the cancellation of this module and, through the dispatcher,
    /// of its upstream sources and downstream targets.
    pub fn immediate_cancel(self: &Arc<Self>) {
        Arc::clone(&self.dispatcher).cancel_from(self, CancelMode::Immediate);
    }

    /// Let the current run complete and flush its outputs, then quiesce.
    /// The user cancel hook is not called. Still fans out to neighbours.
    pub fn lazy_cancel(self: &Arc<Self>) {
        Arc::clone(&self.dispatcher).cancel_from(self, CancelMode::Lazy);
    }

    /// Single-module share of a cancellation wave. Returns `false` when a
    /// cancellation is already in progress (which also stops the wave
    /// from re-entering this module).
    pub(crate) fn cancel_local(self: &Arc<Self>, mode: CancelMode) -> bool {
        {
            let mut state = self.cancel_state.lock().expect("cancel state lock poisoned");
            if state.immediate || state.lazy {
                return false;
            }
            match mode {
                CancelMode::Immediate => state.immediate = true,
                CancelMode::Lazy => state.lazy = true,
            }
        }
        fb_log!(debug, flow, module = %self.name, mode = ?mode, "cancelling");
        self.cancel_done.store(false, Ordering::SeqCst);
        let _ = self.quiesced.send(false);

        let (purged, launched) = {
            let mut queue = self.queue.lock().expect("task queue lock poisoned");
            let purged: Vec<_> = queue.queue.drain(..).collect();
            let launched: Vec<_> = queue.launched.values().cloned().collect();
            (purged, launched)
        };

        for task in &purged {
            task.cancel_direct();
            task.release_trigger_input();
            task.force_finish();
            self.scheduler.unregister_module_task(task.id());
        }

        if matches!(mode, CancelMode::Immediate) {
            for task in &launched {
                task.cancel_direct();
            }
            self.imp.cancel();
        }

        let module = Arc::clone(self);
        tokio::spawn(async move {
            for task in launched {
                task.wait_done().await;
            }
            module.cancelled();
        });
        true
    }

    /// Called by the cancellation listener once every launched task
    /// finished: clear the flags and mark the module quiesced.
    fn cancelled(&self) {
        {
            let mut state = self.cancel_state.lock().expect("cancel state lock poisoned");
            state.immediate = false;
            state.lazy = false;
        }
        self.cancel_done.store(true, Ordering::SeqCst);
        let _ = self.quiesced.send(true);
        fb_log!(debug, flow, module = %self.name, "cancellation effective");
    }

    /// Block until the cancellation has become effective on this module
    /// and on every module reachable from it.
    pub async fn wait_cancelled(self: &Arc<Self>) {
        Arc::clone(&self.dispatcher).wait_cancelled_from(self).await;
    }

    pub(crate) async fn wait_local_quiesced(&self) {
        let mut rx = self.quiesced.subscribe();
        let _ = rx.wait_for(|quiet| *quiet).await;
    }

    /// Reset the reachable graph: targets first, then this module, then
    /// sources. Blocks on the cancellation being effective first.
    pub async fn module_reset(self: &Arc<Self>) {
        self.wait_cancelled().await;
        Arc::clone(&self.dispatcher).reset_from(self);
    }

    /// Single-module share of a reset wave.
    pub(crate) fn local_reset(&self) {
        self.imp.reset();
        for port in &self.out_ports {
            port.reset_cycle();
        }
        for port in &self.in_ports {
            port.reset_cycle();
        }
        self.cancel_done.store(false, Ordering::SeqCst);
        fb_log!(debug, flow, module = %self.name, "reset");
    }

    /// True when the module has quiesced: no running task, no pending
    /// cancellation.
    pub fn module_ready(&self) -> bool {
        *self.quiesced.borrow()
    }

    /// True while the processor reports a multi-run sequence in progress.
    pub fn seq_running(&self) -> bool {
        self.imp.seq_running()
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("internal_name", &self.internal_name)
            .field("in_ports", &self.in_ports.len())
            .field("out_ports", &self.out_ports.len())
            .finish()
    }
}

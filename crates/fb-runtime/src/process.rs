use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{OwnedMutexGuard, OwnedRwLockReadGuard};

use fb_core::attribute::DataAttribute;
use fb_core::error::{ExecError, ExecResult};
use fb_core::value::Value;

use crate::module::Module;
use crate::module_task::{ModuleTask, RunningState};
use crate::port::ReservedOut;
use crate::task::TaskCore;

// ---------------------------------------------------------------------------
// StartCondition
// ---------------------------------------------------------------------------

/// Input situation a run starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartCondition {
    /// No input ports, or the run was requested without a trigger.
    NoData,
    /// Every input port was caught.
    AllData,
    /// Every *plugged* input port was caught; unplugged ports remain.
    AllPluggedData,
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

/// User logic of a module.
///
/// `process` runs with the module's processing slot held; at most one
/// invocation per module is in flight at any time, so implementations may
/// keep plain interior-mutable state.
///
/// Cancellation is cooperative: long-running hooks periodically call
/// [`ProcessCtx::sleep`] / [`ProcessCtx::yield_now`] and bail out with
/// `ExecError::Cancelled` when they report the cancel event.
#[async_trait]
pub trait Processor: Send + Sync + 'static {
    async fn process(&self, ctx: &mut ProcessCtx<'_>, start: StartCondition) -> ExecResult<()>;

    /// Forced-cancellation hook. Must not block and must not fail.
    fn cancel(&self) {}

    /// Return the module to its initial state. Must not block.
    fn reset(&self) {}

    /// True while a multi-run sequence is in progress.
    fn seq_running(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// ProcessCtx
// ---------------------------------------------------------------------------

struct ReservedOutputs {
    /// Keeps reservations of consecutive tasks in queue order.
    _order: OwnedMutexGuard<()>,
    writes: HashMap<usize, ReservedOut>,
}

/// Execution context handed to [`Processor::process`].
///
/// Tracks everything the task holds: caught input ports, read locks,
/// reserved outputs and the module's processing slot. Whatever is still
/// held when the run ends is released on the exit path, so a failing
/// processor can not leak a port.
pub struct ProcessCtx<'a> {
    module: &'a Arc<Module>,
    task: &'a Arc<ModuleTask>,
    caught: BTreeSet<usize>,
    /// Whether the triggering port's notification was consumed; guards
    /// the exit path against releasing a notification of the *next*
    /// cycle that arrived while this task was flushing.
    trigger_caught: bool,
    read_guards: HashMap<usize, OwnedRwLockReadGuard<Value>>,
    reserved: Option<ReservedOutputs>,
    processing: Option<OwnedMutexGuard<()>>,
}

impl<'a> ProcessCtx<'a> {
    pub(crate) fn new(
        module: &'a Arc<Module>,
        task: &'a Arc<ModuleTask>,
        processing: OwnedMutexGuard<()>,
    ) -> Self {
        Self {
            module,
            task,
            caught: BTreeSet::new(),
            trigger_caught: false,
            read_guards: HashMap::new(),
            reserved: None,
            processing: Some(processing),
        }
    }

    // -- Task forwarding ----------------------------------------------------

    pub fn module_name(&self) -> &str {
        self.module.name()
    }

    /// Index of the in-port that trigged this run, if any.
    pub fn trigger_index(&self) -> Option<usize> {
        self.task.trigger()
    }

    pub(crate) fn task_ref(&self) -> &Arc<ModuleTask> {
        self.task
    }

    pub(crate) fn task_core(&self) -> &TaskCore {
        self.task.core()
    }

    /// Cooperative wait; `true` iff the cancel event fired during it.
    pub async fn sleep(&self, duration: Duration) -> bool {
        self.task.core().sleep(duration).await
    }

    /// Cooperative yield; `true` iff cancellation was requested.
    pub async fn yield_now(&self) -> bool {
        self.task.core().yield_now().await
    }

    pub fn is_cancelled(&self) -> bool {
        self.task.core().is_cancelled() || self.task.core().cancel_token().is_cancelled()
    }

    pub fn set_progress(&self, progress: f32) {
        self.task.set_progress(progress);
    }

    pub(crate) fn set_running_state(&self, state: RunningState) {
        self.task.set_running_state(state);
    }

    // -- Input side ---------------------------------------------------------

    pub fn in_port_count(&self) -> usize {
        self.module.in_ports().len()
    }

    pub fn is_caught(&self, index: usize) -> bool {
        self.caught.contains(&index)
    }

    pub(crate) fn caught_count(&self) -> usize {
        self.caught.len()
    }

    pub(crate) fn mark_caught(&mut self, index: usize) {
        self.caught.insert(index);
    }

    /// Catch the triggering port; it is known to have pending data.
    pub(crate) fn catch_trigger(&mut self, index: usize) -> ExecResult<()> {
        let port = &self.module.in_ports()[index];
        if !port.try_catch() {
            return Err(ExecError::Protocol(format!(
                "triggering port {} has no pending data",
                port.name()
            )));
        }
        self.caught.insert(index);
        self.trigger_caught = true;
        Ok(())
    }

    /// Read-lock a caught data port so its payload may be inspected.
    /// Idempotent per port and cycle.
    pub async fn lock_in_port(&mut self, index: usize) -> ExecResult<()> {
        if !self.caught.contains(&index) {
            return Err(ExecError::Protocol(format!(
                "in-port {index} was not caught before locking"
            )));
        }
        if self.read_guards.contains_key(&index) {
            return Ok(());
        }
        let port = &self.module.in_ports()[index];
        if port.is_trig() {
            return Err(ExecError::Protocol(format!(
                "trigger port {} carries no payload",
                port.name()
            )));
        }
        let source = port.source().ok_or_else(|| {
            ExecError::PortExpired(format!("{} lost its source", port.name()))
        })?;
        let guard = source.item().read_owned().await;
        self.read_guards.insert(index, guard);
        Ok(())
    }

    /// Borrow the payload of a locked in-port.
    pub fn in_value(&self, index: usize) -> ExecResult<&Value> {
        self.read_guards
            .get(&index)
            .map(|guard| &**guard)
            .ok_or_else(|| {
                ExecError::Protocol(format!("in-port {index} was not locked before reading"))
            })
    }

    /// Read the attribute travelling with a caught in-port.
    pub fn in_attribute(&self, index: usize) -> ExecResult<DataAttribute> {
        if !self.caught.contains(&index) {
            return Err(ExecError::Protocol(format!(
                "in-port {index} was not caught before reading its attribute"
            )));
        }
        self.module.in_ports()[index].read_attribute()
    }

    /// Fan-in merge of the attributes of every caught in-port.
    pub fn combined_in_attribute(&self) -> ExecResult<DataAttribute> {
        let mut attrs = Vec::with_capacity(self.caught.len());
        for index in &self.caught {
            attrs.push(self.in_attribute(*index)?);
        }
        Ok(DataAttribute::combine(attrs.iter()))
    }

    /// Sequence events delivered over the seq binding of an in-port.
    pub fn take_seq_events(&self, index: usize) -> Vec<DataAttribute> {
        self.module.in_ports()[index].take_seq_events()
    }

    /// Release one caught in-port: drop the read lock and give the hold
    /// back to the source.
    pub fn release_in_port(&mut self, index: usize) {
        if !self.caught.remove(&index) {
            fb_log!(warn, port,
                module = %self.module.name(),
                index,
                "releasing an in-port that is not caught (any more?)"
            );
            return;
        }
        self.read_guards.remove(&index);
        self.module.in_ports()[index].release_after_catch();
    }

    /// Release every still-caught in-port.
    pub fn release_all_in_ports(&mut self) {
        while let Some(index) = self.caught.iter().next().copied() {
            self.release_in_port(index);
        }
    }

    // -- Output side --------------------------------------------------------

    pub fn out_port_count(&self) -> usize {
        self.module.out_ports().len()
    }

    /// Reserve the given out-ports for writing.
    ///
    /// Reservations across tasks keep queue order; per out-port, the
    /// reservation waits until every hold from the previous cycle is
    /// released. Honours cancellation.
    pub async fn reserve_out_ports(&mut self, indices: &[usize]) -> ExecResult<()> {
        if self.reserved.is_some() {
            return Err(ExecError::Protocol(
                "outputs already reserved this cycle".to_string(),
            ));
        }
        let order = tokio::select! {
            biased;
            _ = self.task.core().cancel_token().cancelled() => return Err(ExecError::Cancelled),
            order = self.module.output_order_lock().lock_owned() => order,
        };

        let mut sorted: Vec<usize> = indices.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mut writes = HashMap::with_capacity(sorted.len());
        for index in sorted {
            let port = self.module.out_ports().get(index).ok_or_else(|| {
                ExecError::Protocol(format!("no out-port with index {index}"))
            })?;
            let held = tokio::select! {
                biased;
                _ = self.task.core().cancel_token().cancelled() => return Err(ExecError::Cancelled),
                held = port.reserve() => held?,
            };
            writes.insert(index, held);
        }
        self.reserved = Some(ReservedOutputs {
            _order: order,
            writes,
        });
        Ok(())
    }

    /// Reserve every out-port of the module.
    pub async fn reserve_all_out_ports(&mut self) -> ExecResult<()> {
        let all: Vec<usize> = (0..self.module.out_ports().len()).collect();
        self.reserve_out_ports(&all).await
    }

    /// Write the payload of a reserved out-port.
    pub fn write_out(&mut self, index: usize, value: Value) -> ExecResult<()> {
        let reserved = self.reserved.as_mut().ok_or_else(|| {
            ExecError::Protocol("no outputs reserved this cycle".to_string())
        })?;
        let held = reserved.writes.get_mut(&index).ok_or_else(|| {
            ExecError::Protocol(format!("out-port {index} is not reserved"))
        })?;
        let guard = held.guard.as_mut().ok_or_else(|| {
            ExecError::Protocol(format!("out-port {index} was already notified"))
        })?;
        self.module.out_ports()[index].item().store(guard, value)
    }

    /// Publish a reserved out-port: stamp the attribute, surrender the
    /// write lock, and activate every bound target.
    pub async fn notify_out_port_ready(
        &mut self,
        index: usize,
        attr: DataAttribute,
    ) -> ExecResult<()> {
        let reserved = self.reserved.as_mut().ok_or_else(|| {
            ExecError::Protocol("no outputs reserved this cycle".to_string())
        })?;
        let mut held = reserved.writes.remove(&index).ok_or_else(|| {
            ExecError::Protocol(format!("out-port {index} is not reserved"))
        })?;

        let port = &self.module.out_ports()[index];
        port.item().set_attribute(attr);
        drop(held.guard.take());

        let result = self
            .module
            .dispatcher_ref()
            .publish(port, self.module.scheduler_ref())
            .await;

        // Surrender the FIFO slot only after the dispatch completed.
        drop(held);
        if self
            .reserved
            .as_ref()
            .is_some_and(|r| r.writes.is_empty())
        {
            self.reserved = None;
        }
        result
    }

    /// Publish every reserved out-port with the same attribute.
    pub async fn notify_all_out_ports(&mut self, attr: DataAttribute) -> ExecResult<()> {
        let mut indices: Vec<usize> = self
            .reserved
            .as_ref()
            .map(|r| r.writes.keys().copied().collect())
            .unwrap_or_default();
        indices.sort_unstable();
        for index in indices {
            self.notify_out_port_ready(index, attr.clone()).await?;
        }
        Ok(())
    }

    /// Give up the module's processing slot early, allowing the next task
    /// to start while this one keeps flushing. At most once per run.
    pub fn processing_terminated(&mut self) {
        self.processing.take();
    }

    // -- Exit path ----------------------------------------------------------

    /// Release everything still held: reserved outputs, read locks,
    /// caught ports, the pending trigger notification, the processing
    /// slot. Called on every exit, normal or not.
    pub(crate) fn finish(&mut self) {
        self.reserved = None;
        self.read_guards.clear();
        while let Some(index) = self.caught.iter().next().copied() {
            self.caught.remove(&index);
            self.module.in_ports()[index].release_after_catch();
        }
        // Only an *uncaught* trigger notification belongs to this task;
        // once caught, anything pending on the port is the next cycle's.
        if !self.trigger_caught {
            if let Some(trigger) = self.task.trigger() {
                self.module.release_in_port_on_failure(trigger);
            }
        }
        self.processing.take();
    }
}

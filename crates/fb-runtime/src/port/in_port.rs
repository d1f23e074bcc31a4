use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use fb_core::attribute::DataAttribute;
use fb_core::error::{ExecError, ExecResult};
use fb_core::value::ValueType;

use crate::module::Module;
use crate::module_task::ModuleTask;
use crate::port::{OutPort, PortInfo};

// ---------------------------------------------------------------------------
// InPortKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InPortKind {
    /// Carries a typed payload; holds the source's value from notification
    /// until release.
    Data(ValueType),
    /// Pure trigger: accepts any source type, conveys only the attribute.
    /// Does not hold the source's value, so the source may fire again
    /// before the triggered task ran (such repeats merge).
    Trig,
}

// ---------------------------------------------------------------------------
// InPort
// ---------------------------------------------------------------------------

struct TargetLink {
    source: Option<Weak<OutPort>>,
    seq_source: Option<Weak<OutPort>>,
}

/// Data target endpoint: at most one bound source, a new-data flag set by
/// the source's notification, and (for pure triggers) the attribute
/// snapshot taken at notification time.
pub struct InPort {
    info: PortInfo,
    kind: InPortKind,
    link: Mutex<TargetLink>,
    new_data: AtomicBool,
    trig_attr: Mutex<Option<DataAttribute>>,
    seq_events: Mutex<Vec<DataAttribute>>,
    expired: bool,
}

impl InPort {
    pub(crate) fn new(
        parent: Weak<Module>,
        name: &str,
        description: &str,
        kind: InPortKind,
        index: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            info: PortInfo::new(parent, name, description, index),
            kind,
            link: Mutex::new(TargetLink {
                source: None,
                seq_source: None,
            }),
            new_data: AtomicBool::new(false),
            trig_attr: Mutex::new(None),
            seq_events: Mutex::new(Vec::new()),
            expired: false,
        })
    }

    /// The sentinel standing in for a deleted in-port.
    pub(crate) fn expired_sentinel() -> Arc<Self> {
        Arc::new(Self {
            info: PortInfo::expired("emptyIn"),
            kind: InPortKind::Trig,
            link: Mutex::new(TargetLink {
                source: None,
                seq_source: None,
            }),
            new_data: AtomicBool::new(false),
            trig_attr: Mutex::new(None),
            seq_events: Mutex::new(Vec::new()),
            expired: true,
        })
    }

    pub fn name(&self) -> &str {
        self.info.name()
    }

    pub fn description(&self) -> &str {
        self.info.description()
    }

    pub fn index(&self) -> usize {
        self.info.index()
    }

    pub fn kind(&self) -> InPortKind {
        self.kind
    }

    pub fn is_trig(&self) -> bool {
        matches!(self.kind, InPortKind::Trig)
    }

    pub fn parent(&self) -> ExecResult<Arc<Module>> {
        self.check_live()?;
        self.info.parent()
    }

    pub(crate) fn check_live(&self) -> ExecResult<()> {
        if self.expired {
            return Err(ExecError::PortExpired(self.info.name().to_string()));
        }
        Ok(())
    }

    /// Type check for [`Dispatcher::bind`](crate::Dispatcher::bind).
    pub(crate) fn accepts(&self, ty: ValueType) -> ExecResult<()> {
        match self.kind {
            InPortKind::Trig => Ok(()),
            InPortKind::Data(expected) if expected == ty => Ok(()),
            InPortKind::Data(expected) => Err(ExecError::Binding(format!(
                "target {} expects {expected}, source provides {ty}",
                self.info.name()
            ))),
        }
    }

    // -- Binding (mutated by the dispatcher only) ---------------------------

    pub(crate) fn source(&self) -> Option<Arc<OutPort>> {
        self.link
            .lock()
            .expect("in-port link lock poisoned")
            .source
            .as_ref()
            .and_then(Weak::upgrade)
    }

    pub fn has_source(&self) -> bool {
        self.source().is_some()
    }

    pub(crate) fn set_source(&self, source: &Arc<OutPort>) {
        self.link
            .lock()
            .expect("in-port link lock poisoned")
            .source = Some(Arc::downgrade(source));
    }

    pub(crate) fn clear_source(&self) {
        self.link
            .lock()
            .expect("in-port link lock poisoned")
            .source = None;
    }

    /// Point this target at the expired sentinel; used when its source's
    /// module is deleted.
    pub(crate) fn expire_source(&self, sentinel: &Arc<OutPort>) {
        self.link
            .lock()
            .expect("in-port link lock poisoned")
            .source = Some(Arc::downgrade(sentinel));
    }

    pub(crate) fn seq_source(&self) -> Option<Arc<OutPort>> {
        self.link
            .lock()
            .expect("in-port link lock poisoned")
            .seq_source
            .as_ref()
            .and_then(Weak::upgrade)
    }

    pub(crate) fn set_seq_source(&self, source: &Arc<OutPort>) {
        self.link
            .lock()
            .expect("in-port link lock poisoned")
            .seq_source = Some(Arc::downgrade(source));
    }

    pub(crate) fn clear_seq_source(&self) {
        self.link
            .lock()
            .expect("in-port link lock poisoned")
            .seq_source = None;
    }

    // -- Data exchange ------------------------------------------------------

    /// Called by the dispatcher when the bound source published. For a
    /// data port the source has already registered this target's hold;
    /// a pure trigger only snapshots the attribute.
    pub(crate) fn notify_from_source(&self, attr: &DataAttribute) {
        if self.is_trig() {
            *self.trig_attr.lock().expect("trig attr lock poisoned") = Some(attr.clone());
        }
        self.new_data.store(true, Ordering::Release);
    }

    /// Consume the new-data flag. Returns `true` exactly once per
    /// notification.
    pub(crate) fn try_catch(&self) -> bool {
        self.new_data.swap(false, Ordering::AcqRel)
    }

    /// Read the attribute travelling with the caught value.
    pub(crate) fn read_attribute(&self) -> ExecResult<DataAttribute> {
        if self.is_trig() {
            return self
                .trig_attr
                .lock()
                .expect("trig attr lock poisoned")
                .clone()
                .ok_or_else(|| {
                    ExecError::Protocol(format!(
                        "trigger port {} has no pending attribute",
                        self.name()
                    ))
                });
        }
        let source = self.source().ok_or_else(|| {
            ExecError::PortExpired(format!("{} lost its source", self.name()))
        })?;
        Ok(source.item().attribute())
    }

    /// Release the hold registered by the caught notification.
    pub(crate) fn release_after_catch(&self) {
        if self.is_trig() {
            return;
        }
        if let Some(source) = self.source() {
            source.dec_user();
        }
    }

    /// Release a notification that was never caught (task failed to
    /// start, queue purge). Safe to call when nothing is pending.
    pub(crate) fn release_on_failure(&self) {
        if self.new_data.swap(false, Ordering::AcqRel) && !self.is_trig() {
            if let Some(source) = self.source() {
                source.dec_user();
            }
        }
    }

    /// Drop the extra hold of a repeated notification whose task was
    /// merged at enqueue time: one catch will satisfy both notifications.
    pub(crate) fn collapse_duplicate_hold(&self) {
        if self.is_trig() {
            return;
        }
        if let Some(source) = self.source() {
            source.dec_user();
        }
    }

    /// Forget any pending notification. Part of the module reset path.
    pub(crate) fn reset_cycle(&self) {
        self.new_data.store(false, Ordering::Release);
        *self.trig_attr.lock().expect("trig attr lock poisoned") = None;
        self.seq_events
            .lock()
            .expect("seq events lock poisoned")
            .clear();
    }

    // -- Sequence binding ---------------------------------------------------

    /// Deliver a sequence start / end event over the seq binding.
    pub(crate) fn push_seq_event(&self, attr: DataAttribute) {
        self.seq_events
            .lock()
            .expect("seq events lock poisoned")
            .push(attr);
    }

    /// Drain the sequence events received since the last call.
    pub fn take_seq_events(&self) -> Vec<DataAttribute> {
        std::mem::take(
            &mut *self
                .seq_events
                .lock()
                .expect("seq events lock poisoned"),
        )
    }

    // -- Target activation --------------------------------------------------

    /// Create a task on the owning module, triggered by this port.
    ///
    /// On registration failure (graph cancelling) the pending input data
    /// is released before the error is returned.
    pub(crate) async fn run_target(self: &Arc<Self>, sync_allowed: bool) -> ExecResult<()> {
        let module = match self.parent() {
            Ok(m) => m,
            Err(e) => {
                self.release_on_failure();
                return Err(e);
            }
        };
        let task = ModuleTask::new(&module, Some(self.index()));
        if let Err(e) = module.scheduler_ref().register_new_module_task(&task) {
            self.release_on_failure();
            return Err(e);
        }
        module.enqueue_task(task, sync_allowed).await
    }
}

impl std::fmt::Debug for InPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InPort")
            .field("name", &self.info.name())
            .field("kind", &self.kind)
            .field("plugged", &self.has_source())
            .field("expired", &self.expired)
            .finish()
    }
}

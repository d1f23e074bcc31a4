use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{Notify, OwnedMutexGuard, OwnedRwLockWriteGuard};

use fb_core::error::{ExecError, ExecResult};
use fb_core::item::DataItem;
use fb_core::value::{Value, ValueType};

use crate::data_logger::DataLogger;
use crate::module::Module;
use crate::port::{InPort, PortInfo};

// ---------------------------------------------------------------------------
// OutPort
// ---------------------------------------------------------------------------

struct SourceLinks {
    targets: Vec<Weak<InPort>>,
    seq_targets: Vec<Weak<InPort>>,
    loggers: Vec<Arc<dyn DataLogger>>,
}

/// Data source endpoint: owns the published [`DataItem`], the bound
/// targets, and the per-cycle hold counter that implements backpressure.
///
/// Per cycle: the producer reserves the port (FIFO, and only once every
/// hold from the previous cycle is released), writes through the exclusive
/// write guard, then notifies. Notification registers one hold per bound
/// data target and per logger; the next reserve blocks until all of them
/// released.
pub struct OutPort {
    info: PortInfo,
    item: DataItem,
    links: Mutex<SourceLinks>,
    users: AtomicUsize,
    drained: Notify,
    reserve: Arc<tokio::sync::Mutex<()>>,
    expired: bool,
}

/// The reservation of one out-port: the FIFO slot plus the exclusive
/// write guard. The guard is surrendered at notify time; the slot is held
/// until the notification has been dispatched to every target.
pub struct ReservedOut {
    pub(crate) _slot: Option<OwnedMutexGuard<()>>,
    pub(crate) guard: Option<OwnedRwLockWriteGuard<Value>>,
}

impl OutPort {
    pub(crate) fn new(
        parent: Weak<Module>,
        name: &str,
        description: &str,
        ty: ValueType,
        index: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            info: PortInfo::new(parent, name, description, index),
            item: DataItem::new(ty),
            links: Mutex::new(SourceLinks {
                targets: Vec::new(),
                seq_targets: Vec::new(),
                loggers: Vec::new(),
            }),
            users: AtomicUsize::new(0),
            drained: Notify::new(),
            reserve: Arc::new(tokio::sync::Mutex::new(())),
            expired: false,
        })
    }

    /// The sentinel standing in for a deleted out-port.
    pub(crate) fn expired_sentinel() -> Arc<Self> {
        Arc::new(Self {
            info: PortInfo::expired("emptyOut"),
            item: DataItem::new(ValueType::Int32),
            links: Mutex::new(SourceLinks {
                targets: Vec::new(),
                seq_targets: Vec::new(),
                loggers: Vec::new(),
            }),
            users: AtomicUsize::new(0),
            drained: Notify::new(),
            reserve: Arc::new(tokio::sync::Mutex::new(())),
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

    pub fn parent(&self) -> ExecResult<Arc<Module>> {
        self.check_live()?;
        self.info.parent()
    }

    pub fn value_type(&self) -> ValueType {
        self.item.value_type()
    }

    pub(crate) fn item(&self) -> &DataItem {
        &self.item
    }

    pub(crate) fn check_live(&self) -> ExecResult<()> {
        if self.expired {
            return Err(ExecError::PortExpired(self.info.name().to_string()));
        }
        Ok(())
    }

    // -- Reservation & backpressure ----------------------------------------

    /// Queue for the port's write slot.
    ///
    /// Strictly FIFO across producers; resolves only once every hold from
    /// the previous cycle has been released and the previous writer is
    /// gone.
    pub(crate) async fn reserve(&self) -> ExecResult<ReservedOut> {
        self.check_live()?;
        let slot = Arc::clone(&self.reserve).lock_owned().await;
        loop {
            // Register the waiter before re-checking the counter, so a
            // release between the check and the await is never missed.
            let mut drained = std::pin::pin!(self.drained.notified());
            drained.as_mut().enable();
            if self.users.load(Ordering::Acquire) == 0 {
                break;
            }
            drained.await;
        }
        let guard = self.item.write_owned().await;
        Ok(ReservedOut {
            _slot: Some(slot),
            guard: Some(guard),
        })
    }

    /// Targets and loggers still holding the current value.
    pub fn user_count(&self) -> usize {
        self.users.load(Ordering::Acquire)
    }

    pub(crate) fn inc_user(&self) {
        self.users.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn dec_user(&self) {
        let previous = self.users.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "out-port user count underflow");
        if previous == 1 {
            self.drained.notify_waiters();
        }
    }

    /// Drop every outstanding hold. Part of the module reset path, after
    /// a cancellation may have interrupted a publish mid-flight.
    pub(crate) fn reset_cycle(&self) {
        self.users.store(0, Ordering::Release);
        self.drained.notify_waiters();
    }

    // -- Binding tables (mutated by the dispatcher only) -------------------

    pub(crate) fn add_target(&self, target: &Arc<InPort>) {
        self.links
            .lock()
            .expect("out-port links lock poisoned")
            .targets
            .push(Arc::downgrade(target));
    }

    pub(crate) fn remove_target(&self, target: &Arc<InPort>) {
        self.links
            .lock()
            .expect("out-port links lock poisoned")
            .targets
            .retain(|w| w.upgrade().is_some_and(|t| !Arc::ptr_eq(&t, target)));
    }

    pub(crate) fn add_seq_target(&self, target: &Arc<InPort>) {
        self.links
            .lock()
            .expect("out-port links lock poisoned")
            .seq_targets
            .push(Arc::downgrade(target));
    }

    pub(crate) fn remove_seq_target(&self, target: &Arc<InPort>) {
        self.links
            .lock()
            .expect("out-port links lock poisoned")
            .seq_targets
            .retain(|w| w.upgrade().is_some_and(|t| !Arc::ptr_eq(&t, target)));
    }

    pub(crate) fn add_logger(&self, logger: Arc<dyn DataLogger>) {
        self.links
            .lock()
            .expect("out-port links lock poisoned")
            .loggers
            .push(logger);
    }

    pub(crate) fn clear_loggers(&self) {
        self.links
            .lock()
            .expect("out-port links lock poisoned")
            .loggers
            .clear();
    }

    pub(crate) fn clear_targets(&self) {
        let mut links = self.links.lock().expect("out-port links lock poisoned");
        links.targets.clear();
        links.seq_targets.clear();
    }

    /// Snapshot of the live bindings; new binds after the snapshot do not
    /// retroactively receive the notification being dispatched.
    #[allow(clippy::type_complexity)]
    pub(crate) fn snapshot(
        &self,
    ) -> (Vec<Arc<InPort>>, Vec<Arc<InPort>>, Vec<Arc<dyn DataLogger>>) {
        let links = self.links.lock().expect("out-port links lock poisoned");
        (
            links.targets.iter().filter_map(Weak::upgrade).collect(),
            links.seq_targets.iter().filter_map(Weak::upgrade).collect(),
            links.loggers.clone(),
        )
    }

    /// Number of live bound data targets.
    pub fn target_count(&self) -> usize {
        self.links
            .lock()
            .expect("out-port links lock poisoned")
            .targets
            .iter()
            .filter(|w| w.upgrade().is_some())
            .count()
    }
}

impl std::fmt::Debug for OutPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutPort")
            .field("name", &self.info.name())
            .field("type", &self.value_type())
            .field("users", &self.users.load(Ordering::Relaxed))
            .field("expired", &self.expired)
            .finish()
    }
}

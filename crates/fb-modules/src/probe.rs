use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use fb_core::attribute::DataAttribute;
use fb_core::error::{ExecError, ExecResult};
use fb_core::value::{Value, ValueType};
use fb_runtime::{Module, ModuleHost, PortLayout, ProcessCtx, Processor, StartCondition};

// ---------------------------------------------------------------------------
// Probe
// ---------------------------------------------------------------------------

/// Shared view on a [`probe`] module's observations.
#[derive(Clone, Default)]
pub struct ProbeHandle {
    records: Arc<Mutex<Vec<(Value, DataAttribute)>>>,
    cancel_calls: Arc<AtomicUsize>,
    reset_calls: Arc<AtomicUsize>,
}

impl ProbeHandle {
    pub fn records(&self) -> Vec<(Value, DataAttribute)> {
        self.records.lock().expect("probe records poisoned").clone()
    }

    pub fn values(&self) -> Vec<Value> {
        self.records
            .lock()
            .expect("probe records poisoned")
            .iter()
            .map(|(v, _)| v.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("probe records poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of forced-cancellation hook invocations.
    pub fn cancel_calls(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    pub fn reset_calls(&self) -> usize {
        self.reset_calls.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.records.lock().expect("probe records poisoned").clear();
    }
}

struct Probe {
    handle: ProbeHandle,
    latency: Duration,
}

#[async_trait]
impl Processor for Probe {
    async fn process(&self, ctx: &mut ProcessCtx<'_>, start: StartCondition) -> ExecResult<()> {
        if start == StartCondition::NoData {
            return Ok(());
        }
        ctx.lock_in_port(0).await?;
        // Hold the input for the whole latency so a slow sink pushes back
        // on its producer.
        if !self.latency.is_zero() && ctx.sleep(self.latency).await {
            return Err(ExecError::Cancelled);
        }
        let value = ctx.in_value(0)?.clone();
        let attr = ctx.in_attribute(0)?;
        ctx.release_all_in_ports();

        self.handle
            .records
            .lock()
            .expect("probe records poisoned")
            .push((value, attr));
        Ok(())
    }

    fn cancel(&self) {
        self.handle.cancel_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn reset(&self) {
        self.handle.reset_calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Terminal sink recording every received value together with its
/// attribute. `latency` simulates a slow consumer.
pub fn probe(
    host: &ModuleHost,
    name: &str,
    ty: ValueType,
    latency: Duration,
) -> ExecResult<(Arc<Module>, ProbeHandle)> {
    let handle = ProbeHandle::default();
    let layout = PortLayout::new().in_data("in", "value to record", ty);
    let module = Module::create(
        host,
        name,
        "records every received value for inspection",
        layout,
        Box::new(Probe {
            handle: handle.clone(),
            latency,
        }),
    )?;
    Ok((module, handle))
}

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use fb_core::attribute::DataAttribute;
use fb_core::error::{ExecError, ExecResult};
use fb_core::value::{Value, ValueType};
use fb_runtime::{Module, ModuleHost, PortLayout, ProcessCtx, Processor, StartCondition};

// ---------------------------------------------------------------------------
// ValueGen
// ---------------------------------------------------------------------------

/// Configuration of a [`value_gen`] module.
#[derive(Debug, Clone)]
pub struct ValueGenConfig {
    /// The series to emit, in order. One run emits the whole series.
    pub values: Vec<Value>,
    /// Pause between two emissions. Zero emits as fast as the consumers
    /// allow (backpressure still applies at the out-port reservation).
    pub interval: Duration,
    /// Bracket the series as one sequence (start / end flags, indices).
    pub sequenced: bool,
    /// Sequence identifier to use; a fresh one is reserved per run when
    /// unset.
    pub seq_id: Option<u64>,
}

impl Default for ValueGenConfig {
    fn default() -> Self {
        Self {
            values: Vec::new(),
            interval: Duration::ZERO,
            sequenced: true,
            seq_id: None,
        }
    }
}

struct ValueGen {
    config: ValueGenConfig,
    running: AtomicBool,
}

#[async_trait]
impl Processor for ValueGen {
    async fn process(&self, ctx: &mut ProcessCtx<'_>, _start: StartCondition) -> ExecResult<()> {
        self.running.store(true, Ordering::SeqCst);
        let result = self.emit_series(ctx).await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    fn reset(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn seq_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl ValueGen {
    async fn emit_series(&self, ctx: &mut ProcessCtx<'_>) -> ExecResult<()> {
        // The trigger conveys nothing but the go signal.
        ctx.release_all_in_ports();

        let total = self.config.values.len();
        let seq_id = self
            .config
            .seq_id
            .unwrap_or_else(DataAttribute::next_sequence_id);

        for (i, value) in self.config.values.iter().enumerate() {
            ctx.reserve_out_ports(&[0]).await?;
            ctx.write_out(0, value.clone())?;
            let attr = if self.config.sequenced {
                DataAttribute::with_sequence(seq_id, i as u64, i == 0, i + 1 == total)
            } else {
                DataAttribute::new()
            };
            ctx.notify_out_port_ready(0, attr).await?;
            ctx.set_progress((i + 1) as f32 / total.max(1) as f32);

            if !self.config.interval.is_zero() && ctx.sleep(self.config.interval).await {
                return Err(ExecError::Cancelled);
            }
        }
        Ok(())
    }
}

/// Source module emitting a configured series of values.
///
/// One run (triggered or requested through `run_module`) emits the whole
/// series on the `data` out-port. The optional `trig` input starts a run
/// from an upstream event.
pub fn value_gen(
    host: &ModuleHost,
    name: &str,
    ty: ValueType,
    config: ValueGenConfig,
) -> ExecResult<Arc<Module>> {
    for value in &config.values {
        value.check_type(ty)?;
    }
    let layout = PortLayout::new()
        .in_trig("trig", "starts one emission run")
        .out("data", "the emitted series", ty);
    Module::create(
        host,
        name,
        "emits a configured series of values as a sequence",
        layout,
        Box::new(ValueGen {
            config,
            running: AtomicBool::new(false),
        }),
    )
}

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use fb_core::error::{ExecError, ExecResult};
use fb_core::value::ValueType;
use fb_runtime::{Module, ModuleHost, PortLayout, ProcessCtx, Processor, StartCondition};

// ---------------------------------------------------------------------------
// Delayer
// ---------------------------------------------------------------------------

struct Delayer {
    delay: Duration,
}

#[async_trait]
impl Processor for Delayer {
    async fn process(&self, ctx: &mut ProcessCtx<'_>, start: StartCondition) -> ExecResult<()> {
        if start == StartCondition::NoData {
            tracing::warn!(target: "fb::flow", module = %ctx.module_name(), "nothing to forward");
            return Ok(());
        }

        ctx.lock_in_port(0).await?;
        let value = ctx.in_value(0)?.clone();
        let attr = ctx.in_attribute(0)?;
        ctx.release_all_in_ports();

        if !self.delay.is_zero() && ctx.sleep(self.delay).await {
            return Err(ExecError::Cancelled);
        }

        ctx.reserve_out_ports(&[0]).await?;
        ctx.write_out(0, value)?;
        ctx.notify_out_port_ready(0, attr).await?;
        Ok(())
    }
}

/// Pass-through proxy forwarding each input value unchanged after a
/// configurable latency. The attribute travels with the value, so
/// sequences survive the hop.
pub fn delayer(
    host: &ModuleHost,
    name: &str,
    ty: ValueType,
    delay: Duration,
) -> ExecResult<Arc<Module>> {
    let layout = PortLayout::new()
        .in_data("in", "value to forward", ty)
        .out("out", "the forwarded value", ty);
    Module::create(
        host,
        name,
        "forwards its input unchanged after a configurable delay",
        layout,
        Box::new(Delayer { delay }),
    )
}

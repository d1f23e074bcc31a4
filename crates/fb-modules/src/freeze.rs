use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use fb_core::error::{ExecError, ExecResult};
use fb_runtime::{Module, ModuleHost, PortLayout, ProcessCtx, Processor, StartCondition};

// ---------------------------------------------------------------------------
// Freeze
// ---------------------------------------------------------------------------

/// Demo processor that deliberately makes no progress: it spins on the
/// cancel event forever. Exercises the watchdog's frozen-graph detection.
struct Freeze;

#[async_trait]
impl Processor for Freeze {
    async fn process(&self, ctx: &mut ProcessCtx<'_>, _start: StartCondition) -> ExecResult<()> {
        loop {
            if ctx.sleep(Duration::from_millis(20)).await {
                return Err(ExecError::Cancelled);
            }
        }
    }
}

/// Module whose run never completes on its own; only a cancellation
/// (typically the watchdog's) stops it.
pub fn freeze(host: &ModuleHost, name: &str) -> ExecResult<Arc<Module>> {
    Module::create(
        host,
        name,
        "loops without progress until cancelled",
        PortLayout::new(),
        Box::new(Freeze),
    )
}

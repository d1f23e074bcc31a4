use std::sync::Arc;

use async_trait::async_trait;

use fb_core::attribute::DataAttribute;
use fb_core::error::{ExecError, ExecResult};
use fb_core::value::ValueType;
use fb_runtime::{Module, ModuleHost, PortLayout, ProcessCtx, Processor, StartCondition};

// ---------------------------------------------------------------------------
// UnstackArray
// ---------------------------------------------------------------------------

struct UnstackArray;

#[async_trait]
impl Processor for UnstackArray {
    async fn process(&self, ctx: &mut ProcessCtx<'_>, start: StartCondition) -> ExecResult<()> {
        if start == StartCondition::NoData {
            return Ok(());
        }
        ctx.lock_in_port(0).await?;
        let elements = ctx.in_value(0)?.unstack()?;
        ctx.release_all_in_ports();

        let total = elements.len();
        let seq_id = DataAttribute::next_sequence_id();
        for (i, element) in elements.into_iter().enumerate() {
            ctx.reserve_out_ports(&[0]).await?;
            ctx.write_out(0, element)?;
            let attr = DataAttribute::with_sequence(seq_id, i as u64, i == 0, i + 1 == total);
            ctx.notify_out_port_ready(0, attr).await?;
            if ctx.yield_now().await {
                return Err(ExecError::Cancelled);
            }
        }
        Ok(())
    }
}

/// Inverse of the accumulator: emits one sequence item per element of an
/// incoming vector value, freshly bracketed as a sequence.
pub fn unstack_array(
    host: &ModuleHost,
    name: &str,
    elem_ty: ValueType,
) -> ExecResult<Arc<Module>> {
    let vec_ty = elem_ty.vector_of().ok_or_else(|| {
        ExecError::DataFormat(format!("no vector counterpart for {elem_ty}"))
    })?;
    let layout = PortLayout::new()
        .in_data("in", "vector to unstack", vec_ty)
        .out("items", "one item per vector element", elem_ty);
    Module::create(
        host,
        name,
        "unstacks a vector value into a sequence of scalars",
        layout,
        Box::new(UnstackArray),
    )
}

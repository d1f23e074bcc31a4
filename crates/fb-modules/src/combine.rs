use std::sync::Arc;

use async_trait::async_trait;

use fb_core::error::{ExecError, ExecResult};
use fb_core::value::{Value, ValueType};
use fb_runtime::{Module, ModuleHost, PortLayout, ProcessCtx, Processor, StartCondition};

// ---------------------------------------------------------------------------
// PairCombiner
// ---------------------------------------------------------------------------

struct PairCombiner {
    elem_ty: ValueType,
}

#[async_trait]
impl Processor for PairCombiner {
    async fn process(&self, ctx: &mut ProcessCtx<'_>, start: StartCondition) -> ExecResult<()> {
        if start != StartCondition::AllData {
            return Err(ExecError::ModuleFailure(format!(
                "{}: both inputs must be plugged",
                ctx.module_name()
            )));
        }

        ctx.lock_in_port(0).await?;
        ctx.lock_in_port(1).await?;
        let pair = vec![ctx.in_value(0)?.clone(), ctx.in_value(1)?.clone()];
        // The fan-in rule: the pair's attribute is the element-wise merge
        // of both inputs' attributes.
        let attr = ctx.combined_in_attribute()?;
        ctx.release_all_in_ports();

        let stacked = Value::stack(self.elem_ty, &pair)?;
        ctx.reserve_out_ports(&[0]).await?;
        ctx.write_out(0, stacked)?;
        ctx.notify_out_port_ready(0, attr).await?;
        Ok(())
    }
}

/// Two-input fan-in: concatenates the pair of scalar inputs into one
/// vector value, merging their sequence attributes.
pub fn pair_combiner(
    host: &ModuleHost,
    name: &str,
    elem_ty: ValueType,
) -> ExecResult<Arc<Module>> {
    let vec_ty = elem_ty.vector_of().ok_or_else(|| {
        ExecError::DataFormat(format!("no vector counterpart for {elem_ty}"))
    })?;
    let layout = PortLayout::new()
        .in_data("a", "first element of the pair", elem_ty)
        .in_data("b", "second element of the pair", elem_ty)
        .out("pair", "the concatenated pair", vec_ty);
    Module::create(
        host,
        name,
        "concatenates pairs of inputs into vectors, merging sequence attributes",
        layout,
        Box::new(PairCombiner { elem_ty }),
    )
}

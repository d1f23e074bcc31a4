use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use fb_core::attribute::DataAttribute;
use fb_core::error::{ExecError, ExecResult};
use fb_core::value::{Value, ValueType};
use fb_runtime::{Module, ModuleHost, PortLayout, ProcessCtx, Processor, StartCondition};

// ---------------------------------------------------------------------------
// SeqAccumulator
// ---------------------------------------------------------------------------

struct SeqAccumulator {
    elem_ty: ValueType,
    buffer: Mutex<Vec<Value>>,
}

#[async_trait]
impl Processor for SeqAccumulator {
    async fn process(&self, ctx: &mut ProcessCtx<'_>, start: StartCondition) -> ExecResult<()> {
        if start == StartCondition::NoData {
            return Ok(());
        }
        ctx.lock_in_port(0).await?;
        let value = ctx.in_value(0)?.clone();
        let attr = ctx.in_attribute(0)?;
        ctx.release_all_in_ports();

        let finished = {
            let mut buffer = self.buffer.lock().expect("accumulator buffer poisoned");
            buffer.push(value);
            attr.ends_all_sequences()
        };
        if !finished {
            return Ok(());
        }

        let elements = std::mem::take(
            &mut *self.buffer.lock().expect("accumulator buffer poisoned"),
        );
        let stacked = Value::stack(self.elem_ty, &elements)?;
        ctx.reserve_out_ports(&[0]).await?;
        ctx.write_out(0, stacked)?;
        ctx.notify_out_port_ready(0, DataAttribute::new()).await?;
        Ok(())
    }

    fn cancel(&self) {
        self.buffer
            .lock()
            .expect("accumulator buffer poisoned")
            .clear();
    }

    fn reset(&self) {
        self.buffer
            .lock()
            .expect("accumulator buffer poisoned")
            .clear();
    }

    fn seq_running(&self) -> bool {
        !self
            .buffer
            .lock()
            .expect("accumulator buffer poisoned")
            .is_empty()
    }
}

/// Accumulates a whole sequence of scalar values and emits them as one
/// vector value when the end-of-sequence bracket arrives.
pub fn seq_accumulator(
    host: &ModuleHost,
    name: &str,
    elem_ty: ValueType,
) -> ExecResult<Arc<Module>> {
    let vec_ty = elem_ty.vector_of().ok_or_else(|| {
        ExecError::DataFormat(format!("no vector counterpart for {elem_ty}"))
    })?;
    let layout = PortLayout::new()
        .in_data("in", "sequence elements", elem_ty)
        .out("stack", "the accumulated sequence", vec_ty);
    Module::create(
        host,
        name,
        "accumulates a sequence into one vector value",
        layout,
        Box::new(SeqAccumulator {
            elem_ty,
            buffer: Mutex::new(Vec::new()),
        }),
    )
}

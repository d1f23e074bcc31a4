use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use fb_core::error::{ExecError, ExecResult};

use crate::task::TaskCore;

/// Poll period while waiting for externally bound parameters.
const PARAM_POLL: Duration = Duration::from_millis(10);

// ---------------------------------------------------------------------------
// ParamValue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Str(String),
}

// ---------------------------------------------------------------------------
// ParamSet
// ---------------------------------------------------------------------------

struct ParamSlot {
    value: Option<ParamValue>,
    external: bool,
}

/// Parameter holder of one module.
///
/// A parameter declared *external* has no default and must be assigned
/// from outside (UI, script) before the module may process; the task
/// execution path blocks in [`wait_ready`](Self::wait_ready) until every
/// external parameter has a value, honouring cancellation.
#[derive(Default)]
pub struct ParamSet {
    slots: Mutex<HashMap<String, ParamSlot>>,
}

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a parameter with an optional default value.
    pub fn declare(&self, name: &str, default: Option<ParamValue>) {
        self.slots.lock().expect("param lock poisoned").insert(
            name.to_string(),
            ParamSlot {
                value: default,
                external: false,
            },
        );
    }

    /// Declare a parameter that must be assigned externally before any run.
    pub fn declare_external(&self, name: &str) {
        self.slots.lock().expect("param lock poisoned").insert(
            name.to_string(),
            ParamSlot {
                value: None,
                external: true,
            },
        );
    }

    pub fn set(&self, name: &str, value: ParamValue) -> ExecResult<()> {
        let mut slots = self.slots.lock().expect("param lock poisoned");
        match slots.get_mut(name) {
            Some(slot) => {
                slot.value = Some(value);
                Ok(())
            }
            None => Err(ExecError::Registry(format!(
                "unknown parameter {name:?}"
            ))),
        }
    }

    pub fn get(&self, name: &str) -> Option<ParamValue> {
        self.slots
            .lock()
            .expect("param lock poisoned")
            .get(name)
            .and_then(|s| s.value.clone())
    }

    fn all_external_ready(&self) -> bool {
        self.slots
            .lock()
            .expect("param lock poisoned")
            .values()
            .all(|s| !s.external || s.value.is_some())
    }

    /// Block until every external parameter is available, checking the
    /// task's cancel event between polls.
    pub(crate) async fn wait_ready(&self, task: &TaskCore) -> ExecResult<()> {
        loop {
            if self.all_external_ready() {
                return Ok(());
            }
            if task.sleep(PARAM_POLL).await {
                return Err(ExecError::Cancelled);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn defaults_and_overrides() {
        let params = ParamSet::new();
        params.declare("gain", Some(ParamValue::Float(1.0)));
        assert_eq!(params.get("gain"), Some(ParamValue::Float(1.0)));
        params.set("gain", ParamValue::Float(2.5)).unwrap();
        assert_eq!(params.get("gain"), Some(ParamValue::Float(2.5)));
        assert!(params.set("nope", ParamValue::Int(0)).is_err());
    }

    #[tokio::test]
    async fn wait_ready_blocks_until_external_set() {
        let params = Arc::new(ParamSet::new());
        params.declare_external("exposure");
        let task = TaskCore::new("t".into());
        assert!(!params.all_external_ready());

        let p = Arc::clone(&params);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            p.set("exposure", ParamValue::Int(12)).unwrap();
        });
        params.wait_ready(&task).await.unwrap();
        assert_eq!(params.get("exposure"), Some(ParamValue::Int(12)));
    }

    #[tokio::test]
    async fn wait_ready_honours_cancellation() {
        let params = ParamSet::new();
        params.declare_external("never");
        let task = TaskCore::new("t".into());
        task.transition(crate::task::TaskState::Cancelling).unwrap();
        task.cancel_token().cancel();
        assert!(matches!(
            params.wait_ready(&task).await,
            Err(ExecError::Cancelled)
        ));
    }
}

//! Typed endpoints of the inter-module data edges.
//!
//! An [`OutPort`] publishes values, an [`InPort`] consumes them. Binding
//! mutation goes exclusively through the [`Dispatcher`](crate::Dispatcher);
//! the ports themselves only hold their half of the relation.

mod in_port;
mod out_port;

pub use in_port::{InPort, InPortKind};
pub use out_port::{OutPort, ReservedOut};

use std::sync::Weak;

use fb_core::error::{ExecError, ExecResult};

use crate::module::Module;

// ---------------------------------------------------------------------------
// PortInfo — shared identity of both port kinds
// ---------------------------------------------------------------------------

pub struct PortInfo {
    name: String,
    description: String,
    index: usize,
    parent: Weak<Module>,
}

impl PortInfo {
    pub(crate) fn new(parent: Weak<Module>, name: &str, description: &str, index: usize) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            index,
            parent,
        }
    }

    /// Identity of the expired sentinels: no parent, index 0.
    pub(crate) fn expired(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: "replaces an expired port".to_string(),
            index: 0,
            parent: Weak::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn parent(&self) -> ExecResult<std::sync::Arc<Module>> {
        self.parent
            .upgrade()
            .ok_or_else(|| ExecError::PortExpired(self.name.clone()))
    }
}

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use fb_core::error::{ExecError, ExecResult};

use crate::module::Module;

// ---------------------------------------------------------------------------
// ModuleRegistry
// ---------------------------------------------------------------------------

/// Owns the live modules and enforces the two name spaces: the
/// user-supplied custom name and the generated internal name, both
/// globally unique.
pub struct ModuleRegistry {
    modules: RwLock<HashMap<String, Arc<Module>>>,
    internal_names: Mutex<HashSet<String>>,
    next_internal: AtomicU64,
}

impl ModuleRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            modules: RwLock::new(HashMap::new()),
            internal_names: Mutex::new(HashSet::new()),
            next_internal: AtomicU64::new(0),
        })
    }

    /// Allowed characters for module names: alphanumerics, `.`, `_`, `-`.
    pub(crate) fn check_name(name: &str) -> ExecResult<()> {
        if name.is_empty() {
            return Err(ExecError::Registry("empty module name".to_string()));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return Err(ExecError::Registry(format!(
                "module name {name:?} contains illegal characters"
            )));
        }
        Ok(())
    }

    /// Reserve a fresh internal name derived from `base`.
    pub(crate) fn claim_internal_name(&self, base: &str) -> String {
        let mut names = self
            .internal_names
            .lock()
            .expect("internal names lock poisoned");
        loop {
            let n = self.next_internal.fetch_add(1, Ordering::Relaxed);
            let candidate = format!("{base}{n}");
            if names.insert(candidate.clone()) {
                return candidate;
            }
        }
    }

    pub(crate) fn free_internal_name(&self, name: &str) {
        self.internal_names
            .lock()
            .expect("internal names lock poisoned")
            .remove(name);
    }

    /// Register a freshly constructed module under its custom name.
    pub(crate) fn register(&self, module: &Arc<Module>) -> ExecResult<()> {
        let mut modules = self.modules.write().expect("modules lock poisoned");
        if modules.contains_key(module.name()) {
            return Err(ExecError::Registry(format!(
                "module name {:?} already in use",
                module.name()
            )));
        }
        modules.insert(module.name().to_string(), Arc::clone(module));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Module>> {
        self.modules
            .read()
            .expect("modules lock poisoned")
            .get(name)
            .cloned()
    }

    /// Drop a module from the registry. The caller is responsible for
    /// having quiesced it and for detaching its ports via the dispatcher.
    pub fn remove(&self, name: &str) -> Option<Arc<Module>> {
        let removed = self
            .modules
            .write()
            .expect("modules lock poisoned")
            .remove(name);
        if let Some(module) = &removed {
            self.free_internal_name(module.internal_name());
        }
        removed
    }

    pub fn names(&self) -> Vec<String> {
        self.modules
            .read()
            .expect("modules lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.modules.read().expect("modules lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when every registered module has quiesced (no running tasks,
    /// no pending cancellation).
    pub fn all_ready(&self) -> bool {
        self.modules
            .read()
            .expect("modules lock poisoned")
            .values()
            .all(|m| m.module_ready())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

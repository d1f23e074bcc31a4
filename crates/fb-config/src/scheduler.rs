use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// SchedulerConfig
// ---------------------------------------------------------------------------

/// Scheduler (worker pool) configuration. All fields have defaults so the
/// whole `[scheduler]` section may be omitted from `flowbench.toml`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Upper bound on module tasks executing concurrently. Excess tasks
    /// queue until a slot frees up.
    pub max_parallel_tasks: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_parallel_tasks: 64,
        }
    }
}

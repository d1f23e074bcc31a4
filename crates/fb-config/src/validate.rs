use anyhow::{Result, bail};

use crate::bench::BenchConfig;

/// Cross-field validation run after TOML parsing.
pub fn validate(config: &BenchConfig) -> Result<()> {
    if config.scheduler.max_parallel_tasks == 0 {
        bail!("scheduler.max_parallel_tasks must be at least 1");
    }

    if config.watchdog.timeout.as_duration().is_zero() {
        bail!("watchdog.timeout must be non-zero");
    }

    Ok(())
}

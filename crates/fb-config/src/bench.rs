use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::logging::LoggingConfig;
use crate::scheduler::SchedulerConfig;
use crate::validate;
use crate::watchdog::WatchdogConfig;

// ---------------------------------------------------------------------------
// BenchConfig — top-level flowbench.toml
// ---------------------------------------------------------------------------

/// Resolved, validated engine configuration loaded from `flowbench.toml`.
///
/// Every section has defaults, so an empty file is a valid configuration:
/// 64 parallel task slots, watchdog disabled, plain stderr logging.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    pub scheduler: SchedulerConfig,
    pub watchdog: WatchdogConfig,
    pub logging: LoggingConfig,
}

impl BenchConfig {
    /// Read and parse a `flowbench.toml` file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.as_ref().display()))?;
        content.parse()
    }
}

impl FromStr for BenchConfig {
    type Err = anyhow::Error;

    /// Parse a TOML string into a validated [`BenchConfig`].
    fn from_str(toml_str: &str) -> anyhow::Result<Self> {
        let config: BenchConfig = toml::from_str(toml_str)?;
        validate::validate(&config)?;
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

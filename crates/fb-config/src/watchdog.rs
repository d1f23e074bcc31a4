use serde::{Deserialize, Serialize};

use crate::types::HumanDuration;

// ---------------------------------------------------------------------------
// WatchdogConfig
// ---------------------------------------------------------------------------

/// Watchdog configuration.
///
/// The watchdog periodically samples the live task set and the pool usage;
/// when neither changes across two consecutive ticks it declares the graph
/// frozen and cancels everything.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Whether to start the watchdog at engine bootstrap.
    pub enabled: bool,
    /// Sampling period. Two identical consecutive samples trigger the
    /// frozen-graph cancellation.
    pub timeout: HumanDuration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout: std::time::Duration::from_secs(5).into(),
        }
    }
}

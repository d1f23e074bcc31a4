use std::path::PathBuf;

use serde::Deserialize;

// ---------------------------------------------------------------------------
// LoggingConfig
// ---------------------------------------------------------------------------

/// Logging configuration.
///
/// The runtime logs through five fixed domain targets (`fb::sys`,
/// `fb::task`, `fb::flow`, `fb::port`, `fb::conf`); each domain's
/// severity can be raised or lowered independently of the base level.
/// All fields have defaults so the `[logging]` section may be omitted
/// from `flowbench.toml`.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Base severity applied everywhere (e.g. `"info"`, `"debug"`).
    pub level: String,
    /// Per-domain severity overrides, e.g. `[logging.domains] port = "trace"`.
    pub domains: DomainLevels,
    /// Optional log file. Relative paths resolve against the config
    /// file's directory; stderr output stays active either way.
    pub file: Option<PathBuf>,
    /// Output format: `plain` (human-readable) or `json` (structured).
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            domains: DomainLevels::default(),
            file: None,
            format: LogFormat::Plain,
        }
    }
}

impl LoggingConfig {
    /// Build the tracing filter directives: the base level first, then
    /// one `fb::<domain>=<level>` directive per override.
    pub fn filter_directives(&self) -> String {
        let mut directives = self.level.clone();
        for (domain, level) in self.domains.overrides() {
            directives.push(',');
            directives.push_str("fb::");
            directives.push_str(domain);
            directives.push('=');
            directives.push_str(level);
        }
        directives
    }
}

// ---------------------------------------------------------------------------
// DomainLevels
// ---------------------------------------------------------------------------

/// Severity overrides for the runtime's log domains. Unset domains
/// follow the base level.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DomainLevels {
    /// Engine lifecycle, scheduler, watchdog.
    pub sys: Option<String>,
    /// Task state machine and lifecycle events.
    pub task: Option<String>,
    /// Module execution and process hooks.
    pub flow: Option<String>,
    /// Bindings, data exchange, dispatcher traversals.
    pub port: Option<String>,
    /// Configuration handling.
    pub conf: Option<String>,
}

impl DomainLevels {
    /// The overrides that are actually set, in a stable order.
    pub fn overrides(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("sys", self.sys.as_deref()),
            ("task", self.task.as_deref()),
            ("flow", self.flow.as_deref()),
            ("port", self.port.as_deref()),
            ("conf", self.conf.as_deref()),
        ]
        .into_iter()
        .filter_map(|(domain, level)| level.map(|l| (domain, l)))
    }
}

// ---------------------------------------------------------------------------
// LogFormat
// ---------------------------------------------------------------------------

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Plain,
    Json,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

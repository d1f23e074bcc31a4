pub mod bench;
pub mod logging;
pub mod scheduler;
pub mod types;
pub mod validate;
pub mod watchdog;

pub use bench::BenchConfig;
pub use logging::{LogFormat, LoggingConfig};
pub use scheduler::SchedulerConfig;
pub use types::HumanDuration;
pub use watchdog::WatchdogConfig;

#[macro_use]
mod log_macros;

pub mod data_logger;
pub mod dispatcher;
pub mod error;
pub mod lifecycle;
pub mod module;
pub mod module_task;
pub mod parameter;
pub mod port;
pub mod process;
pub mod registry;
pub mod scheduler;
pub mod task;
pub mod task_manager;
pub mod tracing_init;
pub mod watchdog;

pub use data_logger::{DataLogger, JsonlFileLogger, MemoryLogger};
pub use dispatcher::Dispatcher;
pub use lifecycle::{Engine, wait_for_signal};
pub use module::{CancelMode, Module, ModuleHost, PortLayout};
pub use module_task::{ModuleTask, RunningState};
pub use parameter::{ParamSet, ParamValue};
pub use port::{InPort, InPortKind, OutPort};
pub use process::{ProcessCtx, Processor, StartCondition};
pub use registry::ModuleRegistry;
pub use scheduler::Scheduler;
pub use task::{TaskId, TaskState};
pub use task_manager::{TaskEvent, TaskManager};

use std::sync::Arc;

use orion_error::op_context;
use orion_error::prelude::*;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use fb_config::BenchConfig;

use crate::dispatcher::Dispatcher;
use crate::error::{RuntimeReason, RuntimeResult};
use crate::module::ModuleHost;
use crate::registry::ModuleRegistry;
use crate::scheduler::Scheduler;
use crate::watchdog::WatchDog;

// ---------------------------------------------------------------------------
// Engine — top-level lifecycle handle
// ---------------------------------------------------------------------------

/// Manages the full lifecycle of the runtime: bootstrap, module hosting,
/// graph-wide shutdown and drain.
///
/// The engine owns the three core services (registry, dispatcher,
/// scheduler), the task event observer and the optional watchdog. Modules
/// are created against [`host`](Self::host) and wired through
/// [`dispatcher`](Self::dispatcher).
pub struct Engine {
    registry: Arc<ModuleRegistry>,
    dispatcher: Arc<Dispatcher>,
    scheduler: Arc<Scheduler>,
    observer: JoinHandle<()>,
    watchdog: Option<WatchDog>,
}

impl Engine {
    /// Bootstrap the runtime from a [`BenchConfig`].
    pub async fn start(config: BenchConfig) -> RuntimeResult<Self> {
        let mut op = op_context!("engine-bootstrap").with_auto_log();
        op.record(
            "pool",
            config.scheduler.max_parallel_tasks.to_string().as_str(),
        );

        let registry = ModuleRegistry::new();
        let dispatcher = Dispatcher::new();
        let scheduler = Scheduler::new(&config.scheduler);
        scheduler.bind_registry(&registry);
        let observer = scheduler.spawn_observer();

        let watchdog = config.watchdog.enabled.then(|| {
            WatchDog::spawn(
                Arc::clone(&scheduler),
                config.watchdog.timeout.as_duration(),
            )
        });

        fb_log!(info, sys,
            pool = config.scheduler.max_parallel_tasks,
            watchdog = config.watchdog.enabled,
            "engine bootstrap complete"
        );
        op.mark_suc();
        Ok(Self {
            registry,
            dispatcher,
            scheduler,
            observer,
            watchdog,
        })
    }

    /// The services a module is created against.
    pub fn host(&self) -> ModuleHost {
        ModuleHost {
            scheduler: Arc::clone(&self.scheduler),
            dispatcher: Arc::clone(&self.dispatcher),
            registry: Arc::clone(&self.registry),
        }
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Request graph-wide cancellation and wait for it to take effect.
    pub async fn shutdown(&self) {
        fb_log!(info, sys, "initiating graph shutdown");
        self.scheduler.cancel_all().await;
    }

    /// Drain the graph and tear the engine down.
    ///
    /// Surfaces a `Cancelled` or `ModuleFailure` reason when the drain
    /// was provoked by a cancellation wave or a failing module.
    pub async fn wait(mut self) -> RuntimeResult<()> {
        let outcome = self.scheduler.wait_all().await;
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.stop().await;
        }
        self.observer.abort();
        outcome.map_err(|e| {
            StructError::from(RuntimeReason::from_exec(&e)).with_detail(e.to_string())
        })
    }
}

// ---------------------------------------------------------------------------
// Signal integration
// ---------------------------------------------------------------------------

/// Register Ctrl-C (SIGINT) and SIGTERM handling; cancel the token on the
/// first signal received.
pub async fn wait_for_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to listen for SIGTERM");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                fb_log!(info, sys, signal = "SIGINT", "received signal, initiating shutdown");
            }
            _ = sigterm.recv() => {
                fb_log!(info, sys, signal = "SIGTERM", "received signal, initiating shutdown");
            }
            _ = cancel.cancelled() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                fb_log!(info, sys, "received shutdown signal, initiating shutdown");
            }
            _ = cancel.cancelled() => {}
        }
    }
    cancel.cancel();
}

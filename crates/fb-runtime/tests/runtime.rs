//! Scheduler-level integration: run requests, progress coalescing,
//! graph-wide cancellation and the engine lifecycle.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use fb_config::BenchConfig;
use fb_core::error::{ExecError, ExecResult};
use fb_runtime::{
    Engine, ModuleHost, PortLayout, ProcessCtx, Processor, StartCondition, TaskEvent, TaskState,
};

// ---------------------------------------------------------------------------
// Test processors
// ---------------------------------------------------------------------------

/// Counts its runs; optionally lingers after a cancellation request so
/// tests can observe the cancelling window.
struct Lingering {
    runs: Arc<AtomicUsize>,
    linger: Duration,
}

#[async_trait]
impl Processor for Lingering {
    async fn process(&self, ctx: &mut ProcessCtx<'_>, _start: StartCondition) -> ExecResult<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        loop {
            if ctx.sleep(Duration::from_millis(5)).await {
                // Simulate slow teardown before acknowledging the cancel.
                tokio::time::sleep(self.linger).await;
                return Err(ExecError::Cancelled);
            }
        }
    }
}

/// Runs once, reporting fine-grained progress faster than the
/// notification interval.
struct Chatty;

#[async_trait]
impl Processor for Chatty {
    async fn process(&self, ctx: &mut ProcessCtx<'_>, _start: StartCondition) -> ExecResult<()> {
        for i in 0..50 {
            ctx.set_progress(i as f32 / 50.0);
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        Ok(())
    }
}

/// Completes immediately, counting runs.
struct OneShot {
    runs: Arc<AtomicUsize>,
}

#[async_trait]
impl Processor for OneShot {
    async fn process(&self, _ctx: &mut ProcessCtx<'_>, _start: StartCondition) -> ExecResult<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

async fn engine(pool: usize) -> Engine {
    let mut config = BenchConfig::default();
    config.scheduler.max_parallel_tasks = pool;
    Engine::start(config).await.unwrap()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn run_module_executes_the_processor() {
    let engine = engine(4).await;
    let runs = Arc::new(AtomicUsize::new(0));
    let module = fb_runtime::Module::create(
        &engine.host(),
        "oneshot",
        "",
        PortLayout::new(),
        Box::new(OneShot {
            runs: Arc::clone(&runs),
        }),
    )
    .unwrap();

    let task = module.run_module(false).await.unwrap();
    engine.scheduler().wait_all().await.unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(task.state(), TaskState::Finished);
    assert!(module.module_ready());
}

#[tokio::test]
async fn sync_run_executes_inline() {
    let engine = engine(4).await;
    let runs = Arc::new(AtomicUsize::new(0));
    let module = fb_runtime::Module::create(
        &engine.host(),
        "syncshot",
        "",
        PortLayout::new(),
        Box::new(OneShot {
            runs: Arc::clone(&runs),
        }),
    )
    .unwrap();

    // With the processing slot free, the sync path runs to completion
    // before run_module returns.
    let task = module.run_module(true).await.unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(task.state(), TaskState::Finished);
    engine.scheduler().wait_all().await.unwrap();
}

#[tokio::test]
async fn progress_notifications_are_coalesced() {
    let engine = engine(4).await;
    let module = fb_runtime::Module::create(
        &engine.host(),
        "chatty",
        "",
        PortLayout::new(),
        Box::new(Chatty),
    )
    .unwrap();

    let mut events = engine.scheduler().task_manager().subscribe();
    let progress_count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&progress_count);
    let collector = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if matches!(event, TaskEvent::Progress { .. }) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }
    });

    module.run_module(false).await.unwrap();
    engine.scheduler().wait_all().await.unwrap();
    collector.abort();

    // 50 updates in ~50 ms, coalesced at 100 ms granularity: the first
    // one passes, at most one more makes it through.
    let seen = progress_count.load(Ordering::SeqCst);
    assert!(seen >= 1, "expected at least one progress event");
    assert!(seen <= 2, "expected coalesced progress, got {seen}");
}

#[tokio::test]
async fn cancel_all_drains_and_reports_cancellation() {
    let engine = engine(4).await;
    let runs = Arc::new(AtomicUsize::new(0));
    let module = fb_runtime::Module::create(
        &engine.host(),
        "lingerer",
        "",
        PortLayout::new(),
        Box::new(Lingering {
            runs: Arc::clone(&runs),
            linger: Duration::from_millis(100),
        }),
    )
    .unwrap();
    let other = fb_runtime::Module::create(
        &engine.host(),
        "bystander",
        "",
        PortLayout::new(),
        Box::new(OneShot {
            runs: Arc::new(AtomicUsize::new(0)),
        }),
    )
    .unwrap();

    module.run_module(false).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    let scheduler = Arc::clone(engine.scheduler());
    let cancel = tokio::spawn(async move { scheduler.cancel_all().await });
    tokio::time::sleep(Duration::from_millis(30)).await;

    // While the wave is in flight, new task registrations are refused.
    assert!(engine.scheduler().is_cancelling_all());
    assert!(matches!(
        other.run_module(false).await,
        Err(ExecError::Scheduling(_))
    ));

    cancel.await.unwrap();
    let outcome = engine.scheduler().wait_all().await;
    assert!(matches!(outcome, Err(ExecError::Cancelled)));

    // Quiescent: nothing pending, pool idle, every module ready.
    assert_eq!(engine.scheduler().count(), 0);
    assert_eq!(engine.scheduler().pool_busy(), 0);
    assert!(engine.registry().all_ready());
}

#[tokio::test]
async fn second_cancel_all_is_a_noop() {
    let engine = engine(2).await;
    let scheduler = engine.scheduler();
    scheduler.cancel_all().await;
    scheduler.cancel_all().await;
    assert!(!scheduler.is_cancelling_all());
}

#[tokio::test]
async fn engine_wait_surfaces_cancellation() {
    let engine = engine(2).await;
    let module = fb_runtime::Module::create(
        &engine.host(),
        "lingerer",
        "",
        PortLayout::new(),
        Box::new(Lingering {
            runs: Arc::new(AtomicUsize::new(0)),
            linger: Duration::ZERO,
        }),
    )
    .unwrap();

    module.run_module(false).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    engine.shutdown().await;

    let outcome = engine.wait().await;
    assert!(outcome.is_err(), "expected a cancellation outcome");
}

#[tokio::test]
async fn duplicate_module_name_is_rejected() {
    let engine = engine(2).await;
    let host: ModuleHost = engine.host();
    let make = |host: &ModuleHost| {
        fb_runtime::Module::create(
            host,
            "dup",
            "",
            PortLayout::new(),
            Box::new(OneShot {
                runs: Arc::new(AtomicUsize::new(0)),
            }),
        )
    };
    make(&host).unwrap();
    assert!(matches!(make(&host), Err(ExecError::Registry(_))));
}

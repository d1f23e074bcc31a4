//! Frozen-graph supervision: a module that loops without progress is
//! cancelled by the watchdog and reported as a module failure.

mod common;

use std::time::Duration;

use fb_config::BenchConfig;
use fb_core::error::ExecError;
use fb_modules::freeze;
use fb_runtime::{Engine, TaskEvent, TaskState};

#[tokio::test]
async fn watchdog_cancels_a_frozen_graph() {
    let mut config = BenchConfig::default();
    config.scheduler.max_parallel_tasks = 4;
    config.watchdog.enabled = true;
    config.watchdog.timeout = Duration::from_millis(150).into();
    let engine = Engine::start(config).await.unwrap();

    let events = common::watch_events(&engine);
    let frozen = freeze(&engine.host(), "frozen").unwrap();
    let task = frozen.run_module(false).await.unwrap();

    // Two identical samples (task set and pool usage unchanged) trip the
    // watchdog, which cancels the graph.
    let outcome = engine.scheduler().wait_all().await;
    match outcome {
        Err(ExecError::ModuleFailure(detail)) => {
            assert!(detail.contains("module failure"), "got: {detail}");
        }
        other => panic!("expected a module-failure outcome, got {other:?}"),
    }

    assert_eq!(task.state(), TaskState::Finished);
    assert!(frozen.module_ready());

    // The frozen run was interrupted, not failed on its own.
    assert_eq!(events.failed(), 0);
    assert_eq!(events.failed_on_cancellation(), 1);
    assert!(
        events.count(|e| matches!(e, TaskEvent::Cancelled { id } if *id == task.id())) >= 1,
        "the frozen task must have passed through Cancelling"
    );
}

#[tokio::test]
async fn watchdog_stays_quiet_on_an_idle_graph() {
    let mut config = BenchConfig::default();
    config.watchdog.enabled = true;
    config.watchdog.timeout = Duration::from_millis(100).into();
    let engine = Engine::start(config).await.unwrap();

    // No tasks: both samples are trivial, the watchdog never fires.
    tokio::time::sleep(Duration::from_millis(350)).await;
    engine.scheduler().wait_all().await.unwrap();
}

//! Shared fixtures for the pipeline scenario tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

use fb_config::BenchConfig;
use fb_runtime::{Engine, TaskEvent};

/// Bootstrap an engine with the given worker pool size, watchdog off.
pub async fn engine(pool: usize) -> Engine {
    let mut config = BenchConfig::default();
    config.scheduler.max_parallel_tasks = pool;
    Engine::start(config).await.unwrap()
}

/// Collects every task lifecycle event in the background.
pub struct EventLog {
    events: Arc<Mutex<Vec<TaskEvent>>>,
    collector: JoinHandle<()>,
}

impl EventLog {
    pub fn snapshot(&self) -> Vec<TaskEvent> {
        self.events.lock().expect("event log poisoned").clone()
    }

    pub fn count(&self, predicate: impl Fn(&TaskEvent) -> bool) -> usize {
        self.events
            .lock()
            .expect("event log poisoned")
            .iter()
            .filter(|e| predicate(e))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.count(|e| matches!(e, TaskEvent::Failed { .. }))
    }

    pub fn failed_on_cancellation(&self) -> usize {
        self.count(|e| matches!(e, TaskEvent::FailedOnCancellation { .. }))
    }

    pub fn enslaved(&self) -> usize {
        self.count(|e| matches!(e, TaskEvent::Enslaved { .. }))
    }
}

impl Drop for EventLog {
    fn drop(&mut self) {
        self.collector.abort();
    }
}

/// Start collecting the engine's task events.
pub fn watch_events(engine: &Engine) -> EventLog {
    let mut rx = engine.scheduler().task_manager().subscribe();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let collector = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => sink.lock().expect("event log poisoned").push(event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    EventLog { events, collector }
}

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::scheduler::Scheduler;
use crate::task::TaskId;

// ---------------------------------------------------------------------------
// WatchDog
// ---------------------------------------------------------------------------

/// Supervisory task that declares the graph frozen when neither the live
/// task set nor the pool usage has changed over a full sampling period.
///
/// Each tick samples two attributes: the identities of the live tasks and
/// the number of busy worker slots. Only when *both* samples equal the
/// previous tick's does the watchdog invoke the scheduler's cancel-all
/// (reported as a module failure) and exit. Detection state starts from
/// scratch on every spawn; nothing is carried across restarts.
///
/// The watchdog runs outside the worker pool, so pool usage excludes it by
/// construction.
pub struct WatchDog {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl WatchDog {
    pub fn spawn(scheduler: Arc<Scheduler>, timeout: Duration) -> Self {
        let stop = CancellationToken::new();
        let token = stop.clone();
        let handle = tokio::spawn(async move {
            fb_log!(info, sys, timeout_ms = timeout.as_millis() as u64, "watchdog started");
            let mut last_ids: HashSet<TaskId> = HashSet::new();
            let mut last_busy = 0usize;
            let mut primed = false;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(timeout) => {
                        let ids: HashSet<TaskId> = scheduler.task_ids().into_iter().collect();
                        let busy = scheduler.pool_busy();
                        let frozen = primed
                            && task_set_frozen(&last_ids, &ids)
                            && busy_count_frozen(last_busy, busy);
                        last_ids = ids;
                        last_busy = busy;
                        primed = true;
                        if frozen {
                            scheduler.cancel_all_from_watchdog().await;
                            break;
                        }
                    }
                }
            }
            fb_log!(debug, sys, "watchdog stopped");
        });
        Self { stop, handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn stop(self) {
        self.stop.cancel();
        let _ = self.handle.await;
    }
}

/// A non-empty task set identical to the previous sample.
fn task_set_frozen(last: &HashSet<TaskId>, current: &HashSet<TaskId>) -> bool {
    !current.is_empty() && last == current
}

/// A non-zero busy count identical to the previous sample.
fn busy_count_frozen(last: usize, current: usize) -> bool {
    current != 0 && current == last
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_task_set_is_never_frozen() {
        let empty = HashSet::new();
        assert!(!task_set_frozen(&empty, &empty));
    }

    #[test]
    fn unchanged_task_set_is_frozen() {
        let a: HashSet<TaskId> = [1, 2].into_iter().collect();
        let b = a.clone();
        assert!(task_set_frozen(&a, &b));
    }

    #[test]
    fn changed_task_set_is_not_frozen() {
        let a: HashSet<TaskId> = [1, 2].into_iter().collect();
        let b: HashSet<TaskId> = [2, 3].into_iter().collect();
        assert!(!task_set_frozen(&a, &b));
    }

    #[test]
    fn idle_pool_is_never_frozen() {
        assert!(!busy_count_frozen(0, 0));
    }

    #[test]
    fn steady_busy_pool_is_frozen() {
        assert!(busy_count_frozen(3, 3));
        assert!(!busy_count_frozen(3, 2));
    }
}

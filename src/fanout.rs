use std::{future::Future, num::NonZeroUsize, sync::Arc, thread, time::Duration};

use tokio::{
    sync::Semaphore,
    task::JoinSet,
    time::{self, Instant},
};
use tracing::{debug, error};

/// Minimum delay between two worker launches.
pub const LAUNCH_SPACING: Duration = Duration::from_millis(300);

/// Runs one operation per item with a bounded number of concurrent workers
/// and a minimum delay between launches.
#[derive(Debug, Clone, Copy)]
pub struct FanOut {
    workers: usize,
    spacing: Duration,
}

impl FanOut {
    pub fn new(workers: usize, spacing: Duration) -> Self {
        FanOut {
            workers: workers.max(1),
            spacing,
        }
    }

    /// One worker per available processing unit.
    pub fn for_host() -> Self {
        let workers = thread::available_parallelism().map_or(1, NonZeroUsize::get);
        FanOut::new(workers, LAUNCH_SPACING)
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Applies `op` to every item and waits for all of them.
    ///
    /// Results come back in input order. A worker that panics is logged and
    /// has no result.
    pub async fn run<T, R, F, Fut>(&self, items: Vec<T>, op: F) -> Vec<R>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(usize, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        let op = Arc::new(op);
        let slots = Arc::new(Semaphore::new(self.workers));
        let mut workers = JoinSet::new();
        let mut next_launch = Instant::now();

        for (index, item) in items.into_iter().enumerate() {
            // Spacing counts from the previous launch, after the slot wait.
            let Ok(permit) = slots.clone().acquire_owned().await else {
                break;
            };
            time::sleep_until(next_launch).await;
            next_launch = Instant::now() + self.spacing;
            debug!(index, available = slots.available_permits(), "launching worker");
            let op = op.clone();
            workers.spawn(async move {
                let _permit = permit;
                (index, op(index, item).await)
            });
        }

        let mut results = Vec::with_capacity(workers.len());
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(err) => error!(%err, "worker did not complete"),
            }
        }
        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, result)| result).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_worker_budget_is_respected() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let fanout = FanOut::new(2, Duration::from_millis(1));
        let results = fanout
            .run((0..5).collect(), {
                let running = running.clone();
                let peak = peak.clone();
                move |_, item: u32| {
                    let running = running.clone();
                    let peak = peak.clone();
                    async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        time::sleep(Duration::from_millis(30)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        item * 10
                    }
                }
            })
            .await;

        assert_eq!(results, vec![0, 10, 20, 30, 40]);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(running.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_launches_are_spaced() {
        let start = Instant::now();
        let fanout = FanOut::new(8, Duration::from_millis(40));
        let launched = fanout
            .run(vec!["a", "b", "c"], move |_, _| async move { start.elapsed() })
            .await;

        assert_eq!(launched.len(), 3);
        assert!(launched[1] >= Duration::from_millis(40));
        assert!(launched[2] >= Duration::from_millis(80));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spacing_holds_when_slots_free_together() {
        let start = Instant::now();
        let spacing = Duration::from_millis(100);
        let fanout = FanOut::new(2, spacing);
        let launched = fanout
            .run(vec![400u64, 300, 10, 10], move |_, busy| async move {
                let launched_at = start.elapsed();
                time::sleep(Duration::from_millis(busy)).await;
                launched_at
            })
            .await;

        assert_eq!(launched.len(), 4);
        for pair in launched.windows(2) {
            assert!(pair[1] - pair[0] >= spacing, "launches too close: {launched:?}");
        }
        // Both slots free up at 400ms; the last launch waits one more spacing.
        assert!(launched[3] >= Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_results_keep_input_order() {
        let fanout = FanOut::new(4, Duration::from_millis(1));
        let results = fanout
            .run(vec![40u64, 5, 20, 1], |index, delay| async move {
                time::sleep(Duration::from_millis(delay)).await;
                index
            })
            .await;
        assert_eq!(results, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_panicking_worker_does_not_stop_the_batch() {
        let fanout = FanOut::new(2, Duration::from_millis(1));
        let results = fanout
            .run(vec![1, 2, 3], |_, item| async move {
                if item == 2 {
                    panic!("boom");
                }
                item
            })
            .await;
        assert_eq!(results, vec![1, 3]);
    }

    #[test]
    fn test_zero_workers_is_clamped() {
        assert_eq!(FanOut::new(0, LAUNCH_SPACING).workers(), 1);
        assert!(FanOut::for_host().workers() >= 1);
    }
}

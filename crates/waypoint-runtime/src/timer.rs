use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::AbortHandle;

use waypoint_core::workflow::{TimerCallback, TimerFacility, TimerKey};

struct Scheduled {
    generation: u64,
    handle: AbortHandle,
}

type TimerMap = Arc<Mutex<HashMap<TimerKey, Scheduled>>>;

fn lock(timers: &TimerMap) -> MutexGuard<'_, HashMap<TimerKey, Scheduled>> {
    timers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Timer facility backed by tokio tasks.
///
/// Timers live in process memory; the owning workflow instance re-arms what
/// it needs when it is loaded again.
#[derive(Default)]
pub struct TokioTimerFacility {
    timers: TimerMap,
    generation: AtomicU64,
}

impl TokioTimerFacility {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pending timers.
    pub fn pending(&self) -> usize {
        lock(&self.timers).len()
    }

    /// Whether a timer with `key` is pending.
    pub fn is_pending(&self, key: &TimerKey) -> bool {
        lock(&self.timers).contains_key(key)
    }
}

impl TimerFacility for TokioTimerFacility {
    fn start_single_timer(&self, key: TimerKey, delay: Duration, callback: TimerCallback) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let timers = self.timers.clone();
        let task_key = key.clone();

        tracing::debug!(
            workflow = %key.workflow,
            workflow_id = %key.workflow_id,
            timer = %key.name,
            delay_ms = delay.as_millis() as u64,
            "Starting timer"
        );

        // Held across the spawn so a zero-delay timer cannot finish before it is recorded.
        let mut pending = lock(&self.timers);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut timers = lock(&timers);
                if timers.get(&task_key).map(|s| s.generation) == Some(generation) {
                    timers.remove(&task_key);
                }
            }
            callback().await;
        });

        let previous = pending.insert(
            key,
            Scheduled {
                generation,
                handle: task.abort_handle(),
            },
        );
        if let Some(previous) = previous {
            previous.handle.abort();
        }
    }

    fn cancel(&self, key: &TimerKey) {
        if let Some(scheduled) = lock(&self.timers).remove(key) {
            tracing::debug!(
                workflow = %key.workflow,
                workflow_id = %key.workflow_id,
                timer = %key.name,
                "Cancelled timer"
            );
            scheduled.handle.abort();
        }
    }
}

impl Drop for TokioTimerFacility {
    fn drop(&mut self) {
        for (_, scheduled) in lock(&self.timers).drain() {
            scheduled.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use std::sync::atomic::AtomicUsize;

    fn counting_callback(counter: Arc<AtomicUsize>) -> TimerCallback {
        Box::new(move || -> BoxFuture<'static, ()> {
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_once() {
        let facility = TokioTimerFacility::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let key = TimerKey::new("transfer", "t1", "acceptation-timeout-t1");

        facility.start_single_timer(key.clone(), Duration::from_secs(5), counting_callback(fired.clone()));
        assert!(facility.is_pending(&key));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(facility.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_does_not_fire() {
        let facility = TokioTimerFacility::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let key = TimerKey::new("transfer", "t1", "acceptation-timeout-t1");

        facility.start_single_timer(key.clone(), Duration::from_secs(5), counting_callback(fired.clone()));
        facility.cancel(&key);
        facility.cancel(&key);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_timer() {
        let facility = TokioTimerFacility::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let key = TimerKey::new("transfer", "t1", "reminder");

        facility.start_single_timer(key.clone(), Duration::from_secs(5), counting_callback(fired.clone()));
        facility.start_single_timer(key.clone(), Duration::from_secs(10), counting_callback(fired.clone()));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(facility.is_pending(&key));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}

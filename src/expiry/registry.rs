use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, trace};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::types::ArmOutcome;

struct Timer {
    generation: u64,
    token: CancellationToken,
}

type TimerTable = Arc<Mutex<HashMap<Uuid, Timer>>>;

fn lock(timers: &TimerTable) -> MutexGuard<'_, HashMap<Uuid, Timer>> {
    timers.lock().unwrap_or_else(|e| e.into_inner())
}

/// One cancellable timer per image id.
///
/// A timer is `Armed` while it sits in the table. Firing and cancelling both
/// take it out of the table under the same lock, and only the side that finds
/// its own generation there wins. Once `cancel` returns the timer cannot fire,
/// and `on_fire` runs at most once per arm.
pub struct ExpiryRegistry {
    timers: TimerTable,
    next_generation: AtomicU64,
}

impl Default for ExpiryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpiryRegistry {
    pub fn new() -> Self {
        Self {
            timers: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Schedules `on_fire(id)` to run once `remaining` has elapsed.
    ///
    /// A zero `remaining` schedules nothing and returns
    /// [`ArmOutcome::FireNow`]; the caller removes the item itself. Arming an
    /// id that already has a timer replaces it. Must be called from within a
    /// tokio runtime.
    pub fn arm<F, Fut>(&self, id: Uuid, remaining: Duration, on_fire: F) -> ArmOutcome
    where
        F: FnOnce(Uuid) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if remaining.is_zero() {
            self.cancel(id);
            return ArmOutcome::FireNow;
        }

        let deadline = tokio::time::Instant::now() + remaining;
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        if let Some(previous) = lock(&self.timers).insert(
            id,
            Timer {
                generation,
                token: token.clone(),
            },
        ) {
            debug!("Replacing armed timer for {}", id);
            previous.token.cancel();
        }

        let timers = Arc::clone(&self.timers);
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    trace!("Timer for {} cancelled", id);
                }
                _ = tokio::time::sleep_until(deadline) => {
                    let fired = {
                        let mut table = lock(&timers);
                        match table.get(&id) {
                            Some(timer) if timer.generation == generation => {
                                table.remove(&id);
                                true
                            }
                            _ => false,
                        }
                    };
                    if fired {
                        debug!("Timer for {} fired", id);
                        on_fire(id).await;
                    }
                }
            }
        });

        trace!("Armed timer for {} in {:?}", id, remaining);
        ArmOutcome::Armed
    }

    /// Cancels the pending timer for `id`. Returns whether one was pending.
    pub fn cancel(&self, id: Uuid) -> bool {
        match lock(&self.timers).remove(&id) {
            Some(timer) => {
                timer.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels every pending timer and returns how many there were.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<Timer> = lock(&self.timers).drain().map(|(_, t)| t).collect();
        for timer in &drained {
            timer.token.cancel();
        }
        if !drained.is_empty() {
            debug!("Cancelled {} armed timers", drained.len());
        }
        drained.len()
    }

    pub fn is_armed(&self, id: Uuid) -> bool {
        lock(&self.timers).contains_key(&id)
    }

    pub fn armed_count(&self) -> usize {
        lock(&self.timers).len()
    }
}

impl Drop for ExpiryRegistry {
    fn drop(&mut self) {
        for (_, timer) in lock(&self.timers).drain() {
            timer.token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    fn counting(counter: &Arc<AtomicUsize>) -> impl FnOnce(Uuid) -> std::future::Ready<()> + Send + 'static {
        let counter = Arc::clone(counter);
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_once_after_remaining() {
        let registry = ExpiryRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let id = Uuid::new_v4();

        let outcome = registry.arm(id, Duration::from_secs(600), counting(&fired));
        assert_eq!(outcome, ArmOutcome::Armed);
        assert!(registry.is_armed(id));

        tokio::time::advance(Duration::from_secs(599)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!registry.is_armed(id));
        assert!(!registry.cancel(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let registry = ExpiryRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let id = Uuid::new_v4();
        registry.arm(id, Duration::from_secs(5), counting(&fired));

        assert!(registry.cancel(id));
        assert!(!registry.cancel(id));
        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(registry.armed_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_remaining_fires_now_without_scheduling() {
        let registry = ExpiryRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let outcome = registry.arm(Uuid::new_v4(), Duration::ZERO, counting(&fired));

        assert_eq!(outcome, ArmOutcome::FireNow);
        assert_eq!(registry.armed_count(), 0);
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearming_keeps_a_single_timer() {
        let registry = ExpiryRegistry::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let id = Uuid::new_v4();

        registry.arm(id, Duration::from_secs(5), counting(&first));
        registry.arm(id, Duration::from_secs(20), counting(&second));
        assert_eq!(registry.armed_count(), 1);

        tokio::time::advance(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all() {
        let registry = ExpiryRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));
        for secs in 1..=3 {
            registry.arm(Uuid::new_v4(), Duration::from_secs(secs), counting(&fired));
        }
        assert_eq!(registry.cancel_all(), 3);
        assert_eq!(registry.cancel_all(), 0);

        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_the_registry_cancels_timers() {
        let fired = Arc::new(AtomicUsize::new(0));
        {
            let registry = ExpiryRegistry::new();
            registry.arm(Uuid::new_v4(), Duration::from_secs(1), counting(&fired));
        }
        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}

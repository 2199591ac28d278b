//! Periodic sweep driver.
//!
//! Per-image timers can be delayed or suppressed while the host process is
//! suspended, so whoever shows captures on screen also runs a sweep at a
//! fixed interval. The store never schedules this itself; a host that wants
//! it spawns a [`Sweeper`].

use std::time::Duration;

use log::{debug, info};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::store::EphemeralStore;

/// Handle to a running sweep loop. Dropping it stops the loop.
pub struct Sweeper {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Stops the loop and waits for an in-flight sweep to finish.
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Calls [`EphemeralStore::remove_expired_images`] every `interval`, the
/// first time immediately.
pub fn spawn_sweeper(store: EphemeralStore, interval: Duration) -> Sweeper {
    let token = CancellationToken::new();
    let child = token.clone();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let handle = tokio::spawn(async move {
        info!("Sweeper running every {:?}", interval);
        loop {
            tokio::select! {
                biased;
                _ = child.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = store.remove_expired_images().await;
                    if removed > 0 {
                        debug!("Sweeper removed {} images", removed);
                    }
                }
            }
        }
        debug!("Sweeper stopped");
    });
    Sweeper {
        token,
        handle: Some(handle),
    }
}

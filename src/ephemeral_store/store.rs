use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info, warn};
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::decode_cache::{
    CacheStats, DecodeCache, DecodedImage, ImageDecoder, RasterDecoder, ReleaseHook,
};
use crate::error_handling::types::{DecodeError, StoreError};
use crate::expiry::{ArmOutcome, ExpiryRegistry};
use crate::storage::storage_trait::ImageStorage;
use crate::storage::types::{CapturedImage, MAX_TTL_SECS};

use super::types::{LiveImages, StoreOptions};

/// Cutoff for `delete_expired` that also catches rows expiring exactly at
/// `now`, matching `CapturedImage::is_expired`.
fn expiry_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::milliseconds(1)
}

/// State guarded by the mutation domain.
struct LiveState {
    /// Live captures, oldest first.
    images: Vec<CapturedImage>,
    /// Removed ids whose durable delete failed; retried on every sweep.
    pending_deletes: HashSet<Uuid>,
    /// A batched expiry delete failed and must be retried.
    sweep_pending: bool,
}

impl LiveState {
    fn position(&self, id: Uuid) -> Option<usize> {
        self.images.iter().position(|image| image.id == id)
    }
}

struct StoreInner {
    storage: Arc<dyn ImageStorage>,
    decoder: Arc<dyn ImageDecoder>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    state: Mutex<LiveState>,
    registry: ExpiryRegistry,
    cache: DecodeCache,
    decode_gate: Mutex<()>,
    published: watch::Sender<LiveImages>,
    released: AtomicBool,
}

/// Owns every captured image from capture to guaranteed deletion.
///
/// The store keeps three things in step: the durable rows in an
/// [`ImageStorage`], one expiry timer per live image, and a small cache of
/// decoded frames. All mutations (adding, removing, sweeping, clearing and
/// timer expiry) run one at a time under a single async lock, and readers
/// only ever see whole snapshots published at the end of a mutation. An
/// image in a snapshot has a durable row and an armed timer.
///
/// Handles are cheap to clone and share the same store.
#[derive(Clone)]
pub struct EphemeralStore {
    inner: Arc<StoreInner>,
}

/// Configures and starts an [`EphemeralStore`].
pub struct StoreBuilder {
    storage: Arc<dyn ImageStorage>,
    decoder: Arc<dyn ImageDecoder>,
    clock: Arc<dyn Clock>,
    options: StoreOptions,
    on_release: Option<ReleaseHook>,
}

impl StoreBuilder {
    pub fn new(storage: Arc<dyn ImageStorage>) -> Self {
        Self {
            storage,
            decoder: Arc::new(RasterDecoder),
            clock: Arc::new(SystemClock),
            options: StoreOptions::default(),
            on_release: None,
        }
    }

    pub fn decoder(mut self, decoder: Arc<dyn ImageDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn options(mut self, options: StoreOptions) -> Self {
        self.options = options;
        self
    }

    /// Hook run for every decoded frame the cache releases.
    pub fn on_release(mut self, hook: ReleaseHook) -> Self {
        self.on_release = Some(hook);
        self
    }

    /// Loads the durable rows, drops the expired ones, arms a timer for each
    /// survivor and publishes them.
    ///
    /// The store only exists once this has finished, so no other operation
    /// can overlap the initial load. Fails only if the rows cannot be read.
    pub async fn start(self) -> Result<EphemeralStore, StoreError> {
        let now = self.clock.now();
        let rows = self.storage.list_all().await.map_err(|e| {
            error!("Unable to load captured images: {}", e);
            StoreError::Storage(e)
        })?;
        let (expired, mut live): (Vec<CapturedImage>, Vec<CapturedImage>) =
            rows.into_iter().partition(|image| image.is_expired(now));
        live.sort_by_key(|image| image.captured_at);

        let mut sweep_pending = false;
        if !expired.is_empty() {
            match self.storage.delete_expired(expiry_cutoff(now)).await {
                Ok(count) => info!("Discarded {} images that expired while stopped", count),
                Err(e) => {
                    warn!("Failed to discard {} expired images: {}", expired.len(), e);
                    sweep_pending = true;
                }
            }
        }

        let cache = match self.on_release {
            Some(hook) => DecodeCache::with_release_hook(self.options.cache_capacity, hook),
            None => DecodeCache::new(self.options.cache_capacity),
        };
        let (published, _) = watch::channel(LiveImages::default());
        let inner = Arc::new(StoreInner {
            storage: self.storage,
            decoder: self.decoder,
            clock: self.clock,
            ttl: self
                .options
                .ttl
                .clamp(Duration::milliseconds(1), Duration::seconds(MAX_TTL_SECS)),
            state: Mutex::new(LiveState {
                images: Vec::new(),
                pending_deletes: HashSet::new(),
                sweep_pending,
            }),
            registry: ExpiryRegistry::new(),
            cache,
            decode_gate: Mutex::new(()),
            published,
            released: AtomicBool::new(false),
        });

        {
            let mut state = inner.state.lock().await;
            for image in live {
                match StoreInner::arm_timer(&inner, &image, now) {
                    ArmOutcome::Armed => state.images.push(image),
                    ArmOutcome::FireNow => {
                        if let Err(e) = inner.storage.delete_by_id(image.id).await {
                            warn!("Failed to delete expired image {}: {}", image.id, e);
                            state.pending_deletes.insert(image.id);
                        }
                    }
                }
            }
            inner.publish(&state);
            info!(
                "Ephemeral store started with {} live images (ttl {}s)",
                state.images.len(),
                inner.ttl.num_seconds()
            );
        }

        Ok(EphemeralStore { inner })
    }
}

impl StoreInner {
    fn arm_timer(inner: &Arc<StoreInner>, image: &CapturedImage, now: DateTime<Utc>) -> ArmOutcome {
        let remaining = image
            .remaining_time(now)
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);
        let weak: Weak<StoreInner> = Arc::downgrade(inner);
        inner.registry.arm(image.id, remaining, move |id| async move {
            if let Some(inner) = weak.upgrade() {
                inner.expire(id).await;
            }
        })
    }

    fn publish(&self, state: &LiveState) {
        self.published.send_replace(Arc::new(state.images.clone()));
    }

    fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Timer path: re-enters the mutation domain before touching anything.
    async fn expire(&self, id: Uuid) {
        let mut state = self.state.lock().await;
        if self.is_released() {
            return;
        }
        if self.remove_locked(&mut state, id).await {
            info!("Image {} expired", id);
        }
    }

    /// Removes `id` from every component. Returns false if it was not live.
    async fn remove_locked(&self, state: &mut LiveState, id: Uuid) -> bool {
        let Some(pos) = state.position(id) else {
            return false;
        };
        self.registry.cancel(id);
        if let Err(e) = self.storage.delete_by_id(id).await {
            warn!("Failed to delete image {} from storage, will retry: {}", id, e);
            state.pending_deletes.insert(id);
        }
        self.cache.evict(&id);
        state.images.remove(pos);
        self.publish(state);
        true
    }

    async fn retry_pending_deletes(&self, state: &mut LiveState) {
        if state.pending_deletes.is_empty() {
            return;
        }
        let pending: Vec<Uuid> = state.pending_deletes.iter().copied().collect();
        for id in pending {
            match self.storage.delete_by_id(id).await {
                Ok(()) => {
                    state.pending_deletes.remove(&id);
                    debug!("Deleted image {} on retry", id);
                }
                Err(e) => debug!("Delete retry for {} failed again: {}", id, e),
            }
        }
    }

    fn snapshot_image(&self, id: Uuid) -> Option<CapturedImage> {
        self.published
            .borrow()
            .iter()
            .find(|image| image.id == id)
            .cloned()
    }
}

impl EphemeralStore {
    pub fn builder(storage: Arc<dyn ImageStorage>) -> StoreBuilder {
        StoreBuilder::new(storage)
    }

    /// Starts a store with the default decoder and system clock.
    pub async fn start(
        storage: Arc<dyn ImageStorage>,
        options: StoreOptions,
    ) -> Result<Self, StoreError> {
        StoreBuilder::new(storage).options(options).start().await
    }

    /// Persists a new capture, arms its expiry timer and appends it to the
    /// live list.
    ///
    /// If the durable write fails the capture is dropped and the error is
    /// returned; nothing is armed or published.
    pub async fn add_image(&self, image_data: impl Into<Bytes>) -> Result<CapturedImage, StoreError> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        if inner.is_released() {
            return Err(StoreError::Released);
        }

        let now = inner.clock.now();
        let image = CapturedImage::new(image_data, now, inner.ttl);
        inner.storage.insert(&image).await.map_err(|e| {
            error!("Capture {} not persisted: {}", image.id, e);
            StoreError::Storage(e)
        })?;

        if StoreInner::arm_timer(inner, &image, now) == ArmOutcome::FireNow {
            // only reachable if the clock jumped past the whole ttl mid-call
            if let Err(e) = inner.storage.delete_by_id(image.id).await {
                warn!("Failed to delete image {} from storage, will retry: {}", image.id, e);
                state.pending_deletes.insert(image.id);
            }
            return Ok(image);
        }

        state.images.push(image.clone());
        inner.publish(&state);
        debug!(
            "Added image {} ({} bytes), expires at {}",
            image.id,
            image.image_data.len(),
            image.expires_at
        );
        Ok(image)
    }

    /// Removes `id` everywhere. Returns false, doing nothing, if it is not
    /// live, which makes racing removals harmless.
    pub async fn remove_image(&self, id: Uuid) -> bool {
        let mut state = self.inner.state.lock().await;
        if self.inner.is_released() {
            return false;
        }
        let removed = self.inner.remove_locked(&mut state, id).await;
        if removed {
            info!("Image {} removed", id);
        }
        removed
    }

    /// Removes every live image that has expired, deleting their rows in
    /// one batch, and retries durable deletes that failed earlier. Returns
    /// the number of images removed from the live list.
    pub async fn remove_expired_images(&self) -> usize {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        if inner.is_released() {
            return 0;
        }
        inner.retry_pending_deletes(&mut state).await;

        let now = inner.clock.now();
        let expired: HashSet<Uuid> = state
            .images
            .iter()
            .filter(|image| image.is_expired(now))
            .map(|image| image.id)
            .collect();
        if expired.is_empty() && !state.sweep_pending {
            return 0;
        }

        match inner.storage.delete_expired(expiry_cutoff(now)).await {
            Ok(count) => {
                state.sweep_pending = false;
                debug!("Sweep deleted {} expired rows", count);
            }
            Err(e) => {
                warn!("Sweep failed to delete expired rows, will retry: {}", e);
                state.sweep_pending = true;
            }
        }

        if expired.is_empty() {
            return 0;
        }
        for id in &expired {
            inner.registry.cancel(*id);
            inner.cache.evict(id);
        }
        state.images.retain(|image| !expired.contains(&image.id));
        inner.publish(&state);
        info!("Sweep removed {} expired images", expired.len());
        expired.len()
    }

    /// Cancels all timers, deletes every durable row, empties the cache and
    /// the live list. Returns how many live images were dropped.
    pub async fn clear_all(&self) -> usize {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        if inner.is_released() {
            return 0;
        }
        inner.registry.cancel_all();
        match inner.storage.delete_all().await {
            Ok(_) => {
                state.pending_deletes.clear();
                state.sweep_pending = false;
            }
            Err(e) => {
                warn!("Failed to clear storage, will retry per image: {}", e);
                let ids: Vec<Uuid> = state.images.iter().map(|image| image.id).collect();
                state.pending_deletes.extend(ids);
            }
        }
        inner.cache.clear();
        let cleared = state.images.len();
        state.images.clear();
        inner.publish(&state);
        info!("Cleared {} images", cleared);
        cleared
    }

    /// Decoded pixels for a live image, from the cache or freshly decoded.
    ///
    /// Returns `None` for ids that are not live, for expired images (which
    /// are removed on the spot), for bytes that fail to decode and once the
    /// store is released; a decode failure leaves the image in place and
    /// caches nothing.
    pub async fn get_decoded(&self, id: Uuid) -> Option<Arc<DecodedImage>> {
        match self.try_get_decoded(id).await {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Unable to decode image {}: {}", id, e);
                None
            }
        }
    }

    /// Like [`get_decoded`](Self::get_decoded) but reports decode failures.
    pub async fn try_get_decoded(&self, id: Uuid) -> Result<Option<Arc<DecodedImage>>, DecodeError> {
        let inner = &self.inner;
        if inner.is_released() {
            return Ok(None);
        }
        let Some(image) = inner.snapshot_image(id) else {
            return Ok(None);
        };
        if image.is_expired(inner.clock.now()) {
            self.remove_image(id).await;
            return Ok(None);
        }
        if let Some(hit) = inner.cache.get(&id) {
            return Ok(Some(hit));
        }

        let _gate = inner.decode_gate.lock().await;
        // another reader may have decoded it while we waited
        if inner.cache.contains(&id) {
            if let Some(hit) = inner.cache.get(&id) {
                return Ok(Some(hit));
            }
        }

        let decoder = Arc::clone(&inner.decoder);
        let bytes = image.image_data.clone();
        let decoded = tokio::task::spawn_blocking(move || decoder.decode(&bytes))
            .await
            .map_err(|e| {
                error!("Decode task for {} failed: {}", id, e);
                DecodeError::TaskFailed
            })??;
        let decoded = Arc::new(decoded);

        let state = inner.state.lock().await;
        if inner.is_released() || state.position(id).is_none() {
            debug!("Image {} was removed while decoding, not caching", id);
            return Ok(None);
        }
        inner.cache.put(id, Arc::clone(&decoded));
        drop(state);
        Ok(Some(decoded))
    }

    /// Receiver for the published live list. The current value is always a
    /// complete snapshot, oldest capture first.
    pub fn subscribe(&self) -> watch::Receiver<LiveImages> {
        self.inner.published.subscribe()
    }

    /// Current live images, leaving out any whose deadline has passed but
    /// whose removal has not run yet.
    pub fn images(&self) -> Vec<CapturedImage> {
        let now = self.inner.clock.now();
        self.inner
            .published
            .borrow()
            .iter()
            .filter(|image| !image.is_expired(now))
            .cloned()
            .collect()
    }

    pub fn get_image(&self, id: Uuid) -> Option<CapturedImage> {
        let now = self.inner.clock.now();
        self.inner
            .snapshot_image(id)
            .filter(|image| !image.is_expired(now))
    }

    pub fn len(&self) -> usize {
        self.inner.published.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Host memory-pressure signal: drops every decoded frame.
    pub fn on_memory_pressure(&self) -> usize {
        let released = self.inner.cache.clear();
        info!("Memory pressure: released {} decoded frames", released);
        released
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    /// Ids currently held by the decode cache, most recently used first.
    pub fn cached_ids(&self) -> Vec<Uuid> {
        self.inner.cache.ids()
    }

    pub fn armed_timers(&self) -> usize {
        self.inner.registry.armed_count()
    }

    pub fn is_armed(&self, id: Uuid) -> bool {
        self.inner.registry.is_armed(id)
    }

    /// Durable deletes that failed and are waiting for the next sweep.
    pub async fn pending_deletes(&self) -> usize {
        self.inner.state.lock().await.pending_deletes.len()
    }

    /// Teardown: cancels every timer and releases every decoded frame.
    ///
    /// Durable rows are left alone; whatever is still live is picked up, or
    /// discarded if expired, by the next `start`. Later mutations are refused.
    pub async fn release(&self) {
        let _state = self.inner.state.lock().await;
        if self.inner.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let timers = self.inner.registry.cancel_all();
        let frames = self.inner.cache.clear();
        info!(
            "Ephemeral store released ({} timers cancelled, {} frames released)",
            timers, frames
        );
    }
}

#[cfg(test)]
impl EphemeralStore {
    /// Runs the timer path for `id` as though its timer had already claimed
    /// the fire when a competing removal took the lock first.
    pub(super) async fn fire_timer(&self, id: Uuid) {
        self.inner.expire(id).await;
    }
}

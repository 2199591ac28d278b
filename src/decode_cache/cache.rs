use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, trace};
use lru::LruCache;
use uuid::Uuid;

use super::decoder::DecodedImage;
use super::types::CacheStats;

/// Called synchronously for every entry the cache lets go of, right before
/// the cache drops its reference to the pixel buffer.
pub type ReleaseHook = Arc<dyn Fn(Uuid, &DecodedImage) + Send + Sync>;

/// Reference capacity: the frame on screen plus one neighbour.
pub const DEFAULT_CAPACITY: usize = 2;

/// Bounded LRU map from image id to decoded pixels.
///
/// All mutation goes through one lock, so an entry is released exactly once
/// no matter how eviction, explicit removal and clearing interleave. The
/// release hook runs under that lock and must not call back into the cache.
pub struct DecodeCache {
    inner: Mutex<CacheInner>,
    on_release: Option<ReleaseHook>,
}

struct CacheInner {
    entries: LruCache<Uuid, Arc<DecodedImage>>,
    hits: u64,
    misses: u64,
    releases: u64,
}

impl DecodeCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::new(capacity),
                hits: 0,
                misses: 0,
                releases: 0,
            }),
            on_release: None,
        }
    }

    pub fn with_release_hook(capacity: NonZeroUsize, hook: ReleaseHook) -> Self {
        let mut cache = Self::new(capacity);
        cache.on_release = Some(hook);
        cache
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn release(&self, inner: &mut CacheInner, id: Uuid, image: Arc<DecodedImage>) {
        inner.releases += 1;
        if let Some(hook) = &self.on_release {
            hook(id, &image);
        }
        trace!("Released decoded image {} ({} bytes)", id, image.byte_len());
        drop(image);
    }

    /// Returns the cached frame for `id` and marks it most recently used.
    pub fn get(&self, id: &Uuid) -> Option<Arc<DecodedImage>> {
        let mut inner = self.lock();
        let found = inner.entries.get(id).cloned();
        match found {
            Some(image) => {
                inner.hits += 1;
                Some(image)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Inserts or replaces `id`. A replaced value, or the least recently used
    /// entry when the cache is full, is released before this returns.
    pub fn put(&self, id: Uuid, image: Arc<DecodedImage>) {
        let mut inner = self.lock();
        if let Some((old_id, old)) = inner.entries.push(id, image.clone()) {
            if old_id == id && Arc::ptr_eq(&old, &image) {
                return;
            }
            debug!("Decode cache releasing {} to make room for {}", old_id, id);
            self.release(&mut inner, old_id, old);
        }
    }

    /// Removes and releases `id`. Returns false if it was not cached.
    pub fn evict(&self, id: &Uuid) -> bool {
        let mut inner = self.lock();
        match inner.entries.pop(id) {
            Some(image) => {
                self.release(&mut inner, *id, image);
                true
            }
            None => false,
        }
    }

    /// Releases every entry and returns how many there were.
    pub fn clear(&self) -> usize {
        let mut inner = self.lock();
        let mut released = 0;
        while let Some((id, image)) = inner.entries.pop_lru() {
            self.release(&mut inner, id, image);
            released += 1;
        }
        if released > 0 {
            debug!("Decode cache cleared {} entries", released);
        }
        released
    }

    /// Whether `id` is cached; does not touch recency.
    pub fn contains(&self, id: &Uuid) -> bool {
        self.lock().entries.contains(id)
    }

    /// Cached ids, most recently used first.
    pub fn ids(&self) -> Vec<Uuid> {
        self.lock().entries.iter().map(|(id, _)| *id).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().entries.cap().get()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            releases: inner.releases,
            len: inner.entries.len(),
            capacity: inner.entries.cap().get(),
        }
    }
}

impl Drop for DecodeCache {
    fn drop(&mut self) {
        self.clear();
    }
}

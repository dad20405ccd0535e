//! In-memory cache of decoded tiles.
//!
//! Panning back and forth evicts and re-requests the same tiles over and over.
//! [`CachedProvider`] keeps recently decoded images in an LRU so those
//! re-requests skip the inner provider entirely.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::DecodeError;
use crate::tile::{TileDescriptor, TileKey};

use super::{DecodeProvider, DecodedImage};

/// Default number of decoded tiles to keep.
pub const DEFAULT_DECODED_CACHE_CAPACITY: usize = 256;

/// Cache key: tile identity plus the level source it was decoded from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    tile: TileKey,
    source: Arc<str>,
}

/// LRU cache of decoded images in front of another provider.
///
/// Failures and misses are not cached.
pub struct CachedProvider<P> {
    inner: P,
    cache: Mutex<LruCache<CacheKey, DecodedImage>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<P: DecodeProvider> CachedProvider<P> {
    /// Wrap `inner` with a cache of [`DEFAULT_DECODED_CACHE_CAPACITY`] tiles.
    pub fn new(inner: P) -> Self {
        Self::with_capacity(inner, DEFAULT_DECODED_CACHE_CAPACITY)
    }

    /// Wrap `inner` with a cache holding up to `capacity` tiles (minimum 1).
    pub fn with_capacity(inner: P, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns `(hits, misses)` since creation.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

impl<P: DecodeProvider> DecodeProvider for CachedProvider<P> {
    fn decode(
        &self,
        tile: &TileDescriptor,
        cancel: &CancellationToken,
    ) -> Result<Option<DecodedImage>, DecodeError> {
        let key = CacheKey {
            tile: tile.key,
            source: Arc::clone(&tile.source),
        };

        if let Some(image) = self.cache.lock().get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(image.clone()));
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        // lock is not held across the inner decode
        let decoded = self.inner.decode(tile, cancel)?;
        if let Some(image) = &decoded {
            self.cache.lock().put(key, image.clone());
        }
        Ok(decoded)
    }
}

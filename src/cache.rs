//! In-memory memoization of segmentation results
//!
//! Segmentation is the expensive step of the pipeline, so each result is
//! kept for the lifetime of the cache and keyed by the content hash of the
//! encoded input together with the model that produced it. Re-submitting the
//! same bytes, or bytes of an identical file under a different name, reuses
//! the stored mask. Failed segmentations are never stored.

use crate::error::Result;
use crate::gateway::SegmentationGateway;
use crate::types::AlphaMask;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Memoization key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// SHA256 of the encoded image bytes
    pub content_hash: String,
    /// Model identifier of the producing gateway
    pub model_id: String,
}

impl CacheKey {
    #[must_use]
    pub fn new(image_bytes: &[u8], model_id: &str) -> Self {
        Self {
            content_hash: calculate_content_hash(image_bytes),
            model_id: model_id.to_string(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.content_hash.get(..12).unwrap_or(&self.content_hash);
        write!(f, "{}@{}", short, self.model_id)
    }
}

/// Calculate SHA256 hash of image data as lowercase hex
#[must_use]
pub fn calculate_content_hash(image_bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(image_bytes);
    format!("{:x}", hasher.finalize())
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentationCacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

impl SegmentationCacheStats {
    /// Hit ratio as a percentage
    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Memoized segmentation results
#[derive(Debug, Default)]
pub struct SegmentationCache {
    entries: HashMap<CacheKey, Arc<AlphaMask>>,
    hits: u64,
    misses: u64,
}

impl SegmentationCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached mask for `image_bytes`, segmenting on a miss
    ///
    /// # Errors
    /// - Whatever the gateway returns; nothing is cached in that case
    #[instrument(skip_all, fields(model = gateway.model_id(), bytes = image_bytes.len()))]
    pub async fn get_or_segment<G>(
        &mut self,
        gateway: &G,
        image_bytes: &[u8],
    ) -> Result<Arc<AlphaMask>>
    where
        G: SegmentationGateway + ?Sized,
    {
        let key = CacheKey::new(image_bytes, gateway.model_id());
        if let Some(mask) = self.entries.get(&key) {
            self.hits += 1;
            debug!(key = %key, "Segmentation cache hit");
            return Ok(Arc::clone(mask));
        }

        self.misses += 1;
        debug!(key = %key, "Segmentation cache miss");
        let mask = Arc::new(gateway.segment(image_bytes).await?);
        self.entries.insert(key, Arc::clone(&mask));
        Ok(mask)
    }

    /// Lookup without segmenting; does not touch the statistics
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<Arc<AlphaMask>> {
        self.entries.get(key).cloned()
    }

    /// Seed the cache, e.g. with a mask computed elsewhere
    pub fn insert(&mut self, key: CacheKey, mask: AlphaMask) -> Arc<AlphaMask> {
        let mask = Arc::new(mask);
        self.entries.insert(key, Arc::clone(&mask));
        mask
    }

    /// Drop all entries and reset counters; returns how many were removed
    pub fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        self.hits = 0;
        self.misses = 0;
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> SegmentationCacheStats {
        SegmentationCacheStats {
            entries: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
        }
    }
}

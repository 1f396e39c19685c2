//! Per-image keep/remove stroke state
//!
//! Merges are OR-only: once a pixel is marked it stays marked until the
//! image's state is explicitly reset.

use crate::error::{RefineError, Result};
use crate::types::{BinaryMask, CanvasSnapshot, ImageId, StrokeDelta};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Accumulated corrections for one image, at interaction-surface resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrokeState {
    pub keep: BinaryMask,
    pub remove: BinaryMask,
}

impl StrokeState {
    #[must_use]
    pub fn empty(surface: (u32, u32)) -> Self {
        Self {
            keep: BinaryMask::new(surface.0, surface.1),
            remove: BinaryMask::new(surface.0, surface.1),
        }
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.keep.dimensions()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.keep.any() && !self.remove.any()
    }
}

/// Keyed store of [`StrokeState`], one entry per image identity
#[derive(Debug, Default)]
pub struct StrokeAccumulator {
    states: HashMap<ImageId, StrokeState>,
    fingerprints: HashMap<ImageId, SnapshotFingerprint>,
}

impl StrokeAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `keep <- keep OR delta.keep`, `remove <- remove OR delta.remove`
    ///
    /// State is created all-false at the delta's size on first use. A delta
    /// whose size differs from the existing state is rejected.
    pub fn merge(&mut self, image_id: &ImageId, delta: &StrokeDelta) -> Result<()> {
        delta.keep.ensure_same_size(&delta.remove, "keep/remove delta")?;

        let state = self
            .states
            .entry(image_id.clone())
            .or_insert_with(|| StrokeState::empty(delta.dimensions()));

        if state.dimensions() != delta.dimensions() {
            return Err(RefineError::dimension_mismatch(
                &format!("stroke delta for {}", image_id),
                state.dimensions(),
                delta.dimensions(),
            ));
        }

        state.keep.union_with(&delta.keep)?;
        state.remove.union_with(&delta.remove)?;

        trace!(
            image = %image_id,
            keep_pixels = state.keep.count(),
            remove_pixels = state.remove.count(),
            "Merged stroke delta"
        );
        Ok(())
    }

    /// Zero both masks, keeping their size; no-op for unknown images
    pub fn reset(&mut self, image_id: &ImageId) {
        if let Some(state) = self.states.get_mut(image_id) {
            state.keep.clear();
            state.remove.clear();
            debug!(image = %image_id, "Cleared stroke state");
        }
        self.fingerprints.remove(image_id);
    }

    /// Current state, or all-false masks at `surface` if never touched
    #[must_use]
    pub fn get(&self, image_id: &ImageId, surface: (u32, u32)) -> StrokeState {
        self.states
            .get(image_id)
            .cloned()
            .unwrap_or_else(|| StrokeState::empty(surface))
    }

    #[must_use]
    pub fn state(&self, image_id: &ImageId) -> Option<&StrokeState> {
        self.states.get(image_id)
    }

    /// Whether `fingerprint` is the snapshot last merged for `image_id`
    ///
    /// Merging that snapshot again would change nothing.
    #[must_use]
    pub fn is_latest(&self, image_id: &ImageId, fingerprint: &SnapshotFingerprint) -> bool {
        self.fingerprints.get(image_id) == Some(fingerprint)
    }

    /// [`merge`](Self::merge) `delta`, then remember the snapshot it came from
    ///
    /// The fingerprint is only recorded when the merge succeeds, so a
    /// rejected snapshot can be submitted again.
    pub fn merge_snapshot(
        &mut self,
        image_id: &ImageId,
        delta: &StrokeDelta,
        fingerprint: SnapshotFingerprint,
    ) -> Result<()> {
        self.merge(image_id, delta)?;
        self.fingerprints.insert(image_id.clone(), fingerprint);
        Ok(())
    }

    /// Drop everything held for `image_id`
    pub fn forget(&mut self, image_id: &ImageId) {
        self.states.remove(image_id);
        self.fingerprints.remove(image_id);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// sha256 over a snapshot's size, ink and background
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotFingerprint(String);

impl SnapshotFingerprint {
    #[must_use]
    pub fn of(snapshot: &CanvasSnapshot) -> Self {
        let (width, height) = snapshot.dimensions();
        let mut hasher = Sha256::new();
        hasher.update(width.to_le_bytes());
        hasher.update(height.to_le_bytes());
        hasher.update(snapshot.ink().as_raw());
        hasher.update(snapshot.background().as_raw());
        Self(format!("{:x}", hasher.finalize()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

//! Deterministic segmentation gateway for tests and dry runs
//!
//! Produces masks without running any model, and records how many times it
//! was asked so memoization can be verified.

use crate::{
    error::{RefineError, Result},
    gateway::SegmentationGateway,
    types::AlphaMask,
};
use async_trait::async_trait;
use image::GenericImageView;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::trace;

/// What the mock returns for a given input
#[derive(Debug, Clone)]
pub enum MockMask {
    /// Every pixel set to the given confidence, at the input's size
    Filled(u8),
    /// Confidence equal to the input's luma
    Luminance,
    /// Always this mask, regardless of the input
    Fixed(AlphaMask),
    /// Always fail with this message
    Failing(String),
}

/// Mock gateway
#[derive(Debug, Clone)]
pub struct MockGateway {
    model_id: String,
    mask: MockMask,
    /// Shared between clones so tests can keep a handle
    calls: Arc<AtomicUsize>,
}

impl MockGateway {
    #[must_use]
    pub fn new(mask: MockMask) -> Self {
        Self {
            model_id: "mock".to_string(),
            mask,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Everything is foreground
    #[must_use]
    pub fn foreground() -> Self {
        Self::new(MockMask::Filled(255))
    }

    /// Everything is background
    #[must_use]
    pub fn background() -> Self {
        Self::new(MockMask::Filled(0))
    }

    #[must_use]
    pub fn failing<S: Into<String>>(message: S) -> Self {
        Self::new(MockMask::Failing(message.into()))
    }

    #[must_use]
    pub fn with_model_id<S: Into<String>>(mut self, model_id: S) -> Self {
        self.model_id = model_id.into();
        self
    }

    /// Number of `segment` calls so far, across all clones
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::foreground()
    }
}

#[async_trait]
impl SegmentationGateway for MockGateway {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn segment(&self, image_bytes: &[u8]) -> Result<AlphaMask> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        trace!(call, model = %self.model_id, "Mock segmentation");

        match &self.mask {
            MockMask::Failing(message) => Err(RefineError::segmentation(message.clone())),
            MockMask::Fixed(mask) => Ok(mask.clone()),
            MockMask::Filled(value) => {
                let decoded = image::load_from_memory(image_bytes).map_err(|e| {
                    RefineError::segmentation(format!("Mock could not decode input: {}", e))
                })?;
                Ok(AlphaMask::filled(decoded.dimensions(), *value))
            },
            MockMask::Luminance => {
                let decoded = image::load_from_memory(image_bytes).map_err(|e| {
                    RefineError::segmentation(format!("Mock could not decode input: {}", e))
                })?;
                Ok(AlphaMask::from_image(&decoded.to_luma8()))
            },
        }
    }
}

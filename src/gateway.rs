//! Segmentation gateway abstraction
//!
//! The refinement engine never runs a model itself. It asks a gateway for
//! a per-pixel foreground confidence mask at the decoded image's resolution.

use crate::{error::Result, types::AlphaMask};
use async_trait::async_trait;

/// Source of automatic foreground masks
#[async_trait]
pub trait SegmentationGateway: Send + Sync {
    /// Identifier of the model behind this gateway
    ///
    /// Part of the memoization key, so two gateways sharing an id must
    /// produce the same mask for the same bytes.
    fn model_id(&self) -> &str;

    /// Segment encoded image bytes
    ///
    /// # Errors
    /// - `RefineError::Segmentation` when the model fails, stalls past its
    ///   timeout, or returns data that is not a mask
    async fn segment(&self, image_bytes: &[u8]) -> Result<AlphaMask>;
}

#[async_trait]
impl<G: SegmentationGateway + ?Sized> SegmentationGateway for Box<G> {
    fn model_id(&self) -> &str {
        (**self).model_id()
    }

    async fn segment(&self, image_bytes: &[u8]) -> Result<AlphaMask> {
        (**self).segment(image_bytes).await
    }
}

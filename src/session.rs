//! Per-image refinement workflow
//!
//! A [`RefinementSession`] owns everything that outlives a single request:
//! the memoized segmentation results, the accumulated keep/remove strokes of
//! every image, and the configured classifier and compositors. Each image
//! goes through the same steps:
//!
//! 1. [`load_image`](RefinementSession::load_image) decodes the upload and
//!    fixes its interaction-surface size
//! 2. [`automatic_mask`](RefinementSession::automatic_mask) asks the gateway
//!    once per distinct content
//! 3. [`render`](RefinementSession::render) produces the uncorrected result
//! 4. [`apply_snapshot`](RefinementSession::apply_snapshot) folds drawn strokes
//!    into the image's state, any number of times
//! 5. [`render_refined`](RefinementSession::render_refined) produces the
//!    corrected result
//!
//! The session takes `&mut self` for every state change. Callers sharing one
//! across tasks wrap it in a mutex, which serializes merges per image.

use crate::accumulator::{SnapshotFingerprint, StrokeAccumulator, StrokeState};
use crate::cache::SegmentationCache;
use crate::classifier::StrokeClassifier;
use crate::compositor::{ImageCompositor, MaskCompositor};
use crate::config::{RefineConfig, SurfaceSpec, MAX_OUTPUT_WIDTH_LIMIT};
use crate::error::{RefineError, Result};
use crate::gateway::SegmentationGateway;
use crate::resolution::ResolutionMapper;
use crate::types::{AlphaMask, BackgroundColor, BinaryMask, CanvasSnapshot, ImageId};
use image::RgbImage;
use instant::{Duration, Instant};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// A decoded upload together with its original bytes
#[derive(Debug, Clone)]
pub struct SourceImage {
    id: ImageId,
    bytes: Vec<u8>,
    image: RgbImage,
    surface_size: (u32, u32),
}

impl SourceImage {
    #[must_use]
    pub fn id(&self) -> &ImageId {
        &self.id
    }

    /// Encoded bytes as uploaded; these are what gets hashed and segmented
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    #[must_use]
    pub fn surface_size(&self) -> (u32, u32) {
        self.surface_size
    }
}

/// Outcome of processing one input
#[derive(Debug, Clone)]
pub struct ProcessedImage {
    pub id: ImageId,
    /// PNG of the uncorrected composite
    pub output: Vec<u8>,
    /// PNG using accumulated strokes, present when the image has any
    pub refined_output: Option<Vec<u8>>,
    pub original_dimensions: (u32, u32),
    pub output_dimensions: (u32, u32),
    pub elapsed: Duration,
}

/// Refinement state for any number of images
pub struct RefinementSession<G> {
    config: RefineConfig,
    gateway: G,
    cache: SegmentationCache,
    strokes: StrokeAccumulator,
    surfaces: HashMap<ImageId, (u32, u32)>,
    classifier: StrokeClassifier,
    mask_compositor: MaskCompositor,
}

impl<G> std::fmt::Debug for RefinementSession<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefinementSession")
            .field("config", &self.config)
            .field("cache", &self.cache.stats())
            .field("images", &self.surfaces.len())
            .finish_non_exhaustive()
    }
}

impl<G: SegmentationGateway> RefinementSession<G> {
    /// Create a session; the configuration is validated first
    pub fn new(config: RefineConfig, gateway: G) -> Result<Self> {
        config.validate()?;
        if gateway.model_id() != config.model_id {
            debug!(
                configured = %config.model_id,
                gateway = gateway.model_id(),
                "Gateway model differs from configured model; cache keys use the gateway's"
            );
        }
        Ok(Self {
            classifier: StrokeClassifier::new(config.classification),
            mask_compositor: MaskCompositor::new(config.stroke_resampling),
            config,
            gateway,
            cache: SegmentationCache::new(),
            strokes: StrokeAccumulator::new(),
            surfaces: HashMap::new(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &RefineConfig {
        &self.config
    }

    pub fn set_background_color(&mut self, color: BackgroundColor) {
        self.config.background_color = color;
    }

    pub fn set_max_output_width(&mut self, width: u32) -> Result<()> {
        if width > MAX_OUTPUT_WIDTH_LIMIT {
            return Err(RefineError::config_value_error(
                "max output width",
                width,
                "0-8000",
                Some(0),
            ));
        }
        self.config.max_output_width = width;
        Ok(())
    }

    #[must_use]
    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    #[must_use]
    pub fn cache(&self) -> &SegmentationCache {
        &self.cache
    }

    #[must_use]
    pub fn strokes(&self) -> &StrokeAccumulator {
        &self.strokes
    }

    /// Decode an upload and register its interaction surface
    ///
    /// # Errors
    /// - `RefineError::Decode` when the bytes are not a raster image
    #[instrument(skip(self, bytes), fields(image = %id, bytes = bytes.len()))]
    pub fn load_image(&mut self, id: ImageId, bytes: Vec<u8>) -> Result<SourceImage> {
        let decoded = image::load_from_memory(&bytes).map_err(|e| {
            RefineError::decode(format!("Failed to decode image: {}", e)).for_image(id.as_str())
        })?;
        let image = decoded.to_rgb8();
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(RefineError::decode("Image has zero width or height").for_image(id.as_str()));
        }

        let surface_size =
            ResolutionMapper::bounded_size(width, height, self.config.surface_max_width);
        let previous = self.surfaces.insert(id.clone(), surface_size);
        let stale = previous.is_some_and(|previous| previous != surface_size)
            || self
                .strokes
                .state(&id)
                .is_some_and(|state| state.dimensions() != surface_size);
        if stale {
            warn!(
                image = %id,
                "Stroke state does not match the new surface size; discarding it"
            );
            self.strokes.forget(&id);
        }

        debug!(
            width,
            height,
            surface_width = surface_size.0,
            surface_height = surface_size.1,
            "Loaded image"
        );
        Ok(SourceImage {
            id,
            bytes,
            image,
            surface_size,
        })
    }

    /// Automatic foreground mask, segmenting at most once per content
    ///
    /// # Errors
    /// - `RefineError::Segmentation` from the gateway, tagged with the image
    pub async fn automatic_mask(&mut self, source: &SourceImage) -> Result<Arc<AlphaMask>> {
        let mask = self
            .cache
            .get_or_segment(&self.gateway, &source.bytes)
            .await
            .map_err(|e| e.for_image(source.id.as_str()))?;
        if mask.dimensions() != source.dimensions() {
            debug!(
                image = %source.id,
                mask_width = mask.dimensions().0,
                mask_height = mask.dimensions().1,
                "Automatic mask differs from image size; it will be resampled"
            );
        }
        Ok(mask)
    }

    #[must_use]
    pub fn surface_size(&self, source: &SourceImage) -> (u32, u32) {
        source.surface_size
    }

    /// Reference image the drawing surface shows and strokes are diffed against
    #[must_use]
    pub fn surface_background(&self, source: &SourceImage) -> RgbImage {
        ResolutionMapper::resample_image(&source.image, source.surface_size)
    }

    #[must_use]
    pub fn surface_spec(&self, source: &SourceImage) -> SurfaceSpec {
        SurfaceSpec::new(source.surface_size, self.config.brush)
    }

    /// Classify a snapshot without touching any state
    #[must_use]
    pub fn classify_snapshot(&self, snapshot: &CanvasSnapshot) -> crate::types::StrokeDelta {
        self.classifier.classify(snapshot)
    }

    /// Fold the ink on `snapshot` into the image's keep/remove state
    ///
    /// Returns `false` when the snapshot is identical to the last one applied
    /// for this image and was skipped.
    ///
    /// # Errors
    /// - `RefineError::UnknownImage` when `id` was never loaded
    /// - `RefineError::DimensionMismatch` when the snapshot is not at the
    ///   image's interaction-surface size
    #[instrument(skip(self, snapshot), fields(image = %id))]
    pub fn apply_snapshot(&mut self, id: &ImageId, snapshot: &CanvasSnapshot) -> Result<bool> {
        let surface = *self
            .surfaces
            .get(id)
            .ok_or_else(|| RefineError::unknown_image(id.as_str()))?;
        if snapshot.dimensions() != surface {
            return Err(RefineError::dimension_mismatch(
                "canvas snapshot vs. interaction surface",
                surface,
                snapshot.dimensions(),
            )
            .for_image(id.as_str()));
        }

        let fingerprint = SnapshotFingerprint::of(snapshot);
        if self.strokes.is_latest(id, &fingerprint) {
            debug!("Snapshot unchanged; skipping merge");
            return Ok(false);
        }

        let delta = self.classifier.classify(snapshot);
        self.strokes
            .merge_snapshot(id, &delta, fingerprint)
            .map_err(|e| e.for_image(id.as_str()))?;
        Ok(true)
    }

    /// Discard all corrections for the image
    pub fn clear_strokes(&mut self, id: &ImageId) {
        self.strokes.reset(id);
    }

    #[must_use]
    pub fn stroke_state(&self, source: &SourceImage) -> StrokeState {
        self.strokes.get(&source.id, source.surface_size)
    }

    /// `(automatic OR keep) AND NOT remove` at the image's original size
    pub fn final_mask(&self, source: &SourceImage, alpha: &AlphaMask) -> Result<BinaryMask> {
        let state = self.stroke_state(source);
        self.mask_compositor
            .composite(alpha, &state.keep, &state.remove, source.dimensions())
            .map_err(|e| e.for_image(source.id.as_str()))
    }

    /// Composite using only the automatic mask
    pub fn render(&self, source: &SourceImage, alpha: &AlphaMask) -> Result<Vec<u8>> {
        let state = StrokeState::empty(source.surface_size);
        let mask = self
            .mask_compositor
            .composite(alpha, &state.keep, &state.remove, source.dimensions())?;
        self.compose(source, &mask)
    }

    /// Composite using the automatic mask corrected by accumulated strokes
    pub fn render_refined(&self, source: &SourceImage, alpha: &AlphaMask) -> Result<Vec<u8>> {
        let mask = self.final_mask(source, alpha)?;
        self.compose(source, &mask)
    }

    fn compose(&self, source: &SourceImage, mask: &BinaryMask) -> Result<Vec<u8>> {
        ImageCompositor::compose(
            &source.image,
            mask,
            self.config.background_color,
            self.config.max_output_width,
        )
        .map_err(|e| e.for_image(source.id.as_str()))
    }

    /// Size of what [`render`](Self::render) produces for `source`
    #[must_use]
    pub fn output_dimensions(&self, source: &SourceImage) -> (u32, u32) {
        let (width, height) = source.dimensions();
        ResolutionMapper::bounded_size(width, height, self.config.max_output_width)
    }

    /// Decode, segment and render one input
    #[instrument(skip(self, bytes), fields(image = %id))]
    pub async fn process(&mut self, id: ImageId, bytes: Vec<u8>) -> Result<ProcessedImage> {
        let started = Instant::now();
        let source = self.load_image(id, bytes)?;
        let alpha = self.automatic_mask(&source).await?;
        let output = self.render(&source, &alpha)?;

        let has_strokes = self
            .strokes
            .state(&source.id)
            .is_some_and(|state| !state.is_empty());
        let refined_output = if has_strokes {
            Some(self.render_refined(&source, &alpha)?)
        } else {
            None
        };

        Ok(ProcessedImage {
            original_dimensions: source.dimensions(),
            output_dimensions: self.output_dimensions(&source),
            id: source.id,
            output,
            refined_output,
            elapsed: started.elapsed(),
        })
    }

    /// Process every input; a failing input never stops the others
    pub async fn process_batch<I>(&mut self, inputs: I) -> Vec<(ImageId, Result<ProcessedImage>)>
    where
        I: IntoIterator<Item = (ImageId, Vec<u8>)>,
    {
        let started = Instant::now();
        let mut results = Vec::new();
        for (id, bytes) in inputs {
            let result = self.process(id.clone(), bytes).await;
            if let Err(e) = &result {
                warn!(image = %id, error = %e, "Failed to process image");
            }
            results.push((id, result));
        }

        let failed = results.iter().filter(|(_, r)| r.is_err()).count();
        info!(
            total = results.len(),
            failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Batch finished"
        );
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{MockGateway, MockMask};
    use image::{DynamicImage, ImageFormat, Rgb, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png(image: RgbImage) -> Vec<u8> {
        let mut buffer = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .unwrap();
        buffer
    }

    fn decode(bytes: &[u8]) -> RgbImage {
        image::load_from_memory(bytes).unwrap().to_rgb8()
    }

    fn gray_image(width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([90, 90, 90]))
    }

    fn session(gateway: MockGateway) -> RefinementSession<MockGateway> {
        RefinementSession::new(RefineConfig::default(), gateway).unwrap()
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = RefineConfig::default();
        config.surface_max_width = 0;
        assert!(RefinementSession::new(config, MockGateway::default()).is_err());
    }

    #[test]
    fn test_load_image_bounds_surface() {
        let mut session = session(MockGateway::default());
        let source = session
            .load_image(ImageId::from("wide.png"), png(gray_image(2000, 1000)))
            .unwrap();
        assert_eq!(source.dimensions(), (2000, 1000));
        assert_eq!(session.surface_size(&source), (1024, 512));
        assert_eq!(session.surface_background(&source).dimensions(), (1024, 512));

        let spec = session.surface_spec(&source);
        assert_eq!((spec.width, spec.height), (1024, 512));
        assert_eq!(spec.stroke_color, "#00FF00");
    }

    #[test]
    fn test_load_image_decode_error_names_image() {
        let mut session = session(MockGateway::default());
        let err = session
            .load_image(ImageId::from("broken.jpg"), b"nope".to_vec())
            .unwrap_err();
        assert!(matches!(err, RefineError::Decode(_)));
        assert!(err.to_string().contains("broken.jpg"));
    }

    #[tokio::test]
    async fn test_automatic_mask_is_memoized() {
        let gateway = MockGateway::foreground();
        let mut session = session(gateway.clone());
        let bytes = png(gray_image(8, 8));

        let first = session
            .load_image(ImageId::from("a.png"), bytes.clone())
            .unwrap();
        let again = session.load_image(ImageId::from("copy.png"), bytes).unwrap();
        session.automatic_mask(&first).await.unwrap();
        session.automatic_mask(&first).await.unwrap();
        session.automatic_mask(&again).await.unwrap();
        assert_eq!(gateway.calls(), 1);
    }

    #[tokio::test]
    async fn test_keep_stroke_restores_foreground() {
        let mut session = session(MockGateway::background());
        let mut original = gray_image(4, 4);
        original.put_pixel(1, 1, Rgb([10, 20, 30]));
        let source = session
            .load_image(ImageId::from("a.png"), png(original))
            .unwrap();
        let alpha = session.automatic_mask(&source).await.unwrap();

        let initial = decode(&session.render(&source, &alpha).unwrap());
        assert!(initial.pixels().all(|p| *p == Rgb([255, 255, 255])));

        let mut ink = RgbaImage::new(4, 4);
        ink.put_pixel(1, 1, Rgba([0, 255, 0, 255]));
        let snapshot = CanvasSnapshot::new(ink, session.surface_background(&source)).unwrap();
        assert!(session.apply_snapshot(source.id(), &snapshot).unwrap());
        assert!(!session.apply_snapshot(source.id(), &snapshot).unwrap());

        let refined = decode(&session.render_refined(&source, &alpha).unwrap());
        assert_eq!(*refined.get_pixel(1, 1), Rgb([10, 20, 30]));
        assert_eq!(*refined.get_pixel(0, 0), Rgb([255, 255, 255]));

        session.clear_strokes(source.id());
        assert!(session.stroke_state(&source).is_empty());
        let cleared = decode(&session.render_refined(&source, &alpha).unwrap());
        assert_eq!(cleared, initial);
    }

    #[test]
    fn test_snapshot_size_must_match_surface() {
        let mut session = session(MockGateway::default());
        let source = session
            .load_image(ImageId::from("a.png"), png(gray_image(4, 4)))
            .unwrap();
        let snapshot =
            CanvasSnapshot::new(RgbaImage::new(3, 3), RgbImage::new(3, 3)).unwrap();
        let err = session.apply_snapshot(source.id(), &snapshot).unwrap_err();
        assert!(matches!(err, RefineError::DimensionMismatch(_)));
    }

    #[test]
    fn test_snapshot_for_unloaded_image_is_rejected() {
        let mut session = session(MockGateway::default());
        let id = ImageId::from("a.png");
        let snapshot =
            CanvasSnapshot::new(RgbaImage::new(4, 4), RgbImage::new(4, 4)).unwrap();

        let err = session.apply_snapshot(&id, &snapshot).unwrap_err();
        assert!(matches!(err, RefineError::UnknownImage(_)));
        assert!(session.strokes().state(&id).is_none());

        let source = session.load_image(id, png(gray_image(8, 8))).unwrap();
        assert_eq!(session.stroke_state(&source).dimensions(), (8, 8));
    }

    #[test]
    fn test_reload_with_new_size_discards_strokes() {
        let mut session = session(MockGateway::default());
        let id = ImageId::from("a.png");
        let source = session.load_image(id.clone(), png(gray_image(4, 4))).unwrap();

        let mut ink = RgbaImage::new(4, 4);
        ink.put_pixel(0, 0, Rgba([0, 255, 0, 255]));
        let snapshot = CanvasSnapshot::new(ink, session.surface_background(&source)).unwrap();
        assert!(session.apply_snapshot(&id, &snapshot).unwrap());

        let source = session.load_image(id.clone(), png(gray_image(8, 8))).unwrap();
        assert!(session.strokes().state(&id).is_none());

        let mut ink = RgbaImage::new(8, 8);
        ink.put_pixel(7, 7, Rgba([255, 0, 0, 255]));
        let snapshot = CanvasSnapshot::new(ink, session.surface_background(&source)).unwrap();
        assert!(session.apply_snapshot(&id, &snapshot).unwrap());
        let state = session.stroke_state(&source);
        assert_eq!(state.dimensions(), (8, 8));
        assert!(state.remove.get(7, 7));
    }

    #[test]
    fn test_same_ink_over_new_content_is_applied_again() {
        let mut session = session(MockGateway::default());
        let id = ImageId::from("a.png");
        let ink = RgbaImage::from_fn(4, 4, |x, y| {
            if (x, y) == (2, 2) {
                Rgba([0, 255, 0, 255])
            } else {
                Rgba([90, 90, 90, 255])
            }
        });

        let first = session.load_image(id.clone(), png(gray_image(4, 4))).unwrap();
        let snapshot =
            CanvasSnapshot::new(ink.clone(), session.surface_background(&first)).unwrap();
        assert!(session.apply_snapshot(&id, &snapshot).unwrap());
        assert!(!session.apply_snapshot(&id, &snapshot).unwrap());

        let reloaded = RgbImage::from_pixel(4, 4, Rgb([200, 40, 40]));
        let second = session.load_image(id.clone(), png(reloaded)).unwrap();
        let snapshot = CanvasSnapshot::new(ink, session.surface_background(&second)).unwrap();
        assert!(session.apply_snapshot(&id, &snapshot).unwrap());
    }

    #[tokio::test]
    async fn test_output_width_and_background_setters() {
        let mut session = session(MockGateway::new(MockMask::Filled(0)));
        session.set_background_color(BackgroundColor::new(0, 0, 255));
        session.set_max_output_width(10).unwrap();
        assert!(session.set_max_output_width(9000).is_err());

        let source = session
            .load_image(ImageId::from("a.png"), png(gray_image(40, 20)))
            .unwrap();
        let alpha = session.automatic_mask(&source).await.unwrap();
        let output = decode(&session.render(&source, &alpha).unwrap());
        assert_eq!(output.dimensions(), (10, 5));
        assert_eq!(session.output_dimensions(&source), (10, 5));
        assert!(output.pixels().all(|p| *p == Rgb([0, 0, 255])));
    }

    #[tokio::test]
    async fn test_batch_continues_after_bad_input() {
        let mut session = session(MockGateway::foreground());
        let results = session
            .process_batch(vec![
                (ImageId::from("good.png"), png(gray_image(3, 3))),
                (ImageId::from("bad.png"), b"garbage".to_vec()),
                (ImageId::from("also-good.png"), png(gray_image(2, 5))),
            ])
            .await;

        assert_eq!(results.len(), 3);
        assert!(results[0].1.is_ok());
        assert!(matches!(results[1].1, Err(RefineError::Decode(_))));
        let last = results[2].1.as_ref().unwrap();
        assert_eq!(last.output_dimensions, (2, 5));
        assert!(last.refined_output.is_none());
    }
}

//! Final mask construction and solid-background compositing

use crate::error::{RefineError, Result};
use crate::resolution::{MaskResampling, ResolutionMapper};
use crate::types::{AlphaMask, BackgroundColor, BinaryMask};
use image::{DynamicImage, ImageFormat, RgbImage};
use std::io::Cursor;
use tracing::{debug, instrument};

/// Merges the automatic mask with keep/remove corrections
///
/// `final = (base OR keep) AND NOT remove`, evaluated at original
/// resolution. Remove wins over both keep and the automatic decision.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaskCompositor {
    stroke_resampling: MaskResampling,
}

impl MaskCompositor {
    #[must_use]
    pub fn new(stroke_resampling: MaskResampling) -> Self {
        Self { stroke_resampling }
    }

    #[must_use]
    pub fn stroke_resampling(&self) -> MaskResampling {
        self.stroke_resampling
    }

    /// Build the final foreground mask at `original_size`
    #[instrument(skip_all, fields(width = original_size.0, height = original_size.1))]
    pub fn composite(
        &self,
        alpha: &AlphaMask,
        keep: &BinaryMask,
        remove: &BinaryMask,
        original_size: (u32, u32),
    ) -> Result<BinaryMask> {
        keep.ensure_same_size(remove, "keep/remove masks")?;

        let base = ResolutionMapper::resample_mask(&alpha.foreground(), original_size);
        let keep = ResolutionMapper::resample_mask_with(keep, original_size, self.stroke_resampling);
        let remove =
            ResolutionMapper::resample_mask_with(remove, original_size, self.stroke_resampling);

        for (name, mask) in [("automatic mask", &base), ("keep", &keep), ("remove", &remove)] {
            if mask.dimensions() != original_size {
                return Err(RefineError::dimension_mismatch(
                    &format!("{} after resampling", name),
                    original_size,
                    mask.dimensions(),
                ));
            }
        }

        let merged = BinaryMask::from_fn(original_size.0, original_size.1, |x, y| {
            (base.get(x, y) || keep.get(x, y)) && !remove.get(x, y)
        });
        debug!(
            base_pixels = base.count(),
            final_pixels = merged.count(),
            "Composited final mask"
        );
        Ok(merged)
    }
}

/// Pastes foreground pixels over a solid color and encodes the result
pub struct ImageCompositor;

impl ImageCompositor {
    /// Composite `original` onto `background` and encode as PNG
    ///
    /// With `max_output_width > 0` and a wider image, both the image
    /// (Lanczos) and the mask (nearest) are downscaled first.
    pub fn compose(
        original: &RgbImage,
        mask: &BinaryMask,
        background: BackgroundColor,
        max_output_width: u32,
    ) -> Result<Vec<u8>> {
        let canvas = Self::compose_image(original, mask, background, max_output_width)?;
        Self::encode_png(canvas)
    }

    /// Same as [`compose`](Self::compose) starting from encoded image bytes
    pub fn compose_encoded(
        image_bytes: &[u8],
        mask: &BinaryMask,
        background: BackgroundColor,
        max_output_width: u32,
    ) -> Result<Vec<u8>> {
        let original = image::load_from_memory(image_bytes)
            .map_err(|e| RefineError::decode(format!("Failed to decode image from bytes: {}", e)))?
            .to_rgb8();
        Self::compose(&original, mask, background, max_output_width)
    }

    /// Composite without encoding
    #[instrument(skip_all, fields(width = original.width(), height = original.height(), max_output_width = max_output_width))]
    pub fn compose_image(
        original: &RgbImage,
        mask: &BinaryMask,
        background: BackgroundColor,
        max_output_width: u32,
    ) -> Result<RgbImage> {
        if mask.dimensions() != original.dimensions() {
            return Err(RefineError::dimension_mismatch(
                "final mask vs. original image",
                original.dimensions(),
                mask.dimensions(),
            ));
        }

        let (width, height) = original.dimensions();
        let (image, mask) = if max_output_width > 0 && width > max_output_width {
            let target = ResolutionMapper::bounded_size(width, height, max_output_width);
            debug!(
                target_width = target.0,
                target_height = target.1,
                "Downscaling output"
            );
            (
                ResolutionMapper::resample_image(original, target),
                ResolutionMapper::resample_mask(mask, target),
            )
        } else {
            (original.clone(), mask.clone())
        };

        if mask.dimensions() != image.dimensions() {
            return Err(RefineError::dimension_mismatch(
                "resampled mask vs. resampled image",
                image.dimensions(),
                mask.dimensions(),
            ));
        }

        let mut canvas = RgbImage::from_pixel(image.width(), image.height(), background.to_rgb());
        for (x, y, pixel) in canvas.enumerate_pixels_mut() {
            if mask.get(x, y) {
                *pixel = *image.get_pixel(x, y);
            }
        }
        Ok(canvas)
    }

    /// Lossless RGB PNG encoding
    pub fn encode_png(canvas: RgbImage) -> Result<Vec<u8>> {
        let (width, height) = canvas.dimensions();
        if width == 0 || height == 0 {
            return Err(RefineError::encode(format!(
                "Cannot encode a {}x{} image",
                width, height
            )));
        }

        let mut buffer = Vec::new();
        DynamicImage::ImageRgb8(canvas)
            .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .map_err(|e| RefineError::encode(format!("PNG encoding failed: {}", e)))?;
        Ok(buffer)
    }
}

//! Geometry between original-image resolution and the interaction surface
//!
//! Masks are only ever resampled with nearest-neighbor so a pixel stays
//! either foreground or background; color images use a Lanczos filter.

use crate::types::{BinaryMask, FOREGROUND_THRESHOLD};
use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Widest interaction surface handed to a drawing surface
pub const DEFAULT_SURFACE_MAX_WIDTH: u32 = 1024;

/// How stroke masks are scaled up to original resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MaskResampling {
    /// Nearest-neighbor; binary in, binary out
    #[default]
    Nearest,
    /// Bilinear upscale re-thresholded at 128, for softer stroke outlines
    Smoothed,
}

/// Resolution bookkeeping between original images and interaction surfaces
pub struct ResolutionMapper;

impl ResolutionMapper {
    /// Size bounded to `max_width`, preserving aspect ratio
    ///
    /// Returns the original size when it already fits or when `max_width`
    /// is 0. The scaled height is rounded and never drops below 1.
    #[must_use]
    pub fn bounded_size(original_width: u32, original_height: u32, max_width: u32) -> (u32, u32) {
        if max_width == 0 || original_width <= max_width {
            return (original_width, original_height);
        }
        let scaled = f64::from(original_height) * f64::from(max_width) / f64::from(original_width);
        (max_width, (scaled.round() as u32).max(1))
    }

    /// Nearest-neighbor resize of a boolean grid; identity when sizes match
    #[must_use]
    pub fn resample_mask(mask: &BinaryMask, target: (u32, u32)) -> BinaryMask {
        if mask.dimensions() == target {
            return mask.clone();
        }
        if target.0 == 0 || target.1 == 0 || mask.width() == 0 || mask.height() == 0 {
            return BinaryMask::new(target.0, target.1);
        }
        let resized = imageops::resize(&mask.to_luma(), target.0, target.1, FilterType::Nearest);
        BinaryMask::from_luma(&resized, FOREGROUND_THRESHOLD)
    }

    /// Resize a boolean grid with the requested strategy
    #[must_use]
    pub fn resample_mask_with(
        mask: &BinaryMask,
        target: (u32, u32),
        resampling: MaskResampling,
    ) -> BinaryMask {
        match resampling {
            MaskResampling::Nearest => Self::resample_mask(mask, target),
            MaskResampling::Smoothed => {
                if mask.dimensions() == target
                    || target.0 == 0
                    || target.1 == 0
                    || mask.width() == 0
                    || mask.height() == 0
                {
                    return Self::resample_mask(mask, target);
                }
                let resized =
                    imageops::resize(&mask.to_luma(), target.0, target.1, FilterType::Triangle);
                BinaryMask::from_luma(&resized, FOREGROUND_THRESHOLD)
            },
        }
    }

    /// Anti-aliased resize of a color image; identity when sizes match
    #[must_use]
    pub fn resample_image(image: &RgbImage, target: (u32, u32)) -> RgbImage {
        if image.dimensions() == target {
            return image.clone();
        }
        imageops::resize(image, target.0, target.1, FilterType::Lanczos3)
    }
}

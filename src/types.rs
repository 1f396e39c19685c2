//! Core data types for mask refinement

use crate::error::{RefineError, Result};
use image::{GenericImageView, GrayImage, Luma, Rgb, RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Intensity at or above which an alpha value counts as foreground
pub const FOREGROUND_THRESHOLD: u8 = 128;

/// Stable identity of a source image for the lifetime of a session
///
/// Usually the original file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageId(String);

impl ImageId {
    #[must_use]
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name without directories and its last extension
    #[must_use]
    pub fn stem(&self) -> &str {
        let name = self
            .0
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.0);
        match name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => name,
        }
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ImageId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ImageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Solid background color painted behind the foreground
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BackgroundColor(pub [u8; 3]);

impl BackgroundColor {
    pub const WHITE: Self = Self([255, 255, 255]);

    #[must_use]
    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self([r, g, b])
    }

    #[must_use]
    pub fn to_rgb(self) -> Rgb<u8> {
        Rgb(self.0)
    }
}

impl Default for BackgroundColor {
    fn default() -> Self {
        Self::WHITE
    }
}

impl fmt::Display for BackgroundColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b] = self.0;
        write!(f, "#{:02X}{:02X}{:02X}", r, g, b)
    }
}

impl FromStr for BackgroundColor {
    type Err = RefineError;

    /// Parse `#RRGGBB` or `RRGGBB`
    fn from_str(s: &str) -> Result<Self> {
        let hex = s.trim().trim_start_matches('#');
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(RefineError::invalid_config(format!(
                "Invalid background color '{}': expected #RRGGBB",
                s
            )));
        }
        let channel = |range: std::ops::Range<usize>| {
            hex.get(range)
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| RefineError::invalid_config(format!("Invalid color '{}'", s)))
        };
        Ok(Self([channel(0..2)?, channel(2..4)?, channel(4..6)?]))
    }
}

impl TryFrom<String> for BackgroundColor {
    type Error = RefineError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<BackgroundColor> for String {
    fn from(color: BackgroundColor) -> Self {
        color.to_string()
    }
}

/// Foreground confidence per pixel, as produced by the segmentation gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlphaMask {
    data: Vec<u8>,
    dimensions: (u32, u32),
}

impl AlphaMask {
    /// Wrap raw row-major intensities
    pub fn from_raw(data: Vec<u8>, dimensions: (u32, u32)) -> Result<Self> {
        let expected = dimensions.0 as usize * dimensions.1 as usize;
        if data.len() != expected {
            return Err(RefineError::segmentation(format!(
                "Mask data has {} values, expected {} for {}x{}",
                data.len(),
                expected,
                dimensions.0,
                dimensions.1
            )));
        }
        Ok(Self { data, dimensions })
    }

    /// Mask with every pixel set to `value`
    #[must_use]
    pub fn filled(dimensions: (u32, u32), value: u8) -> Self {
        Self {
            data: vec![value; dimensions.0 as usize * dimensions.1 as usize],
            dimensions,
        }
    }

    #[must_use]
    pub fn from_image(image: &GrayImage) -> Self {
        Self {
            data: image.as_raw().clone(),
            dimensions: image.dimensions(),
        }
    }

    /// Decode a mask returned by a segmentation program
    ///
    /// Images carrying an alpha channel contribute that channel (cut-out
    /// output); anything else is read as luma.
    pub fn from_encoded(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(RefineError::segmentation("Segmentation output is empty"));
        }
        let decoded = image::load_from_memory(bytes).map_err(|e| {
            RefineError::segmentation(format!("Failed to decode segmentation output: {}", e))
        })?;
        let (width, height) = decoded.dimensions();
        if width == 0 || height == 0 {
            return Err(RefineError::segmentation(
                "Segmentation output has zero width or height",
            ));
        }

        if decoded.color().has_alpha() {
            let rgba = decoded.to_rgba8();
            let data = rgba.pixels().map(|p| p[3]).collect();
            Self::from_raw(data, (width, height))
        } else {
            Ok(Self::from_image(&decoded.to_luma8()))
        }
    }

    pub fn to_image(&self) -> Result<GrayImage> {
        let (width, height) = self.dimensions;
        GrayImage::from_raw(width, height, self.data.clone())
            .ok_or_else(|| RefineError::internal("Failed to create image from mask data"))
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Foreground decision per pixel: `value >= threshold`
    #[must_use]
    pub fn threshold(&self, threshold: u8) -> BinaryMask {
        BinaryMask {
            width: self.dimensions.0,
            height: self.dimensions.1,
            bits: self.data.iter().map(|&v| v >= threshold).collect(),
        }
    }

    /// Foreground decision at [`FOREGROUND_THRESHOLD`]
    #[must_use]
    pub fn foreground(&self) -> BinaryMask {
        self.threshold(FOREGROUND_THRESHOLD)
    }
}

/// Grid of booleans used for stroke masks and the final foreground mask
#[derive(Clone, PartialEq, Eq)]
pub struct BinaryMask {
    width: u32,
    height: u32,
    bits: Vec<bool>,
}

impl BinaryMask {
    /// All-false mask
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self::filled(width, height, false)
    }

    #[must_use]
    pub fn filled(width: u32, height: u32, value: bool) -> Self {
        Self {
            width,
            height,
            bits: vec![value; width as usize * height as usize],
        }
    }

    #[must_use]
    pub fn from_fn<F: FnMut(u32, u32) -> bool>(width: u32, height: u32, mut f: F) -> Self {
        let mut bits = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                bits.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            bits,
        }
    }

    /// Read a 0/255 luma image; pixels `>= threshold` are set
    #[must_use]
    pub fn from_luma(image: &GrayImage, threshold: u8) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            bits: image.pixels().map(|p| p[0] >= threshold).collect(),
        }
    }

    /// Render as 0/255 luma
    #[must_use]
    pub fn to_luma(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            Luma([if self.get(x, y) { 255 } else { 0 }])
        })
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn index(&self, x: u32, y: u32) -> Option<usize> {
        (x < self.width && y < self.height).then(|| y as usize * self.width as usize + x as usize)
    }

    /// Value at `(x, y)`; out-of-range coordinates read as false
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> bool {
        self.index(x, y)
            .and_then(|i| self.bits.get(i))
            .copied()
            .unwrap_or(false)
    }

    /// Set `(x, y)`; out-of-range coordinates are ignored
    pub fn set(&mut self, x: u32, y: u32, value: bool) {
        if let Some(bit) = self.index(x, y).and_then(|i| self.bits.get_mut(i)) {
            *bit = value;
        }
    }

    /// `self <- self OR other`
    pub fn union_with(&mut self, other: &BinaryMask) -> Result<()> {
        self.ensure_same_size(other, "mask union")?;
        for (bit, &o) in self.bits.iter_mut().zip(&other.bits) {
            *bit |= o;
        }
        Ok(())
    }

    /// Zero every pixel, keeping the size
    pub fn clear(&mut self) {
        self.bits.fill(false);
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.bits.iter().filter(|&&b| b).count()
    }

    #[must_use]
    pub fn any(&self) -> bool {
        self.bits.iter().any(|&b| b)
    }

    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        self.bits.iter().copied()
    }

    pub(crate) fn ensure_same_size(&self, other: &BinaryMask, context: &str) -> Result<()> {
        if self.dimensions() == other.dimensions() {
            Ok(())
        } else {
            Err(RefineError::dimension_mismatch(
                context,
                self.dimensions(),
                other.dimensions(),
            ))
        }
    }
}

impl fmt::Debug for BinaryMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinaryMask")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("set", &self.count())
            .finish()
    }
}

/// Rendered ink reported by the drawing surface, with the image it was drawn over
#[derive(Debug, Clone)]
pub struct CanvasSnapshot {
    ink: RgbaImage,
    background: RgbImage,
}

impl CanvasSnapshot {
    pub fn new(ink: RgbaImage, background: RgbImage) -> Result<Self> {
        if ink.dimensions() != background.dimensions() {
            return Err(RefineError::dimension_mismatch(
                "canvas snapshot vs. surface background",
                background.dimensions(),
                ink.dimensions(),
            ));
        }
        Ok(Self { ink, background })
    }

    #[must_use]
    pub fn ink(&self) -> &RgbaImage {
        &self.ink
    }

    #[must_use]
    pub fn background(&self) -> &RgbImage {
        &self.background
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.ink.dimensions()
    }
}

/// Keep/remove pixels found in one snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrokeDelta {
    pub keep: BinaryMask,
    pub remove: BinaryMask,
}

impl StrokeDelta {
    #[must_use]
    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            keep: BinaryMask::new(width, height),
            remove: BinaryMask::new(width, height),
        }
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.keep.dimensions()
    }
}

//! File input/output for the refinement workflow
//!
//! Keeps filesystem access out of the session so the core stays testable
//! with in-memory bytes.

use crate::error::{RefineError, Result};
use crate::types::{CanvasSnapshot, ImageId};
use image::RgbImage;
use std::path::Path;

/// Prefix of uncorrected outputs
pub const OUTPUT_PREFIX: &str = "bg_";
/// Prefix of outputs that include stroke corrections
pub const REFINED_OUTPUT_PREFIX: &str = "bg_refined_";
/// Prefix of exported interaction-surface files
pub const SURFACE_PREFIX: &str = "surface_";

/// Service for handling image file input/output operations
pub struct ImageIOService;

impl ImageIOService {
    /// Read an input file into memory without decoding it
    ///
    /// # Errors
    /// - File does not exist or cannot be read
    pub fn load_bytes<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
        let path_ref = path.as_ref();

        if !path_ref.exists() {
            return Err(RefineError::file_io_error(
                "read image file",
                path_ref,
                &std::io::Error::new(std::io::ErrorKind::NotFound, "file does not exist"),
            ));
        }

        let bytes = std::fs::read(path_ref)
            .map_err(|e| RefineError::file_io_error("read image file", path_ref, &e))?;
        log::debug!("Read {} bytes from {}", bytes.len(), path_ref.display());
        Ok(bytes)
    }

    /// Write bytes, creating parent directories as needed
    pub fn save_bytes<P: AsRef<Path>>(bytes: &[u8], path: P) -> Result<()> {
        let path_ref = path.as_ref();

        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    RefineError::file_io_error("create output directory", parent, &e)
                })?;
            }
        }

        std::fs::write(path_ref, bytes)
            .map_err(|e| RefineError::file_io_error("write output file", path_ref, &e))?;
        log::debug!("Wrote {} bytes to {}", bytes.len(), path_ref.display());
        Ok(())
    }

    /// Save an RGB image as PNG
    pub fn save_png<P: AsRef<Path>>(image: &RgbImage, path: P) -> Result<()> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    RefineError::file_io_error("create output directory", parent, &e)
                })?;
            }
        }
        image
            .save_with_format(path_ref, image::ImageFormat::Png)
            .map_err(|e| RefineError::encode(format!("Failed to save {}: {}", path_ref.display(), e)))
    }

    /// Load an ink layer exported from a drawing surface
    ///
    /// The file is read as RGBA; formats without alpha are treated as fully
    /// opaque ink.
    ///
    /// # Errors
    /// - `RefineError::Decode` when the file is not an image
    /// - `RefineError::DimensionMismatch` when it is not at the surface size
    pub fn load_snapshot<P: AsRef<Path>>(path: P, background: &RgbImage) -> Result<CanvasSnapshot> {
        let path_ref = path.as_ref();
        let bytes = Self::load_bytes(path_ref)?;
        let ink = image::load_from_memory(&bytes)
            .map_err(|e| {
                RefineError::decode(format!(
                    "Failed to decode stroke snapshot {}: {}",
                    path_ref.display(),
                    e
                ))
            })?
            .to_rgba8();
        CanvasSnapshot::new(ink, background.clone())
    }

    /// `bg_<stem>.png` or `bg_refined_<stem>.png`
    #[must_use]
    pub fn output_file_name(id: &ImageId, refined: bool) -> String {
        let prefix = if refined {
            REFINED_OUTPUT_PREFIX
        } else {
            OUTPUT_PREFIX
        };
        format!("{}{}.png", prefix, id.stem())
    }

    /// `surface_<stem>.png`
    #[must_use]
    pub fn surface_image_name(id: &ImageId) -> String {
        format!("{}{}.png", SURFACE_PREFIX, id.stem())
    }

    /// `surface_<stem>.json`
    #[must_use]
    pub fn surface_spec_name(id: &ImageId) -> String {
        format!("{}{}.json", SURFACE_PREFIX, id.stem())
    }

    /// Check if a file path has a supported image extension
    pub fn is_supported_format<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                matches!(
                    ext.to_lowercase().as_str(),
                    "jpg" | "jpeg" | "png" | "webp" | "tiff" | "tif"
                )
            })
    }
}

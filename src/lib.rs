#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # bg-refine
//!
//! Mask refinement and compositing for segmentation-based background
//! replacement.
//!
//! An external segmentation model produces a per-pixel foreground
//! confidence mask. This crate turns that mask into a final cut-out the user
//! can correct with two brushes: *keep* (pure green ink) forces pixels into
//! the foreground and *remove* (pure red ink) forces them out. Strokes are
//! drawn on a bounded-width interaction surface, accumulated per image, and
//! scaled back to the original resolution before compositing the foreground
//! over a solid background color.
//!
//! ## Features
//!
//! - **Resolution mapping**: nearest-neighbor for masks, Lanczos for images
//! - **Stroke classification**: background-diff (default) or absolute color
//! - **Monotonic accumulation**: OR-only keep/remove state per image
//! - **Precedence**: `final = (automatic OR keep) AND NOT remove`
//! - **Memoized segmentation**: content hash + model id, one call per image
//! - **Gateways**: external program (`rembg`-compatible) or a mock
//! - **CLI Integration**: batch front end (enable with `cli` feature)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bg_refine::{
//!     BackgroundColor, CanvasSnapshot, CommandGateway, ImageId, RefineConfig,
//!     RefinementSession,
//! };
//!
//! # async fn example(upload: Vec<u8>, ink: image::RgbaImage) -> anyhow::Result<()> {
//! let config = RefineConfig::builder()
//!     .background_color(BackgroundColor::new(0, 120, 255))
//!     .build()?;
//! let mut session = RefinementSession::new(config, CommandGateway::rembg("u2net"))?;
//!
//! let source = session.load_image(ImageId::new("portrait.jpg"), upload)?;
//! let alpha = session.automatic_mask(&source).await?;
//! let first_pass = session.render(&source, &alpha)?;
//!
//! // `ink` was drawn over `surface_background` at `surface_size`
//! let snapshot = CanvasSnapshot::new(ink, session.surface_background(&source))?;
//! session.apply_snapshot(source.id(), &snapshot)?;
//! let refined = session.render_refined(&source, &alpha)?;
//! # let _ = (first_pass, refined);
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `cli` (default): command-line interface, progress bar and subscriber setup
//! - `webp-support` (default): WebP decoding
//! - `tracing-json`: JSON log output for the CLI
//!
//! ### Library-Only Usage
//!
//! ```toml
//! [dependencies]
//! bg-refine = { version = "0.1", default-features = false }
//! ```

pub mod accumulator;
pub mod backends;
pub mod cache;
pub mod classifier;
#[cfg(feature = "cli")]
pub mod cli;
pub mod compositor;
pub mod config;
pub mod error;
pub mod gateway;
pub mod resolution;
pub mod services;
pub mod session;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;

pub use accumulator::{SnapshotFingerprint, StrokeAccumulator, StrokeState};
pub use backends::{CommandGateway, MockGateway, MockMask};
pub use cache::{calculate_content_hash, CacheKey, SegmentationCache, SegmentationCacheStats};
pub use classifier::{ClassificationStrategy, StrokeClassifier};
pub use compositor::{ImageCompositor, MaskCompositor};
pub use config::{BrushConfig, BrushMode, RefineConfig, RefineConfigBuilder, SurfaceSpec};
pub use error::{RefineError, Result};
pub use gateway::SegmentationGateway;
pub use resolution::{MaskResampling, ResolutionMapper, DEFAULT_SURFACE_MAX_WIDTH};
pub use services::ImageIOService;
pub use session::{ProcessedImage, RefinementSession, SourceImage};
pub use types::{
    AlphaMask, BackgroundColor, BinaryMask, CanvasSnapshot, ImageId, StrokeDelta,
    FOREGROUND_THRESHOLD,
};

#[cfg(feature = "cli")]
pub use tracing_config::{init_cli_tracing, TracingConfig, TracingFormat};

/// Replace the background of an encoded image in one call
///
/// Segments `image_bytes` with `gateway` and composites the automatic
/// foreground over `config.background_color`, without any stroke
/// corrections. Use a [`RefinementSession`] when the same image will be
/// rendered more than once.
///
/// # Returns
///
/// PNG-encoded RGB bytes
///
/// # Examples
///
/// ```rust,no_run
/// use bg_refine::{replace_background_from_bytes, CommandGateway, RefineConfig};
///
/// # async fn example(upload: Vec<u8>) -> anyhow::Result<()> {
/// let config = RefineConfig::default();
/// let gateway = CommandGateway::rembg(config.model_id.clone());
/// let png = replace_background_from_bytes(&upload, &gateway, &config).await?;
/// std::fs::write("bg_upload.png", png)?;
/// # Ok(())
/// # }
/// ```
pub async fn replace_background_from_bytes<G>(
    image_bytes: &[u8],
    gateway: &G,
    config: &RefineConfig,
) -> Result<Vec<u8>>
where
    G: SegmentationGateway + ?Sized,
{
    config.validate()?;

    let original = image::load_from_memory(image_bytes)
        .map_err(|e| RefineError::decode(format!("Failed to decode image from bytes: {}", e)))?
        .to_rgb8();
    let alpha = gateway.segment(image_bytes).await?;

    let (width, height) = original.dimensions();
    let empty = BinaryMask::new(width, height);
    let mask = MaskCompositor::new(config.stroke_resampling).composite(
        &alpha,
        &empty,
        &empty,
        (width, height),
    )?;
    ImageCompositor::compose(&original, &mask, config.background_color, config.max_output_width)
}

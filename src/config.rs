//! Configuration types for mask refinement and compositing

use crate::classifier::ClassificationStrategy;
use crate::error::{RefineError, Result};
use crate::resolution::{MaskResampling, DEFAULT_SURFACE_MAX_WIDTH};
use crate::types::BackgroundColor;
use image::Rgba;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Upper bound accepted for `max_output_width`
pub const MAX_OUTPUT_WIDTH_LIMIT: u32 = 8000;

/// Which correction a brush stroke records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrushMode {
    /// Force pixels into the foreground (drawn in pure green)
    #[default]
    Keep,
    /// Force pixels into the background (drawn in pure red)
    Remove,
}

impl BrushMode {
    /// Ink color the drawing surface should use for this mode
    #[must_use]
    pub fn stroke_color(self) -> Rgba<u8> {
        match self {
            Self::Keep => Rgba([0, 255, 0, 255]),
            Self::Remove => Rgba([255, 0, 0, 255]),
        }
    }

    /// Stroke color as `#RRGGBB`
    #[must_use]
    pub fn stroke_hex(self) -> String {
        let [r, g, b, _] = self.stroke_color().0;
        format!("#{:02X}{:02X}{:02X}", r, g, b)
    }
}

impl std::fmt::Display for BrushMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Keep => write!(f, "keep"),
            Self::Remove => write!(f, "remove"),
        }
    }
}

impl FromStr for BrushMode {
    type Err = RefineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keep" => Ok(Self::Keep),
            "remove" => Ok(Self::Remove),
            other => Err(RefineError::invalid_config(format!(
                "Unknown brush mode '{}'. Expected 'keep' or 'remove'",
                other
            ))),
        }
    }
}

/// Brush settings handed to the drawing surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrushConfig {
    pub mode: BrushMode,
    /// Stroke width in surface pixels
    pub width: u32,
}

impl BrushConfig {
    pub const MIN_WIDTH: u32 = 5;
    pub const MAX_WIDTH: u32 = 120;
    pub const DEFAULT_WIDTH: u32 = 30;
}

impl Default for BrushConfig {
    fn default() -> Self {
        Self {
            mode: BrushMode::default(),
            width: Self::DEFAULT_WIDTH,
        }
    }
}

/// Configuration for a refinement session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineConfig {
    /// Solid color placed behind the foreground
    pub background_color: BackgroundColor,

    /// Output width bound (0 = keep original size)
    pub max_output_width: u32,

    /// Width bound of the interaction surface strokes are drawn on
    pub surface_max_width: u32,

    pub brush: BrushConfig,

    /// How ink on a snapshot is turned into keep/remove pixels
    pub classification: ClassificationStrategy,

    /// How stroke masks are brought up to original resolution
    pub stroke_resampling: MaskResampling,

    /// Segmentation model identifier, part of the memoization key
    pub model_id: String,

    /// Upper bound for a single segmentation call
    pub segmentation_timeout_secs: u64,
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            background_color: BackgroundColor::WHITE,
            max_output_width: 0,
            surface_max_width: DEFAULT_SURFACE_MAX_WIDTH,
            brush: BrushConfig::default(),
            classification: ClassificationStrategy::default(),
            stroke_resampling: MaskResampling::default(),
            model_id: "u2net".to_string(),
            segmentation_timeout_secs: 300,
        }
    }
}

impl RefineConfig {
    /// Create a new configuration builder
    ///
    /// # Examples
    /// ```rust
    /// use bg_refine::{BackgroundColor, BrushMode, RefineConfig};
    ///
    /// let config = RefineConfig::builder()
    ///     .background_color(BackgroundColor::new(0, 128, 255))
    ///     .max_output_width(1920)
    ///     .brush_mode(BrushMode::Remove)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.brush.mode, BrushMode::Remove);
    /// ```
    #[must_use]
    pub fn builder() -> RefineConfigBuilder {
        RefineConfigBuilder::default()
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - `max_output_width` above 8000
    /// - `surface_max_width` of 0
    /// - brush width outside 5-120
    /// - empty `model_id`
    /// - `segmentation_timeout_secs` of 0
    pub fn validate(&self) -> Result<()> {
        if self.max_output_width > MAX_OUTPUT_WIDTH_LIMIT {
            return Err(RefineError::config_value_error(
                "max output width",
                self.max_output_width,
                "0-8000",
                Some(0),
            ));
        }

        if self.surface_max_width == 0 {
            return Err(RefineError::config_value_error(
                "surface max width",
                self.surface_max_width,
                "1 or more",
                Some(DEFAULT_SURFACE_MAX_WIDTH),
            ));
        }

        if !(BrushConfig::MIN_WIDTH..=BrushConfig::MAX_WIDTH).contains(&self.brush.width) {
            return Err(RefineError::config_value_error(
                "brush width",
                self.brush.width,
                "5-120",
                Some(BrushConfig::DEFAULT_WIDTH),
            ));
        }

        if self.model_id.trim().is_empty() {
            return Err(RefineError::invalid_config("Model id must not be empty"));
        }

        if self.segmentation_timeout_secs == 0 {
            return Err(RefineError::config_value_error(
                "segmentation timeout",
                self.segmentation_timeout_secs,
                "1 or more seconds",
                Some(300),
            ));
        }

        Ok(())
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.segmentation_timeout_secs)
    }

    /// Parse and validate a JSON configuration; missing fields take defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| RefineError::invalid_config(format!("Invalid configuration JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| RefineError::file_io_error("read configuration file", path, &e))?;
        Self::from_json_str(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| RefineError::internal(format!("Failed to serialize configuration: {}", e)))
    }
}

/// Builder for `RefineConfig`
#[derive(Debug, Default)]
pub struct RefineConfigBuilder {
    config: RefineConfig,
}

impl RefineConfigBuilder {
    #[must_use]
    pub fn background_color(mut self, color: BackgroundColor) -> Self {
        self.config.background_color = color;
        self
    }

    #[must_use]
    pub fn max_output_width(mut self, width: u32) -> Self {
        self.config.max_output_width = width;
        self
    }

    #[must_use]
    pub fn surface_max_width(mut self, width: u32) -> Self {
        self.config.surface_max_width = width;
        self
    }

    #[must_use]
    pub fn brush_mode(mut self, mode: BrushMode) -> Self {
        self.config.brush.mode = mode;
        self
    }

    /// Set brush width; out-of-range values are clamped into 5-120
    #[must_use]
    pub fn brush_width(mut self, width: u32) -> Self {
        self.config.brush.width = width.clamp(BrushConfig::MIN_WIDTH, BrushConfig::MAX_WIDTH);
        self
    }

    #[must_use]
    pub fn classification(mut self, strategy: ClassificationStrategy) -> Self {
        self.config.classification = strategy;
        self
    }

    #[must_use]
    pub fn stroke_resampling(mut self, resampling: MaskResampling) -> Self {
        self.config.stroke_resampling = resampling;
        self
    }

    #[must_use]
    pub fn model_id<S: Into<String>>(mut self, model_id: S) -> Self {
        self.config.model_id = model_id.into();
        self
    }

    #[must_use]
    pub fn segmentation_timeout_secs(mut self, secs: u64) -> Self {
        self.config.segmentation_timeout_secs = secs;
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// - Any rule checked by [`RefineConfig::validate`]
    pub fn build(self) -> Result<RefineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Everything a drawing surface needs to collect strokes for one image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceSpec {
    pub width: u32,
    pub height: u32,
    /// `#RRGGBB`
    pub stroke_color: String,
    pub stroke_width: u32,
    pub mode: BrushMode,
}

impl SurfaceSpec {
    #[must_use]
    pub fn new(surface: (u32, u32), brush: BrushConfig) -> Self {
        Self {
            width: surface.0,
            height: surface.1,
            stroke_color: brush.mode.stroke_hex(),
            stroke_width: brush.width,
            mode: brush.mode,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| RefineError::internal(format!("Failed to serialize surface spec: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RefineConfig::default();
        assert_eq!(config.background_color, BackgroundColor::WHITE);
        assert_eq!(config.max_output_width, 0);
        assert_eq!(config.surface_max_width, 1024);
        assert_eq!(config.brush.width, 30);
        assert_eq!(config.brush.mode, BrushMode::Keep);
        assert_eq!(config.classification, ClassificationStrategy::BackgroundDiff);
        assert_eq!(config.stroke_resampling, MaskResampling::Nearest);
        assert_eq!(config.model_id, "u2net");
        assert_eq!(config.timeout(), Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = RefineConfig::default();
        config.max_output_width = 8001;
        assert!(matches!(config.validate(), Err(RefineError::InvalidConfig(_))));

        let mut config = RefineConfig::default();
        config.surface_max_width = 0;
        assert!(config.validate().is_err());

        let mut config = RefineConfig::default();
        config.brush.width = 4;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("brush width"));

        let mut config = RefineConfig::default();
        config.model_id = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = RefineConfig::default();
        config.segmentation_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder_clamps_brush_width() {
        let config = RefineConfig::builder().brush_width(500).build().unwrap();
        assert_eq!(config.brush.width, BrushConfig::MAX_WIDTH);
        let config = RefineConfig::builder().brush_width(1).build().unwrap();
        assert_eq!(config.brush.width, BrushConfig::MIN_WIDTH);
    }

    #[test]
    fn test_builder_validation_error() {
        let result = RefineConfig::builder().max_output_width(9000).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_brush_mode() {
        assert_eq!(BrushMode::Keep.stroke_hex(), "#00FF00");
        assert_eq!(BrushMode::Remove.stroke_hex(), "#FF0000");
        assert_eq!("Remove".parse::<BrushMode>().unwrap(), BrushMode::Remove);
        assert!("erase".parse::<BrushMode>().is_err());
        assert_eq!(BrushMode::Keep.to_string(), "keep");
    }

    #[test]
    fn test_json_partial_config_uses_defaults() {
        let config = RefineConfig::from_json_str(
            r##"{"background_color": "#102030", "brush": {"mode": "remove"}}"##,
        )
        .unwrap();
        assert_eq!(config.background_color, BackgroundColor::new(0x10, 0x20, 0x30));
        assert_eq!(config.brush.mode, BrushMode::Remove);
        assert_eq!(config.brush.width, BrushConfig::DEFAULT_WIDTH);
        assert_eq!(config.surface_max_width, 1024);
    }

    #[test]
    fn test_json_rejects_invalid_values() {
        assert!(RefineConfig::from_json_str(r#"{"max_output_width": 10000}"#).is_err());
        assert!(RefineConfig::from_json_str(r#"{"background_color": "purple"}"#).is_err());
        assert!(RefineConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let config = RefineConfig::builder()
            .classification(ClassificationStrategy::AbsoluteColor)
            .stroke_resampling(MaskResampling::Smoothed)
            .build()
            .unwrap();
        let parsed = RefineConfig::from_json_str(&config.to_json().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("refine.json");
        std::fs::write(&path, r#"{"max_output_width": 640}"#).unwrap();
        assert_eq!(RefineConfig::from_json_file(&path).unwrap().max_output_width, 640);

        let err = RefineConfig::from_json_file(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, RefineError::Io(_)));
    }

    #[test]
    fn test_surface_spec() {
        let brush = BrushConfig {
            mode: BrushMode::Remove,
            width: 12,
        };
        let spec = SurfaceSpec::new((1024, 512), brush);
        assert_eq!(spec.stroke_color, "#FF0000");
        let json = spec.to_json().unwrap();
        assert!(json.contains("\"mode\": \"remove\""));
        let parsed: SurfaceSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, spec);
    }
}

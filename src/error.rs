//! Error types for mask refinement and compositing operations

use thiserror::Error;

/// Result type alias for refinement operations
pub type Result<T> = std::result::Result<T, RefineError>;

/// Error kinds surfaced by the refinement engine
#[derive(Error, Debug)]
pub enum RefineError {
    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Input bytes are not a valid raster image
    #[error("Decode error: {0}")]
    Decode(String),

    /// The segmentation gateway failed or returned malformed data
    #[error("Segmentation error: {0}")]
    Segmentation(String),

    /// Output could not be serialized
    #[error("Encode error: {0}")]
    Encode(String),

    /// A mask and the grid it is combined with disagree on size
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Strokes submitted for an image that was never loaded
    #[error("Unknown image: {0}")]
    UnknownImage(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RefineError {
    /// Create a new decode error
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a new segmentation error
    pub fn segmentation<S: Into<String>>(msg: S) -> Self {
        Self::Segmentation(msg.into())
    }

    /// Create a new encode error
    pub fn encode<S: Into<String>>(msg: S) -> Self {
        Self::Encode(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    pub fn unknown_image<S: Into<String>>(image: S) -> Self {
        Self::UnknownImage(image.into())
    }

    /// Create a dimension mismatch error naming both sizes
    pub fn dimension_mismatch(context: &str, expected: (u32, u32), actual: (u32, u32)) -> Self {
        Self::DimensionMismatch(format!(
            "{}: expected {}x{}, got {}x{}",
            context, expected.0, expected.1, actual.0, actual.1
        ))
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {} '{}': {}", operation, path_display, error),
        ))
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
        recommended: Option<T>,
    ) -> Self {
        let recommendation = match recommended {
            Some(rec) => format!(" Recommended: {}", rec),
            None => String::new(),
        };

        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {}).{}",
            parameter, value, valid_range, recommendation
        ))
    }

    /// Attach the identity of the failing input to a per-image error
    #[must_use]
    pub fn for_image(self, image: &str) -> Self {
        match self {
            Self::Decode(msg) => Self::Decode(format!("{}: {}", image, msg)),
            Self::Segmentation(msg) => Self::Segmentation(format!("{}: {}", image, msg)),
            Self::Encode(msg) => Self::Encode(format!("{}: {}", image, msg)),
            Self::DimensionMismatch(msg) => {
                Self::DimensionMismatch(format!("{}: {}", image, msg))
            },
            other => other,
        }
    }

    /// Whether this error only affects the image it was raised for
    ///
    /// Every variant except configuration errors leaves the rest of a batch
    /// unaffected.
    #[must_use]
    pub fn is_per_image(&self) -> bool {
        !matches!(self, Self::InvalidConfig(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_error_creation() {
        let err = RefineError::decode("not an image");
        assert!(matches!(err, RefineError::Decode(_)));

        let err = RefineError::segmentation("gateway exited with status 1");
        assert!(matches!(err, RefineError::Segmentation(_)));

        let err = RefineError::encode("zero width");
        assert!(matches!(err, RefineError::Encode(_)));

        let err = RefineError::unknown_image("cat.png");
        assert_eq!(err.to_string(), "Unknown image: cat.png");
        assert!(err.is_per_image());
    }

    #[test]
    fn test_error_display() {
        let err = RefineError::invalid_config("surface width must be positive");
        assert_eq!(
            err.to_string(),
            "Invalid configuration: surface width must be positive"
        );

        let err = RefineError::dimension_mismatch("keep/remove", (10, 20), (5, 10));
        assert_eq!(
            err.to_string(),
            "Dimension mismatch: keep/remove: expected 10x20, got 5x10"
        );
    }

    #[test]
    fn test_enhanced_error_context() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = RefineError::file_io_error("read input", Path::new("/tmp/photo.jpg"), &io_error);
        let error_string = err.to_string();
        assert!(error_string.contains("read input"));
        assert!(error_string.contains("/tmp/photo.jpg"));

        let err = RefineError::config_value_error("brush width", 200, "5-120", Some(30));
        let error_string = err.to_string();
        assert!(error_string.contains("brush width"));
        assert!(error_string.contains("200"));
        assert!(error_string.contains("5-120"));
        assert!(error_string.contains("Recommended: 30"));
    }

    #[test]
    fn test_for_image_prefixes_per_image_errors() {
        let err = RefineError::decode("invalid PNG signature").for_image("cat.png");
        assert_eq!(err.to_string(), "Decode error: cat.png: invalid PNG signature");

        let err = RefineError::invalid_config("bad").for_image("cat.png");
        assert_eq!(err.to_string(), "Invalid configuration: bad");
        assert!(!err.is_per_image());
    }
}

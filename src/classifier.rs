//! Classification of painted pixels into keep/remove intent
//!
//! Two interchangeable strategies are provided. `AbsoluteColor` looks for
//! near-pure green or red ink and ignores the background. `BackgroundDiff`
//! asks which channel dominates each stroke pixel, where a stroke pixel is
//! found in one of two ways:
//!
//! - an ink layer (any pixel not fully opaque): every pixel with alpha
//! - a flattened render (every pixel opaque): pixels that moved away from
//!   the surface background

use crate::types::{CanvasSnapshot, StrokeDelta};
use image::{Rgb, Rgba};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Largest per-channel change from the background still treated as untouched
pub const STROKE_DIFF_THRESHOLD: u8 = 24;
/// How far the dominant channel must exceed each of the other two
pub const CHANNEL_MARGIN: u8 = 60;
/// Minimum green value for a keep stroke
pub const MIN_KEEP_BRIGHTNESS: u8 = 120;

/// Thresholds for `AbsoluteColor`
const ABSOLUTE_INK_MIN: u8 = 200;
const ABSOLUTE_OTHER_MAX: u8 = 50;

/// Which test decides that a pixel carries keep or remove ink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClassificationStrategy {
    /// Difference from the background plus a relative channel margin
    #[default]
    BackgroundDiff,
    /// Near-pure green / red ink on any non-transparent pixel
    AbsoluteColor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intent {
    Keep,
    Remove,
}

/// Turns drawing-surface snapshots into keep/remove deltas
#[derive(Debug, Clone, Copy, Default)]
pub struct StrokeClassifier {
    strategy: ClassificationStrategy,
}

impl StrokeClassifier {
    #[must_use]
    pub fn new(strategy: ClassificationStrategy) -> Self {
        Self { strategy }
    }

    #[must_use]
    pub fn strategy(&self) -> ClassificationStrategy {
        self.strategy
    }

    /// Classify every pixel of `snapshot`
    #[instrument(skip_all, fields(strategy = ?self.strategy, width = snapshot.dimensions().0, height = snapshot.dimensions().1))]
    pub fn classify(&self, snapshot: &CanvasSnapshot) -> StrokeDelta {
        let (width, height) = snapshot.dimensions();
        let mut delta = StrokeDelta::empty(width, height);
        let layered = is_ink_layer(snapshot);

        for (x, y, ink) in snapshot.ink().enumerate_pixels() {
            let intent = match self.strategy {
                ClassificationStrategy::BackgroundDiff if layered => classify_ink(*ink),
                ClassificationStrategy::BackgroundDiff => {
                    classify_against_background(*ink, *snapshot.background().get_pixel(x, y))
                },
                ClassificationStrategy::AbsoluteColor => classify_absolute(*ink),
            };
            match intent {
                Some(Intent::Keep) => delta.keep.set(x, y, true),
                Some(Intent::Remove) => delta.remove.set(x, y, true),
                None => {},
            }
        }

        debug!(
            layered,
            keep_pixels = delta.keep.count(),
            remove_pixels = delta.remove.count(),
            "Classified canvas snapshot"
        );
        delta
    }
}

/// A drawing surface either reports its ink alone or the ink already
/// rendered over the background; only the latter is opaque everywhere.
fn is_ink_layer(snapshot: &CanvasSnapshot) -> bool {
    snapshot.ink().pixels().any(|p| p[3] < u8::MAX)
}

/// Ink-layer pixel: alpha marks the stroke, its own color gives the intent
fn classify_ink(ink: Rgba<u8>) -> Option<Intent> {
    if ink[3] == 0 {
        return None;
    }
    let [r, g, b, _] = ink.0;
    dominant_intent([r, g, b])
}

/// Flattened pixel: only a visible change from the background is a stroke
fn classify_against_background(seen: Rgba<u8>, background: Rgb<u8>) -> Option<Intent> {
    let [r, g, b, _] = seen.0;
    let changed = [r, g, b]
        .iter()
        .zip(background.0.iter())
        .any(|(&s, &bg)| s.abs_diff(bg) > STROKE_DIFF_THRESHOLD);
    if !changed {
        return None;
    }
    dominant_intent([r, g, b])
}

fn dominant_intent([r, g, b]: [u8; 3]) -> Option<Intent> {
    let dominates = |c: u8, other: u8| u16::from(c) >= u16::from(other) + u16::from(CHANNEL_MARGIN);

    if g >= MIN_KEEP_BRIGHTNESS && dominates(g, r) && dominates(g, b) {
        Some(Intent::Keep)
    } else if dominates(r, g) && dominates(r, b) {
        Some(Intent::Remove)
    } else {
        None
    }
}

fn classify_absolute(ink: Rgba<u8>) -> Option<Intent> {
    let [r, g, b, a] = ink.0;
    if a == 0 {
        None
    } else if g > ABSOLUTE_INK_MIN && r < ABSOLUTE_OTHER_MAX && b < ABSOLUTE_OTHER_MAX {
        Some(Intent::Keep)
    } else if r > ABSOLUTE_INK_MIN && g < ABSOLUTE_OTHER_MAX && b < ABSOLUTE_OTHER_MAX {
        Some(Intent::Remove)
    } else {
        None
    }
}

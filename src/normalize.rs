// Normalized tracker records to screen pixels.
// See DESIGN.md: GazeSample Normalizer

use crate::types::*;

/// Scales normalized gaze into pixel space for a fixed screen resolution.
#[derive(Debug, Clone, Copy)]
pub struct GazeNormalizer {
    width: f64,
    height: f64,
}

impl GazeNormalizer {
    pub fn new(screen_resolution: [u32; 2]) -> Self {
        GazeNormalizer {
            width: screen_resolution[0] as f64,
            height: screen_resolution[1] as f64,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.screen_resolution)
    }

    /// Convert one raw record. Pure; the timestamp is carried through unchanged.
    pub fn normalize(&self, sample: &GazeSample) -> GazePoint {
        GazePoint {
            left: self.scale_eye(&sample.left),
            right: self.scale_eye(&sample.right),
            timestamp: sample.timestamp,
        }
    }

    pub fn normalize_all(&self, samples: &[GazeSample]) -> Vec<GazePoint> {
        samples.iter().map(|s| self.normalize(s)).collect()
    }

    fn scale_eye(&self, eye: &NormalizedCoord) -> PixelCoord {
        let x = eye.x * self.width;
        let y = eye.y * self.height;

        // Only X decides whether an eye is rounded; a NaN X leaves both components as scaled.
        // Ties round to even to match historical session data.
        if x.is_nan() {
            PixelCoord::new(x, y)
        } else {
            PixelCoord::new(x.round_ties_even(), y.round_ties_even())
        }
    }
}

impl Default for GazeNormalizer {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

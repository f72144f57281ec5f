// Raw trial records to processed, monocular trials.
// See DESIGN.md: Trial Stream Processor

use serde::{Deserialize, Serialize};

use crate::normalize::GazeNormalizer;
use crate::record::{Trial, TrialRecord};
use crate::reduce::LossReport;
use crate::types::*;

/// A trial normalized to one shape regardless of the collector version that wrote it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedTrial {
    pub stimulus: String,
    pub true_label: Label,
    pub prediction: Label,
    /// Milliseconds, rounded to 3 decimals.
    pub duration_ms: f64,
    pub gaze_points: Vec<ReducedPoint>,
    /// Present only for calibration-bearing records.
    pub calibration_points: Option<Vec<ReducedPoint>>,
}

impl ProcessedTrial {
    pub fn loss(&self) -> LossReport {
        LossReport::from_points(&self.gaze_points)
    }

    pub fn has_gaze(&self) -> bool {
        !self.gaze_points.is_empty()
    }

    /// File stem of the stimulus path, used to name per-image outputs.
    pub fn image_name(&self) -> String {
        std::path::Path::new(&self.stimulus)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.stimulus.clone())
    }
}

/// Normalizes raw trial records into `ProcessedTrial`s.
#[derive(Debug, Clone, Copy)]
pub struct TrialProcessor {
    normalizer: GazeNormalizer,
}

impl TrialProcessor {
    pub fn new(normalizer: GazeNormalizer) -> Self {
        TrialProcessor { normalizer }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(GazeNormalizer::from_config(config))
    }

    pub fn process(&self, record: &TrialRecord) -> ProcessedTrial {
        let trial = record.trial();
        ProcessedTrial {
            stimulus: trial.stimulus.clone(),
            true_label: trial.true_label,
            prediction: trial.prediction,
            duration_ms: duration_ms(trial),
            gaze_points: self.process_samples(&trial.gaze_samples),
            calibration_points: record.calibration().map(|c| self.process_samples(c)),
        }
    }

    pub fn process_all(&self, records: &[TrialRecord]) -> Vec<ProcessedTrial> {
        records.iter().map(|r| self.process(r)).collect()
    }

    /// Normalize and reduce a sample list. Empty input gives an empty list, never an error.
    pub fn process_samples(&self, samples: &[GazeSample]) -> Vec<ReducedPoint> {
        let Some(first) = samples.first() else {
            return Vec::new();
        };
        let origin = round_to(first.timestamp.as_millis(), 1);

        samples
            .iter()
            .map(|sample| {
                let point = self.normalizer.normalize(sample);
                let millis = round_to(sample.timestamp.as_millis(), 1);
                ReducedPoint {
                    position: point.reduce(),
                    relative_ms: round_to(millis - origin, 1),
                }
            })
            .collect()
    }
}

impl Default for TrialProcessor {
    fn default() -> Self {
        Self::new(GazeNormalizer::default())
    }
}

fn duration_ms(trial: &Trial) -> f64 {
    round_to(trial.duration_us as f64 / 1000.0, 3)
}

// Signal-detection and timing statistics over a window of trials.
// Trials are consumed strictly in recorded order; pause estimation depends on it.
// See DESIGN.md: Scoring Engine

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::record::Trial;
use crate::types::*;

/// Confusion-matrix counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfusionCounts {
    pub tp: usize,
    #[serde(rename = "fn")]
    pub fn_: usize,
    pub fp: usize,
    pub tn: usize,
}

impl ConfusionCounts {
    pub fn record(&mut self, truth: Label, prediction: Label) {
        match (truth.is_positive(), prediction.is_positive()) {
            (true, true) => self.tp += 1,
            (true, false) => self.fn_ += 1,
            (false, true) => self.fp += 1,
            (false, false) => self.tn += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.tp + self.fn_ + self.fp + self.tn
    }
}

/// Derived rates. Every rate is 0 when its denominator is 0.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rates {
    pub precision: f64,
    pub recall: f64,
    /// Specificity.
    pub tnr: f64,
    pub fnr: f64,
    pub accuracy: f64,
    pub f1: f64,
}

impl Rates {
    pub fn from_counts(c: &ConfusionCounts) -> Self {
        let (tp, fn_, fp, tn) = (c.tp as f64, c.fn_ as f64, c.fp as f64, c.tn as f64);
        Rates {
            precision: guarded_div(tp, tp + fp),
            recall: guarded_div(tp, tp + fn_),
            tnr: guarded_div(tn, tn + fp),
            fnr: guarded_div(fn_, fn_ + tp),
            accuracy: guarded_div(tp + tn, tp + tn + fp + fn_),
            f1: guarded_div(2.0 * tp, 2.0 * tp + fp + fn_),
        }
    }
}

fn guarded_div(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// Mean, population variance, sum, min and max of a list of seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DurationStats {
    pub mean: f64,
    pub variance: f64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
}

impl DurationStats {
    /// `None` for an empty list. Mean, variance and sum are rounded to 3 decimals.
    pub fn describe(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let count = values.len() as f64;
        let sum: f64 = values.iter().sum();
        let mean = sum / count;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count;
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        Some(DurationStats {
            mean: round_to(mean, 3),
            variance: round_to(variance, 3),
            sum: round_to(sum, 3),
            min,
            max,
        })
    }
}

/// Aggregate score over one window of trials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    /// Window actually used: clamped to the trial count when larger, negative for a suffix.
    pub number: i64,
    /// Trials whose true label is positive / negative.
    pub p: usize,
    pub n: usize,
    pub confusion: ConfusionCounts,
    pub rates: Rates,
    /// Per-image presentation durations in seconds.
    pub images: DurationStats,
    /// Inferred breaks between trials in seconds; `None` if no break could be estimated.
    pub pause: Option<DurationStats>,
    /// Image duration sum plus pause sum (seconds).
    pub total_duration: f64,
}

/// Pick the scoring window: first `number` trials, last `|number|` when negative,
/// or all of them when `number` reaches past the end.
pub fn select_window<T>(items: &[T], number: i64) -> Result<(&[T], i64), PipelineError> {
    let len = items.len();
    if number == 0 {
        return Err(PipelineError::InvalidWindow(
            "window length must not be 0".to_string(),
        ));
    }

    let (window, reported) = if number > 0 && number as u64 >= len as u64 {
        (items, len as i64)
    } else if number > 0 {
        (&items[..number as usize], number)
    } else {
        let take = number.unsigned_abs().min(len as u64) as usize;
        (&items[len - take..], -(take as i64))
    };

    if window.is_empty() {
        return Err(PipelineError::InvalidWindow(format!(
            "window {} selects no trials",
            number
        )));
    }
    Ok((window, reported))
}

/// Single-pass scorer over raw trials.
#[derive(Debug, Clone, Copy)]
pub struct ScoringEngine {
    missing_gaze_gap_us: f64,
}

impl ScoringEngine {
    pub fn new(missing_gaze_gap_secs: f64) -> Self {
        ScoringEngine {
            missing_gaze_gap_us: missing_gaze_gap_secs * 1_000_000.0,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.missing_gaze_gap_secs)
    }

    pub fn score(&self, trials: &[Trial], number: i64) -> Result<ScoreSummary, PipelineError> {
        let (window, number) = select_window(trials, number)?;

        let mut confusion = ConfusionCounts::default();
        let mut p = 0;
        for trial in window {
            confusion.record(trial.true_label, trial.prediction);
            if trial.true_label.is_positive() {
                p += 1;
            }
        }

        let durations: Vec<f64> = window
            .iter()
            .map(|t| round_to(t.duration_us as f64 / 1_000_000.0, 3))
            .collect();
        let images = DurationStats::describe(&durations).ok_or_else(|| {
            PipelineError::InvalidWindow("no durations in window".to_string())
        })?;

        let breaks = self.breaks(window, &durations);
        let pause = DurationStats::describe(&breaks);
        if pause.is_none() {
            log::debug!("no inter-trial break could be estimated for {} trials", window.len());
        }

        let total_duration = round_to(images.sum + pause.map_or(0.0, |s| s.sum), 3);

        Ok(ScoreSummary {
            number,
            p,
            n: window.len() - p,
            rates: Rates::from_counts(&confusion),
            confusion,
            images,
            pause,
            total_duration,
        })
    }

    /// Gap in seconds between the end of one trial and the start of the next.
    /// A trial's span is its timing window when recorded, otherwise its first and last
    /// gaze sample. A trial with neither pushes the previous end forward by its own
    /// duration plus the configured gap.
    pub fn breaks(&self, window: &[Trial], durations_secs: &[f64]) -> Vec<f64> {
        let mut breaks = Vec::new();
        let mut previous_end: Option<f64> = None;

        for (trial, duration) in window.iter().zip(durations_secs) {
            let span = trial
                .window
                .map(|w| (w.start, w.end))
                .or_else(|| trial.first_sample().zip(trial.last_sample()));

            match span {
                Some((start, end)) => {
                    if let Some(prev) = previous_end {
                        let gap = (start.as_micros() as f64 - prev) / 1_000_000.0;
                        breaks.push(round_to(gap, 3));
                    }
                    previous_end = Some(end.as_micros() as f64);
                }
                None => {
                    if let Some(prev) = previous_end.as_mut() {
                        *prev += duration * 1_000_000.0 + self.missing_gaze_gap_us;
                    }
                }
            }
        }

        breaks
    }
}

impl Default for ScoringEngine {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

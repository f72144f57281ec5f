// Strong typing over raw tuples. Newtypes for timestamps, labels and pixel units.
// See DESIGN.md: Data model

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Device timestamp in microseconds. Newtype for type safety.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    pub fn from_micros(us: u64) -> Self {
        Timestamp(us)
    }

    pub fn as_micros(&self) -> u64 {
        self.0
    }

    pub fn as_millis(&self) -> f64 {
        self.0 as f64 / 1000.0
    }

    pub fn as_secs(&self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }
}

/// Normalized display coordinate (0.0 to 1.0) as reported by the tracker.
/// NaN marks a lost eye. Persisted as `[x, y]` with `null` for NaN.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[Option<f64>; 2]", into = "[Option<f64>; 2]")]
pub struct NormalizedCoord {
    pub x: f64,
    pub y: f64,
}

impl NormalizedCoord {
    pub fn new(x: f64, y: f64) -> Self {
        NormalizedCoord { x, y }
    }

    /// An eye the tracker could not see.
    pub fn lost() -> Self {
        NormalizedCoord {
            x: f64::NAN,
            y: f64::NAN,
        }
    }
}

impl From<[Option<f64>; 2]> for NormalizedCoord {
    fn from(pair: [Option<f64>; 2]) -> Self {
        NormalizedCoord {
            x: pair[0].unwrap_or(f64::NAN),
            y: pair[1].unwrap_or(f64::NAN),
        }
    }
}

impl From<NormalizedCoord> for [Option<f64>; 2] {
    fn from(coord: NormalizedCoord) -> Self {
        [finite_or_none(coord.x), finite_or_none(coord.y)]
    }
}

fn finite_or_none(value: f64) -> Option<f64> {
    if value.is_nan() {
        None
    } else {
        Some(value)
    }
}

/// Pixel coordinate in global screen space (or image-local space after trimming).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelCoord {
    pub x: f64,
    pub y: f64,
}

impl PixelCoord {
    pub fn new(x: f64, y: f64) -> Self {
        PixelCoord { x, y }
    }

    pub fn lost() -> Self {
        PixelCoord {
            x: f64::NAN,
            y: f64::NAN,
        }
    }

    /// An eye counts as lost if and only if its X component is NaN. Y is never checked.
    pub fn is_lost(&self) -> bool {
        self.x.is_nan()
    }
}

/// One raw tracker record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GazeSample {
    #[serde(rename = "left_gaze_point_on_display_area", alias = "left")]
    pub left: NormalizedCoord,
    #[serde(rename = "right_gaze_point_on_display_area", alias = "right")]
    pub right: NormalizedCoord,
    #[serde(rename = "system_time_stamp", alias = "timestamp")]
    pub timestamp: Timestamp,
}

impl GazeSample {
    pub fn new(left: NormalizedCoord, right: NormalizedCoord, timestamp: Timestamp) -> Self {
        GazeSample {
            left,
            right,
            timestamp,
        }
    }
}

/// A gaze sample scaled to screen pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GazePoint {
    pub left: PixelCoord,
    pub right: PixelCoord,
    pub timestamp: Timestamp,
}

/// Monocular best estimate for one sample. `position` is `None` when both eyes were lost;
/// the point still counts toward loss-rate denominators.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReducedPoint {
    pub position: Option<PixelCoord>,
    /// Milliseconds since the first sample of the trial (0.1 ms resolution).
    pub relative_ms: f64,
}

impl ReducedPoint {
    pub fn is_nan(&self) -> bool {
        self.position.is_none()
    }
}

/// Binary category label (true class or participant prediction).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Label {
    Negative,
    Positive,
}

impl Label {
    pub fn is_positive(&self) -> bool {
        matches!(self, Label::Positive)
    }
}

impl TryFrom<u8> for Label {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Label::Negative),
            1 => Ok(Label::Positive),
            other => Err(format!("label must be 0 or 1, got {}", other)),
        }
    }
}

impl From<Label> for u8 {
    fn from(label: Label) -> Self {
        match label {
            Label::Negative => 0,
            Label::Positive => 1,
        }
    }
}

/// Stimulus rectangle in global screen pixels. Persisted as `[x, y, width, height]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct PictureGeometry {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl PictureGeometry {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        PictureGeometry {
            x,
            y,
            width,
            height,
        }
    }

    /// Rejects rectangles that cannot bound any gaze point.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let finite = [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite());
        if !finite || self.width <= 0.0 || self.height <= 0.0 {
            return Err(PipelineError::InvalidGeometry(format!(
                "[{}, {}, {}, {}]",
                self.x, self.y, self.width, self.height
            )));
        }
        Ok(())
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn center(&self) -> PixelCoord {
        PixelCoord::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Inclusive on all four edges.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.x <= x && x <= self.right() && self.y <= y && y <= self.bottom()
    }

    /// Same size, anchored at (0, 0). The frame trimmed coordinates live in.
    pub fn at_origin(&self) -> Self {
        PictureGeometry::new(0.0, 0.0, self.width, self.height)
    }
}

impl From<[f64; 4]> for PictureGeometry {
    fn from(v: [f64; 4]) -> Self {
        PictureGeometry::new(v[0], v[1], v[2], v[3])
    }
}

impl From<PictureGeometry> for [f64; 4] {
    fn from(g: PictureGeometry) -> Self {
        [g.x, g.y, g.width, g.height]
    }
}

/// Presentation window of a trial on the device clock. Persisted as `[start_us, end_us]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[u64; 2]", into = "[u64; 2]")]
pub struct TrialWindow {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl TrialWindow {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        TrialWindow { start, end }
    }
}

impl From<[u64; 2]> for TrialWindow {
    fn from(v: [u64; 2]) -> Self {
        TrialWindow::new(Timestamp::from_micros(v[0]), Timestamp::from_micros(v[1]))
    }
}

impl From<TrialWindow> for [u64; 2] {
    fn from(w: TrialWindow) -> Self {
        [w.start.as_micros(), w.end.as_micros()]
    }
}

/// What the offset corrector does for a trial without any calibration capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MissingCalibration {
    /// Leave the raw coordinates untouched.
    #[default]
    PassThrough,
    /// Subtract `PipelineConfig::default_offset`.
    DefaultOffset,
}

/// Upper bound on calibration histogram bins per axis.
pub const MAX_HISTOGRAM_BINS: usize = 1024;

/// Pipeline configuration. Every field has a default, so `{}` is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Screen resolution in pixels used to scale normalized gaze.
    #[serde(default = "default_screen_resolution")]
    pub screen_resolution: [u32; 2],
    /// Bins per axis of the calibration histogram.
    #[serde(default = "default_histogram_bins")]
    pub histogram_bins: usize,
    #[serde(default)]
    pub missing_calibration: MissingCalibration,
    /// Offset (dx, dy) in pixels applied under `MissingCalibration::DefaultOffset`.
    #[serde(default = "default_offset")]
    pub default_offset: [f64; 2],
    /// Gap assumed after a trial that recorded no gaze at all (seconds).
    #[serde(default = "default_missing_gaze_gap")]
    pub missing_gaze_gap_secs: f64,
    /// Default scoring window (first N trials, or last |N| when negative).
    #[serde(default = "default_score_window")]
    pub score_window: i64,
    /// Trials losing at least this share of samples are flagged.
    #[serde(default = "default_loss_warning")]
    pub loss_warning_percent: f64,
    /// Fixed inter-trial overhead added to the session time estimate (seconds).
    #[serde(default = "default_inter_trial_interval")]
    pub inter_trial_interval_secs: f64,
    /// Largest distance (pixels) a sample may stray from a fixation's first sample.
    #[serde(default = "default_fixation_max_distance")]
    pub fixation_max_distance_px: f64,
    /// Shortest run (ms) that still counts as a fixation.
    #[serde(default = "default_fixation_min_duration")]
    pub fixation_min_duration_ms: f64,
    /// Image-local line `[x0, y0, x1, y1]` for per-image switch counts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dividing_line: Option<[f64; 4]>,
}

fn default_screen_resolution() -> [u32; 2] {
    [1920, 1200]
}

fn default_histogram_bins() -> usize {
    40
}

fn default_offset() -> [f64; 2] {
    [6.4, 32.0]
}

fn default_missing_gaze_gap() -> f64 {
    0.5
}

fn default_score_window() -> i64 {
    35
}

fn default_loss_warning() -> f64 {
    75.0
}

fn default_inter_trial_interval() -> f64 {
    50.0
}

fn default_fixation_max_distance() -> f64 {
    42.0
}

fn default_fixation_min_duration() -> f64 {
    100.0
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            screen_resolution: default_screen_resolution(),
            histogram_bins: default_histogram_bins(),
            missing_calibration: MissingCalibration::default(),
            default_offset: default_offset(),
            missing_gaze_gap_secs: default_missing_gaze_gap(),
            score_window: default_score_window(),
            loss_warning_percent: default_loss_warning(),
            inter_trial_interval_secs: default_inter_trial_interval(),
            fixation_max_distance_px: default_fixation_max_distance(),
            fixation_min_duration_ms: default_fixation_min_duration(),
            dividing_line: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_json(json: &str) -> Result<Self, PipelineError> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.screen_resolution.iter().any(|&v| v == 0) {
            return Err(PipelineError::InvalidConfig(
                "screen_resolution must be non-zero".to_string(),
            ));
        }
        if self.histogram_bins == 0 || self.histogram_bins > MAX_HISTOGRAM_BINS {
            return Err(PipelineError::InvalidConfig(format!(
                "histogram_bins must be between 1 and {}",
                MAX_HISTOGRAM_BINS
            )));
        }
        if !self.default_offset.iter().all(|v| v.is_finite()) {
            return Err(PipelineError::InvalidConfig(
                "default_offset must be finite".to_string(),
            ));
        }
        if !(self.fixation_max_distance_px.is_finite() && self.fixation_max_distance_px >= 0.0)
            || !(self.fixation_min_duration_ms.is_finite() && self.fixation_min_duration_ms >= 0.0)
        {
            return Err(PipelineError::InvalidConfig(
                "fixation thresholds must be finite and non-negative".to_string(),
            ));
        }
        if let Some(line) = &self.dividing_line {
            if !line.iter().all(|v| v.is_finite()) {
                return Err(PipelineError::InvalidConfig(
                    "dividing_line must be finite".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Round half away from zero to `places` decimals.
pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_conversions() {
        let ts = Timestamp::from_micros(1_500_000);
        assert_eq!(ts.as_micros(), 1_500_000);
        assert!((ts.as_secs() - 1.5).abs() < 0.0001);
        assert!((ts.as_millis() - 1500.0).abs() < 0.0001);
    }

    #[test]
    fn normalized_coord_null_round_trips_as_nan() {
        let coord: NormalizedCoord = serde_json::from_str("[null, null]").unwrap();
        assert!(coord.x.is_nan() && coord.y.is_nan());
        assert_eq!(serde_json::to_string(&coord).unwrap(), "[null,null]");

        let coord: NormalizedCoord = serde_json::from_str("[0.25, 0.5]").unwrap();
        assert_eq!(coord, NormalizedCoord::new(0.25, 0.5));
    }

    #[test]
    fn gaze_sample_reads_tracker_keys_and_aliases() {
        let json = r#"{
            "left_gaze_point_on_display_area": [0.1, 0.2],
            "right_gaze_point_on_display_area": [null, null],
            "system_time_stamp": 1000,
            "left_pupil_diameter": 3.1
        }"#;
        let sample: GazeSample = serde_json::from_str(json).unwrap();
        assert_eq!(sample.timestamp.as_micros(), 1000);
        assert!(sample.right.x.is_nan());

        let short = r#"{"left": [0.1, 0.2], "right": [0.3, 0.4], "timestamp": 7}"#;
        let sample: GazeSample = serde_json::from_str(short).unwrap();
        assert_eq!(sample.right, NormalizedCoord::new(0.3, 0.4));
    }

    #[test]
    fn label_rejects_values_outside_binary() {
        assert_eq!(serde_json::from_str::<Label>("1").unwrap(), Label::Positive);
        assert_eq!(serde_json::from_str::<Label>("0").unwrap(), Label::Negative);
        assert!(serde_json::from_str::<Label>("2").is_err());
    }

    #[test]
    fn geometry_validation() {
        assert!(PictureGeometry::new(703.0, 54.0, 512.0, 512.0).validate().is_ok());
        assert!(PictureGeometry::new(0.0, 0.0, 0.0, 512.0).validate().is_err());
        assert!(PictureGeometry::new(0.0, 0.0, 512.0, -1.0).validate().is_err());
        assert!(PictureGeometry::new(f64::NAN, 0.0, 512.0, 512.0).validate().is_err());
    }

    #[test]
    fn geometry_contains_is_inclusive() {
        let g = PictureGeometry::new(10.0, 20.0, 100.0, 50.0);
        assert!(g.contains(10.0, 20.0));
        assert!(g.contains(110.0, 70.0));
        assert!(!g.contains(110.5, 70.0));
        assert!(!g.contains(9.9, 30.0));
        assert_eq!(g.center(), PixelCoord::new(60.0, 45.0));
    }

    #[test]
    fn config_defaults_fill_missing_fields() {
        let config = PipelineConfig::from_json(r#"{"histogram_bins": 20}"#).unwrap();
        assert_eq!(config.histogram_bins, 20);
        assert_eq!(config.screen_resolution, [1920, 1200]);
        assert_eq!(config.missing_calibration, MissingCalibration::PassThrough);
        assert_eq!(config.default_offset, [6.4, 32.0]);

        let config =
            PipelineConfig::from_json(r#"{"missing_calibration": "default_offset"}"#).unwrap();
        assert_eq!(config.missing_calibration, MissingCalibration::DefaultOffset);
    }

    #[test]
    fn config_rejects_zero_bins() {
        assert!(PipelineConfig::from_json(r#"{"histogram_bins": 0}"#).is_err());
    }

    #[test]
    fn config_caps_bins() {
        let err = PipelineConfig::from_json(r#"{"histogram_bins": 1000000}"#).unwrap_err();
        assert!(err.is_configuration());
        let max = format!(r#"{{"histogram_bins": {}}}"#, MAX_HISTOGRAM_BINS);
        assert!(PipelineConfig::from_json(&max).is_ok());
    }

    #[test]
    fn config_fixation_defaults_and_line() {
        let config = PipelineConfig::from_json("{}").unwrap();
        assert_eq!(config.fixation_max_distance_px, 42.0);
        assert_eq!(config.fixation_min_duration_ms, 100.0);
        assert_eq!(config.dividing_line, None);

        let config = PipelineConfig::from_json(r#"{"dividing_line": [256, 0, 256, 512]}"#).unwrap();
        assert_eq!(config.dividing_line, Some([256.0, 0.0, 256.0, 512.0]));
        let err = PipelineConfig::from_json(r#"{"fixation_min_duration_ms": -1}"#).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn rounding_helper() {
        assert_eq!(round_to(0.12345, 2), 0.12);
        assert_eq!(round_to(2.5, 0), 3.0);
        assert_eq!(round_to(1.04, 1), 1.0);
    }
}

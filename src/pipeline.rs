// Per-trial and per-session orchestration:
// record -> processed trial -> coords -> offset correction -> fixations -> trim.
// See DESIGN.md: Pipeline

use serde::{Deserialize, Serialize};

use crate::calibration::{OffsetCorrector, OffsetSource};
use crate::coords::Coords;
use crate::error::PipelineError;
use crate::fixation::{trim_fixations, Fixation, FixationDetector};
use crate::record::{Session, Trial, TrialRecord};
use crate::reduce::{LossReport, SessionLoss};
use crate::scanpath::{count_fixation_crossings, count_line_crossings, DividingLine};
use crate::scoring::{ScoreSummary, ScoringEngine};
use crate::trial::{ProcessedTrial, TrialProcessor};
use crate::trim::trim;
use crate::types::*;

/// Image-local coordinates for one image, or the explicit "no data" sentinel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "coords", rename_all = "snake_case")]
pub enum ImageOutcome {
    Data(Coords),
    NoData,
}

impl ImageOutcome {
    fn from_coords(coords: Coords) -> Self {
        if coords.is_empty() {
            ImageOutcome::NoData
        } else {
            ImageOutcome::Data(coords)
        }
    }

    pub fn coords(&self) -> Option<&Coords> {
        match self {
            ImageOutcome::Data(coords) => Some(coords),
            ImageOutcome::NoData => None,
        }
    }

    pub fn is_no_data(&self) -> bool {
        matches!(self, ImageOutcome::NoData)
    }
}

/// Everything derived for a single trial image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageReport {
    /// Position of the trial in the session.
    pub index: usize,
    pub stimulus: String,
    pub image: String,
    pub true_label: Label,
    pub prediction: Label,
    pub duration_ms: f64,
    pub loss: LossReport,
    pub offset: OffsetSource,
    pub gaze: ImageOutcome,
    /// The trial's own calibration capture, trimmed. `None` for records without one.
    pub calibration: Option<ImageOutcome>,
    /// Fixations detected on screen, then trimmed to the picture.
    pub fixations: Vec<Fixation>,
    /// Side changes of the gaze across the configured dividing line.
    pub switches: Option<usize>,
    /// Side changes of the fixation centers across the configured dividing line.
    pub fixation_switches: Option<usize>,
}

/// Result of processing a whole session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub geometry: PictureGeometry,
    pub images: Vec<ImageReport>,
    /// Test-wide calibration capture, trimmed.
    pub test_calibration: Option<ImageOutcome>,
    pub loss: Option<SessionLoss>,
    /// Fixed inter-trial overhead plus every presentation duration (seconds).
    pub session_secs: f64,
}

/// The full reduction pipeline with its configuration applied.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    processor: TrialProcessor,
    corrector: OffsetCorrector,
    detector: FixationDetector,
    dividing_line: Option<DividingLine>,
    scoring: ScoringEngine,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Pipeline {
            processor: TrialProcessor::from_config(&config),
            corrector: OffsetCorrector::from_config(&config),
            detector: FixationDetector::from_config(&config),
            dividing_line: config.dividing_line.map(DividingLine::from_array),
            scoring: ScoringEngine::from_config(&config),
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn processor(&self) -> &TrialProcessor {
        &self.processor
    }

    /// Process one trial. A trial's own calibration capture wins over the test-wide one.
    pub fn process_trial(
        &self,
        index: usize,
        record: &TrialRecord,
        geometry: &PictureGeometry,
        test_calibration: Option<&Coords>,
    ) -> Result<ImageReport, PipelineError> {
        let processed = self.processor.process(record);
        let gaze = Coords::from_points(&processed.gaze_points);
        let own_calibration = processed
            .calibration_points
            .as_deref()
            .map(Coords::from_points);

        let calibration = own_calibration
            .as_ref()
            .filter(|c| !c.is_empty())
            .or(test_calibration);
        let corrected = self.corrector.correct(&gaze, calibration, geometry)?;
        let trimmed = trim(&corrected.coords, geometry)?;
        let fixations = trim_fixations(&self.detector.detect(&corrected.coords), geometry)?;

        let loss = processed.loss();
        if loss.percent >= self.config.loss_warning_percent {
            log::warn!(
                "trial {} ({}): {}% of {} samples lost",
                index,
                processed.stimulus,
                loss.percent,
                loss.total
            );
        }
        if trimmed.is_empty() {
            log::warn!("no eyetracking data on picture for {}", processed.stimulus);
        }

        let calibration = match own_calibration {
            Some(coords) => Some(ImageOutcome::from_coords(trim(&coords, geometry)?)),
            None => None,
        };

        let mut image = report(index, processed, loss, corrected.source, trimmed, calibration);
        if let Some(line) = &self.dividing_line {
            let switches = image.gaze.coords().map_or(0, |c| count_line_crossings(c, line));
            image.switches = Some(switches);
            image.fixation_switches = Some(count_fixation_crossings(&fixations, line));
        }
        image.fixations = fixations;
        Ok(image)
    }

    /// Process every trial of a session in order.
    pub fn process_session(&self, session: &Session) -> Result<SessionReport, PipelineError> {
        let geometry = &session.geometry;
        geometry.validate()?;

        let test_calibration = session
            .calibration
            .as_deref()
            .map(|samples| Coords::from_points(&self.processor.process_samples(samples)));

        let images = session
            .eyetracking
            .iter()
            .enumerate()
            .map(|(index, record)| {
                self.process_trial(index, record, geometry, test_calibration.as_ref())
            })
            .collect::<Result<Vec<_>, _>>()?;

        let test_calibration = match test_calibration {
            Some(coords) => Some(ImageOutcome::from_coords(trim(&coords, geometry)?)),
            None => None,
        };

        let losses: Vec<LossReport> = images.iter().map(|i| i.loss).collect();
        let loss = SessionLoss::summarize(&losses, self.config.loss_warning_percent);
        let session_secs = round_to(
            self.config.inter_trial_interval_secs
                + images.iter().map(|i| i.duration_ms / 1000.0).sum::<f64>(),
            3,
        );

        log::info!(
            "processed {} trials, {} without on-picture gaze, {:.3} s",
            images.len(),
            images.iter().filter(|i| i.gaze.is_no_data()).count(),
            session_secs
        );

        Ok(SessionReport {
            geometry: *geometry,
            images,
            test_calibration,
            loss,
            session_secs,
        })
    }

    /// Score the session's trials over `number` (see `scoring::select_window`).
    pub fn score(&self, session: &Session, number: i64) -> Result<ScoreSummary, PipelineError> {
        let trials: Vec<Trial> = session.trials().cloned().collect();
        self.scoring.score(&trials, number)
    }

    /// Score with the configured default window.
    pub fn score_default(&self, session: &Session) -> Result<ScoreSummary, PipelineError> {
        self.score(session, self.config.score_window)
    }
}

fn report(
    index: usize,
    processed: ProcessedTrial,
    loss: LossReport,
    offset: OffsetSource,
    trimmed: Coords,
    calibration: Option<ImageOutcome>,
) -> ImageReport {
    ImageReport {
        index,
        image: processed.image_name(),
        stimulus: processed.stimulus,
        true_label: processed.true_label,
        prediction: processed.prediction,
        duration_ms: processed.duration_ms,
        loss,
        offset,
        gaze: ImageOutcome::from_coords(trimmed),
        calibration,
        fixations: Vec::new(),
        switches: None,
        fixation_switches: None,
    }
}

// gaze_core: eye-tracking session reduction for image-classification experiments.
// Raw tracker samples in, per-image heatmap coordinates and a score summary out.
// The browser UI shell talks to `Engine`; offline tooling uses `Pipeline` directly.

mod buffer;
mod calibration;
mod coords;
mod error;
mod export;
mod fixation;
mod normalize;
mod pipeline;
mod record;
mod reduce;
mod scanpath;
mod scoring;
mod trial;
mod trim;
mod types;

use wasm_bindgen::prelude::*;

pub use buffer::GazeBuffer;
pub use calibration::{CalibrationOffset, Corrected, Histogram2d, OffsetCorrector, OffsetSource};
pub use coords::Coords;
pub use error::PipelineError;
pub use export::{
    append_rows, write_coords, write_coords_file, ExportHandle, ExportJob, ExportLayout, ImageRow,
    ScoreRow,
};
pub use fixation::{trim_fixations, Fixation, FixationDetector};
pub use normalize::GazeNormalizer;
pub use pipeline::{ImageOutcome, ImageReport, Pipeline, SessionReport};
pub use record::{Session, Trial, TrialRecord};
pub use reduce::{LossReport, SessionLoss};
pub use scanpath::{count_fixation_crossings, count_line_crossings, DividingLine};
pub use scoring::{
    select_window, ConfusionCounts, DurationStats, Rates, ScoreSummary, ScoringEngine,
};
pub use trial::{ProcessedTrial, TrialProcessor};
pub use trim::trim;
pub use types::*;

/// Initialize panic hook for better error messages in browser console.
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// Engine interface exposed to JavaScript.
/// Sessions cross the boundary as JSON; coordinate columns come back as typed arrays.
#[wasm_bindgen]
pub struct Engine {
    pipeline: Pipeline,
    last_report: Option<SessionReport>,
}

#[wasm_bindgen]
impl Engine {
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: &str) -> Result<Engine, JsValue> {
        let config = PipelineConfig::from_json(config_json).map_err(to_js)?;
        let pipeline = Pipeline::new(config).map_err(to_js)?;
        Ok(Engine {
            pipeline,
            last_report: None,
        })
    }

    /// Process a persisted session and return its `SessionReport` as JSON.
    /// The report is kept so `image_coords` can hand out columns without re-serializing.
    pub fn process_session(&mut self, session_json: &str) -> Result<String, JsValue> {
        self.process(session_json).map_err(to_js)
    }

    /// Score a persisted session over `number` trials (negative counts from the end).
    pub fn score(&self, session_json: &str, number: i32) -> Result<String, JsValue> {
        self.score_json(session_json, number as i64).map_err(to_js)
    }

    /// `[xs, ys]` of the image at `index` in the last processed session.
    /// Both arrays are empty for an image without on-picture gaze.
    pub fn image_coords(&self, index: usize) -> Result<js_sys::Array, JsValue> {
        let coords = self.coords_at(index).map_err(to_js)?;
        let (xs, ys) = match coords {
            Some(coords) => (coords.xs.as_slice(), coords.ys.as_slice()),
            None => (&[][..], &[][..]),
        };

        let columns = js_sys::Array::new();
        columns.push(&js_sys::Float64Array::from(xs));
        columns.push(&js_sys::Float64Array::from(ys));
        Ok(columns)
    }

    /// Side changes of the image's scanpath across the line (x0, y0)-(x1, y1), image-local pixels.
    pub fn line_crossings(&self, index: usize, x0: f64, y0: f64, x1: f64, y1: f64) -> Result<usize, JsValue> {
        let line = DividingLine::new(PixelCoord::new(x0, y0), PixelCoord::new(x1, y1));
        let coords = self.coords_at(index).map_err(to_js)?;
        Ok(coords.map_or(0, |c| count_line_crossings(c, &line)))
    }

    /// Side changes of the image's fixation centers across the line (x0, y0)-(x1, y1).
    pub fn fixation_crossings(&self, index: usize, x0: f64, y0: f64, x1: f64, y1: f64) -> Result<usize, JsValue> {
        let line = DividingLine::new(PixelCoord::new(x0, y0), PixelCoord::new(x1, y1));
        let image = self.image_at(index).map_err(to_js)?;
        Ok(count_fixation_crossings(&image.fixations, &line))
    }
}

impl Engine {
    fn process(&mut self, session_json: &str) -> Result<String, PipelineError> {
        let session = Session::from_json(session_json)?;
        let report = self.pipeline.process_session(&session)?;
        let json = serde_json::to_string(&report)?;
        self.last_report = Some(report);
        Ok(json)
    }

    fn score_json(&self, session_json: &str, number: i64) -> Result<String, PipelineError> {
        let session = Session::from_json(session_json)?;
        let summary = self.pipeline.score(&session, number)?;
        Ok(serde_json::to_string(&summary)?)
    }

    fn image_at(&self, index: usize) -> Result<&ImageReport, PipelineError> {
        let report = self
            .last_report
            .as_ref()
            .ok_or_else(|| PipelineError::format("no session has been processed"))?;
        report
            .images
            .get(index)
            .ok_or_else(|| PipelineError::format(format!("no image at index {}", index)))
    }

    fn coords_at(&self, index: usize) -> Result<Option<&Coords>, PipelineError> {
        Ok(self.image_at(index)?.gaze.coords())
    }
}

fn to_js(err: PipelineError) -> JsValue {
    JsValue::from_str(&err.to_string())
}

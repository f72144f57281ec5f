// CSV tables for processed sessions, and a cancellable background writer.
// See DESIGN.md: Export

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use serde::Serialize;

use crate::coords::Coords;
use crate::error::PipelineError;
use crate::pipeline::{ImageOutcome, ImageReport, SessionReport};
use crate::scoring::{DurationStats, ScoreSummary};
use crate::types::{round_to, Label};

/// Write one image's coordinates as an `x,y,times` table.
pub fn write_coords<W: io::Write>(writer: W, coords: &Coords) -> Result<(), PipelineError> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
    writer.write_record(["x", "y", "times"])?;
    for row in coords.iter() {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_coords_file(path: &Path, coords: &Coords) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    write_coords(File::create(path)?, coords)
}

/// Append `rows` to the table at `path`, writing the header only when the file is new or empty.
pub fn append_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let write_header = fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
    let file = OpenOptions::new().create(true).append(true).open(path)?;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(write_header)
        .from_writer(file);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// One line of the score table. Pause columns are empty when no break was estimated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreRow {
    pub participant: String,
    pub dataset: String,
    pub number: i64,
    pub p: usize,
    pub n: usize,
    pub tp: usize,
    #[serde(rename = "fn")]
    pub fn_: usize,
    pub fp: usize,
    pub tn: usize,
    pub precision: f64,
    pub recall: f64,
    pub tnr: f64,
    pub fnr: f64,
    pub accuracy: f64,
    pub f1: f64,
    pub images_mean: f64,
    pub images_variance: f64,
    pub images_sum: f64,
    pub images_min: f64,
    pub images_max: f64,
    pub pause_mean: Option<f64>,
    pub pause_variance: Option<f64>,
    pub pause_sum: Option<f64>,
    pub pause_min: Option<f64>,
    pub pause_max: Option<f64>,
    pub total_duration: f64,
}

impl ScoreRow {
    pub fn new(participant: &str, dataset: &str, summary: &ScoreSummary) -> Self {
        let pause = summary.pause.as_ref();
        let pick = |f: fn(&DurationStats) -> f64| pause.map(f);
        ScoreRow {
            participant: participant.to_string(),
            dataset: dataset.to_string(),
            number: summary.number,
            p: summary.p,
            n: summary.n,
            tp: summary.confusion.tp,
            fn_: summary.confusion.fn_,
            fp: summary.confusion.fp,
            tn: summary.confusion.tn,
            precision: summary.rates.precision,
            recall: summary.rates.recall,
            tnr: summary.rates.tnr,
            fnr: summary.rates.fnr,
            accuracy: summary.rates.accuracy,
            f1: summary.rates.f1,
            images_mean: summary.images.mean,
            images_variance: summary.images.variance,
            images_sum: summary.images.sum,
            images_min: summary.images.min,
            images_max: summary.images.max,
            pause_mean: pick(|s| s.mean),
            pause_variance: pick(|s| s.variance),
            pause_sum: pick(|s| s.sum),
            pause_min: pick(|s| s.min),
            pause_max: pick(|s| s.max),
            total_duration: summary.total_duration,
        }
    }
}

/// One line of the per-image table; `duration` is in seconds.
/// Switch columns stay empty when no dividing line is configured.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageRow {
    pub participant: String,
    pub dataset: String,
    pub image: String,
    pub true_value: Label,
    pub pred_value: Label,
    pub duration: f64,
    pub fixations: usize,
    pub switches: Option<usize>,
    pub switches_fixations: Option<usize>,
}

impl ImageRow {
    pub fn new(participant: &str, dataset: &str, image: &ImageReport) -> Self {
        ImageRow {
            participant: participant.to_string(),
            dataset: dataset.to_string(),
            image: image.image.clone(),
            true_value: image.true_label,
            pred_value: image.prediction,
            duration: round_to(image.duration_ms / 1000.0, 3),
            fixations: image.fixations.len(),
            switches: image.switches,
            switches_fixations: image.fixation_switches,
        }
    }
}

/// Output directory layout: `<root>/<participant>/<dataset>/<index>_<image>.csv`,
/// with `scores.csv` and `images.csv` shared at the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportLayout {
    pub root: PathBuf,
    pub participant: String,
    pub dataset: String,
}

impl ExportLayout {
    pub fn new(root: impl Into<PathBuf>, participant: impl Into<String>, dataset: impl Into<String>) -> Self {
        ExportLayout {
            root: root.into(),
            participant: participant.into(),
            dataset: dataset.into(),
        }
    }

    pub fn dataset_dir(&self) -> PathBuf {
        self.root.join(&self.participant).join(&self.dataset)
    }

    pub fn image_path(&self, image: &ImageReport) -> PathBuf {
        self.dataset_dir()
            .join(format!("{}_{}.csv", image.index, image.image))
    }

    pub fn calibration_path(&self, image: &ImageReport) -> PathBuf {
        self.dataset_dir()
            .join(format!("{}_{}_calibration.csv", image.index, image.image))
    }

    /// The session's test-wide calibration capture.
    pub fn session_calibration_path(&self) -> PathBuf {
        self.dataset_dir().join("calibration.csv")
    }

    pub fn scores_path(&self) -> PathBuf {
        self.root.join("scores.csv")
    }

    pub fn images_path(&self) -> PathBuf {
        self.root.join("images.csv")
    }

    /// Every coordinate table of `report` with the path it belongs at. "No data" outcomes are skipped.
    pub fn coordinate_tables<'a>(&self, report: &'a SessionReport) -> Vec<(PathBuf, &'a Coords)> {
        let mut tables = Vec::new();
        for image in &report.images {
            if let ImageOutcome::Data(coords) = &image.gaze {
                tables.push((self.image_path(image), coords));
            }
            if let Some(ImageOutcome::Data(coords)) = &image.calibration {
                tables.push((self.calibration_path(image), coords));
            }
        }
        if let Some(ImageOutcome::Data(coords)) = &report.test_calibration {
            tables.push((self.session_calibration_path(), coords));
        }
        tables
    }
}

/// A session export to run on a worker thread.
#[derive(Debug, Clone)]
pub struct ExportJob {
    layout: ExportLayout,
    report: SessionReport,
    score: Option<ScoreSummary>,
}

impl ExportJob {
    pub fn new(layout: ExportLayout, report: SessionReport) -> Self {
        ExportJob {
            layout,
            report,
            score: None,
        }
    }

    /// Also append a score row when the job runs.
    pub fn with_score(mut self, score: ScoreSummary) -> Self {
        self.score = Some(score);
        self
    }

    /// Write every table, checking `cancel` before each one.
    /// Returns the number of tables written.
    pub fn run(&self, cancel: &AtomicBool) -> Result<usize, PipelineError> {
        let layout = &self.layout;
        let mut written = 0;

        for (path, coords) in layout.coordinate_tables(&self.report) {
            if cancel.load(Ordering::Relaxed) {
                return Err(PipelineError::Cancelled { written });
            }
            write_coords_file(&path, coords)?;
            written += 1;
        }

        if cancel.load(Ordering::Relaxed) {
            return Err(PipelineError::Cancelled { written });
        }
        let rows: Vec<ImageRow> = self
            .report
            .images
            .iter()
            .map(|image| ImageRow::new(&layout.participant, &layout.dataset, image))
            .collect();
        append_rows(&layout.images_path(), &rows)?;
        written += 1;

        if let Some(score) = &self.score {
            if cancel.load(Ordering::Relaxed) {
                return Err(PipelineError::Cancelled { written });
            }
            let row = ScoreRow::new(&layout.participant, &layout.dataset, score);
            append_rows(&layout.scores_path(), &[row])?;
            written += 1;
        }

        log::info!("exported {} tables to {}", written, layout.dataset_dir().display());
        Ok(written)
    }

    pub fn spawn(self) -> ExportHandle {
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);
        let worker = thread::spawn(move || self.run(&flag));
        ExportHandle { cancel, worker }
    }
}

/// Handle to a running export.
#[derive(Debug)]
pub struct ExportHandle {
    cancel: Arc<AtomicBool>,
    worker: JoinHandle<Result<usize, PipelineError>>,
}

impl ExportHandle {
    /// Ask the worker to stop before its next table.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    pub fn join(self) -> Result<usize, PipelineError> {
        self.worker.join().map_err(|_| {
            PipelineError::Io(io::Error::new(io::ErrorKind::Other, "export worker panicked"))
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::OffsetSource;
    use crate::fixation::Fixation;
    use crate::reduce::LossReport;
    use crate::scoring::{ConfusionCounts, Rates};
    use crate::types::PictureGeometry;

    fn coords(points: &[(f64, f64, f64)]) -> Coords {
        let mut c = Coords::new();
        for &(x, y, t) in points {
            c.push(x, y, t);
        }
        c
    }

    fn image(index: usize, name: &str, gaze: ImageOutcome) -> ImageReport {
        ImageReport {
            index,
            stimulus: format!("set/{}.png", name),
            image: name.to_string(),
            true_label: Label::Positive,
            prediction: Label::Negative,
            duration_ms: 1250.0,
            loss: LossReport {
                lost: 0,
                total: 1,
                percent: 0.0,
            },
            offset: OffsetSource::None,
            gaze,
            calibration: None,
            fixations: Vec::new(),
            switches: None,
            fixation_switches: None,
        }
    }

    fn report() -> SessionReport {
        let mut with_cal = image(1, "dog", ImageOutcome::Data(coords(&[(3.0, 4.0, 8.3)])));
        with_cal.calibration = Some(ImageOutcome::Data(coords(&[(256.0, 256.0, 0.0)])));
        SessionReport {
            geometry: PictureGeometry::new(0.0, 0.0, 512.0, 512.0),
            images: vec![
                image(0, "cat", ImageOutcome::Data(coords(&[(1.0, 2.0, 0.0), (5.0, 6.0, 16.7)]))),
                with_cal,
                image(2, "owl", ImageOutcome::NoData),
            ],
            test_calibration: None,
            loss: None,
            session_secs: 53.7,
        }
    }

    fn summary(pause: Option<DurationStats>) -> ScoreSummary {
        let stats = DurationStats {
            mean: 1.0,
            variance: 0.0,
            sum: 2.0,
            min: 1.0,
            max: 1.0,
        };
        ScoreSummary {
            number: 2,
            p: 1,
            n: 1,
            confusion: ConfusionCounts {
                tp: 1,
                fn_: 0,
                fp: 0,
                tn: 1,
            },
            rates: Rates {
                precision: 1.0,
                recall: 1.0,
                tnr: 1.0,
                fnr: 0.0,
                accuracy: 1.0,
                f1: 1.0,
            },
            images: stats,
            pause,
            total_duration: 2.0,
        }
    }

    #[test]
    fn coords_table_has_header_and_rows() {
        let mut out = Vec::new();
        write_coords(&mut out, &coords(&[(1.0, 2.0, 0.0), (3.5, 4.0, 8.3)])).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "x,y,times\n1.0,2.0,0.0\n3.5,4.0,8.3\n");
    }

    #[test]
    fn appended_tables_write_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scores.csv");
        append_rows(&path, &[ScoreRow::new("p1", "a", &summary(None))]).unwrap();
        append_rows(&path, &[ScoreRow::new("p1", "b", &summary(None))]).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("participant,dataset,number,p,n,tp,fn,fp,tn,"));
        assert!(lines[1].starts_with("p1,a,2,1,1,1,0,0,1,"));
        assert!(lines[2].starts_with("p1,b,"));
    }

    #[test]
    fn missing_pause_leaves_empty_columns() {
        let row = ScoreRow::new("p1", "a", &summary(None));
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(Vec::new());
        writer.serialize(&row).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert!(text.trim_end().ends_with(",,,,,2.0"));
    }

    #[test]
    fn image_rows_use_seconds() {
        let row = ImageRow::new("p1", "a", &report().images[0]);
        assert_eq!(row.duration, 1.25);
        assert_eq!(row.true_value, Label::Positive);
        assert_eq!(row.fixations, 0);
    }

    #[test]
    fn image_rows_carry_fixation_columns() {
        let mut image = report().images.remove(0);
        image.fixations = vec![Fixation {
            x: 10.0,
            y: 20.0,
            start_ms: 0.0,
            end_ms: 150.0,
        }];
        image.switches = Some(3);
        image.fixation_switches = Some(1);
        let row = ImageRow::new("p1", "a", &image);
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(Vec::new());
        writer.serialize(&row).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert!(text.trim_end().ends_with("1.25,1,3,1"));

        let row = ImageRow::new("p1", "a", &report().images[2]);
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(Vec::new());
        writer.serialize(&row).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert!(text.trim_end().ends_with("1.25,0,,"));
    }

    #[test]
    fn layout_names_tables_by_index_and_image() {
        let layout = ExportLayout::new("/out", "p1", "set_a");
        let report = report();
        let tables = layout.coordinate_tables(&report);
        let names: Vec<String> = tables
            .iter()
            .map(|(p, _)| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["0_cat.csv", "1_dog.csv", "1_dog_calibration.csv"]);
        assert_eq!(tables[0].0, PathBuf::from("/out/p1/set_a/0_cat.csv"));
    }

    #[test]
    fn background_export_writes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ExportLayout::new(dir.path(), "p1", "set_a");
        let handle = ExportJob::new(layout.clone(), report())
            .with_score(summary(None))
            .spawn();
        assert_eq!(handle.join().unwrap(), 5);

        assert!(layout.dataset_dir().join("0_cat.csv").exists());
        assert!(!layout.dataset_dir().join("2_owl.csv").exists());
        let images = fs::read_to_string(layout.images_path()).unwrap();
        assert_eq!(images.lines().count(), 4);
        assert!(layout.scores_path().exists());
    }

    #[test]
    fn cancelled_export_stops_before_next_table() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ExportLayout::new(dir.path(), "p1", "set_a");
        let cancel = AtomicBool::new(true);
        let err = ExportJob::new(layout.clone(), report()).run(&cancel).unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled { written: 0 }));
        assert!(!layout.images_path().exists());
    }
}

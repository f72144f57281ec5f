// Offline batch reduction of saved eye-tracking sessions into CSV tables.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use gaze_core::{
    ExportJob, ExportLayout, MissingCalibration, Pipeline, PipelineConfig, PipelineError, Session,
};
use log::LevelFilter;

#[derive(Parser, Debug)]
#[command(name = "gaze_batch")]
#[command(about = "Reduce saved eye-tracking sessions to heatmap coordinates and scores", long_about = None)]
struct Cli {
    /// Session JSON files; each file stem becomes the dataset name
    #[arg(required = true)]
    sessions: Vec<PathBuf>,

    /// Participant id used in output paths and table rows
    #[arg(long, short)]
    participant: String,

    /// Output directory
    #[arg(long, short, default_value = "output")]
    out_dir: PathBuf,

    /// Scoring window: first N trials, or last |N| when negative (default from config)
    #[arg(long, short, allow_negative_numbers = true)]
    number: Option<i64>,

    /// Pipeline config JSON
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Subtract the configured default offset from trials without calibration
    #[arg(long)]
    default_offset: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(LevelFilter::Info)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_path(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if cli.default_offset {
        config.missing_calibration = MissingCalibration::DefaultOffset;
    }
    let number = cli.number.unwrap_or(config.score_window);
    let pipeline = Pipeline::new(config).context("invalid pipeline config")?;

    let mut failed = 0;
    for path in &cli.sessions {
        match run_session(&pipeline, path, &cli.participant, &cli.out_dir, number) {
            Ok(written) => log::info!("{}: wrote {} tables", path.display(), written),
            Err(err) => {
                failed += 1;
                let kind = if err.is_configuration() {
                    "configuration error"
                } else {
                    "skipped"
                };
                log::error!("{}: {}: {}", path.display(), kind, err);
            }
        }
    }

    log::info!(
        "{} of {} sessions processed",
        cli.sessions.len() - failed,
        cli.sessions.len()
    );
    if failed > 0 {
        anyhow::bail!("{} session file(s) failed", failed);
    }
    Ok(())
}

fn run_session(
    pipeline: &Pipeline,
    path: &Path,
    participant: &str,
    out_dir: &Path,
    number: i64,
) -> Result<usize, PipelineError> {
    let session = Session::from_path(path)?;
    let report = pipeline.process_session(&session)?;
    let score = pipeline.score(&session, number)?;

    if let Some(loss) = &report.loss {
        log::info!(
            "{}: mean loss {}%, {} trials flagged, est. {:.1} s",
            path.display(),
            loss.mean_percent,
            loss.flagged,
            report.session_secs
        );
    }

    let dataset = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "session".to_string());
    let layout = ExportLayout::new(out_dir, participant, dataset);
    ExportJob::new(layout, report).with_score(score).spawn().join()
}

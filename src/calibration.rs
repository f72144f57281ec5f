// Tracker drift correction from a calibration capture.
// The densest 2D histogram bin of the capture is taken as where the participant
// actually looked; its distance from the picture center is the drift.
// See DESIGN.md: Calibration Offset Corrector

use serde::{Deserialize, Serialize};

use crate::coords::Coords;
use crate::error::PipelineError;
use crate::types::*;

/// Systematic gaze drift in pixels. Corrected = raw - offset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationOffset {
    pub dx: f64,
    pub dy: f64,
}

impl CalibrationOffset {
    pub fn new(dx: f64, dy: f64) -> Self {
        CalibrationOffset { dx, dy }
    }
}

/// Where the offset applied to a trial came from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum OffsetSource {
    Calibration { offset: CalibrationOffset },
    Default { offset: CalibrationOffset },
    None,
}

impl OffsetSource {
    pub fn offset(&self) -> Option<CalibrationOffset> {
        match self {
            OffsetSource::Calibration { offset } | OffsetSource::Default { offset } => Some(*offset),
            OffsetSource::None => None,
        }
    }
}

/// Corrected coordinates plus the offset decision that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct Corrected {
    pub coords: Coords,
    pub source: OffsetSource,
}

/// Square-binned 2D histogram over a picture rectangle. Counts are row-major with X as the row.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram2d {
    bins: usize,
    x_edges: Vec<f64>,
    y_edges: Vec<f64>,
    counts: Vec<u32>,
}

impl Histogram2d {
    /// Bin `coords` over `geometry`. Points outside the rectangle (or NaN) are ignored;
    /// a point on the far edge falls into the last bin.
    pub fn build(coords: &Coords, geometry: &PictureGeometry, bins: usize) -> Self {
        let bins = bins.clamp(1, MAX_HISTOGRAM_BINS);
        let x_edges = edges(geometry.x, geometry.right(), bins);
        let y_edges = edges(geometry.y, geometry.bottom(), bins);
        let mut counts = vec![0u32; bins * bins];

        for point in coords.points() {
            if let (Some(ix), Some(iy)) = (bin_index(&x_edges, point.x), bin_index(&y_edges, point.y)) {
                counts[ix * bins + iy] += 1;
            }
        }

        Histogram2d {
            bins,
            x_edges,
            y_edges,
            counts,
        }
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    /// `None` outside the `bins x bins` grid.
    pub fn count(&self, ix: usize, iy: usize) -> Option<u32> {
        self.index(ix, iy).map(|i| self.counts[i])
    }

    fn index(&self, ix: usize, iy: usize) -> Option<usize> {
        (ix < self.bins && iy < self.bins).then(|| ix * self.bins + iy)
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().map(|&c| c as u64).sum()
    }

    /// Bin with the highest count. Ties go to the first bin in row-major order,
    /// so an all-zero histogram peaks at (0, 0).
    pub fn peak(&self) -> (usize, usize) {
        let mut best = (0, 0u32);
        for (index, &count) in self.counts.iter().enumerate() {
            if count > best.1 {
                best = (index, count);
            }
        }
        (best.0 / self.bins, best.0 % self.bins)
    }

    /// Center of a bin in the histogram's coordinate frame. `None` outside the grid.
    pub fn bin_center(&self, ix: usize, iy: usize) -> Option<PixelCoord> {
        self.index(ix, iy)?;
        let x_width = self.x_edges[self.bins] - self.x_edges[0];
        let y_width = self.y_edges[self.bins] - self.y_edges[0];
        Some(PixelCoord::new(
            self.x_edges[ix] + x_width / self.bins as f64 / 2.0,
            self.y_edges[iy] + y_width / self.bins as f64 / 2.0,
        ))
    }
}

/// `bins + 1` evenly spaced edges; the last edge is exactly `hi`.
fn edges(lo: f64, hi: f64, bins: usize) -> Vec<f64> {
    let step = (hi - lo) / bins as f64;
    let mut edges: Vec<f64> = (0..=bins).map(|i| i as f64 * step + lo).collect();
    edges[bins] = hi;
    edges
}

fn bin_index(edges: &[f64], value: f64) -> Option<usize> {
    let last = edges.len() - 1;
    if value == edges[last] {
        return Some(last - 1);
    }
    // Number of edges <= value; 0 or all of them means out of range (NaN gives 0).
    let at_or_below = edges.partition_point(|&e| e <= value);
    if at_or_below == 0 || at_or_below > last {
        None
    } else {
        Some(at_or_below - 1)
    }
}

/// Estimates and applies calibration offsets.
#[derive(Debug, Clone, Copy)]
pub struct OffsetCorrector {
    bins: usize,
    missing: MissingCalibration,
    default_offset: CalibrationOffset,
}

impl OffsetCorrector {
    pub fn new(bins: usize, missing: MissingCalibration, default_offset: CalibrationOffset) -> Self {
        OffsetCorrector {
            bins: bins.clamp(1, MAX_HISTOGRAM_BINS),
            missing,
            default_offset,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.histogram_bins,
            config.missing_calibration,
            CalibrationOffset::new(config.default_offset[0], config.default_offset[1]),
        )
    }

    /// Offset between the densest calibration bin and the picture center.
    /// `Ok(None)` only for an empty capture; a capture with nothing on the picture
    /// still yields the offset of bin (0, 0).
    pub fn estimate(
        &self,
        calibration: &Coords,
        geometry: &PictureGeometry,
    ) -> Result<Option<CalibrationOffset>, PipelineError> {
        geometry.validate()?;
        if calibration.is_empty() {
            return Ok(None);
        }

        let histogram = Histogram2d::build(calibration, geometry, self.bins);
        let (ix, iy) = histogram.peak();
        if histogram.count(ix, iy) == Some(0) {
            log::debug!("no calibration point on the picture, using the first bin");
        }
        let Some(peak) = histogram.bin_center(ix, iy) else {
            return Ok(None);
        };
        let center = geometry.center();
        Ok(Some(CalibrationOffset::new(peak.x - center.x, peak.y - center.y)))
    }

    pub fn apply(coords: &Coords, offset: CalibrationOffset) -> Coords {
        let mut corrected = Coords::with_capacity(coords.len());
        for (x, y, t) in coords.iter() {
            corrected.push(x - offset.dx, y - offset.dy, t);
        }
        corrected
    }

    /// Correct a trial's coordinates. Missing calibration never fails: the configured
    /// policy decides between passing through and the default offset.
    pub fn correct(
        &self,
        coords: &Coords,
        calibration: Option<&Coords>,
        geometry: &PictureGeometry,
    ) -> Result<Corrected, PipelineError> {
        geometry.validate()?;
        if coords.is_empty() {
            return Ok(Corrected {
                coords: Coords::new(),
                source: OffsetSource::None,
            });
        }

        let estimated = match calibration {
            Some(calibration) => self.estimate(calibration, geometry)?,
            None => None,
        };

        let source = match (estimated, self.missing) {
            (Some(offset), _) => OffsetSource::Calibration { offset },
            (None, MissingCalibration::DefaultOffset) => OffsetSource::Default {
                offset: self.default_offset,
            },
            (None, MissingCalibration::PassThrough) => OffsetSource::None,
        };

        let coords = match source.offset() {
            Some(offset) => Self::apply(coords, offset),
            None => {
                log::debug!("no calibration offset, passing {} points through", coords.len());
                coords.clone()
            }
        };

        Ok(Corrected { coords, source })
    }
}

impl Default for OffsetCorrector {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

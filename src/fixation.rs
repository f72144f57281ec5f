// Dispersion-distance fixation detection over gaze columns.
// A fixation is a run of samples staying within a fixed distance of the run's
// first sample for at least the minimum duration.
// See DESIGN.md: Fixation Detector

use serde::{Deserialize, Serialize};

use crate::coords::Coords;
use crate::error::PipelineError;
use crate::types::*;

/// One detected fixation. Position is the run's first sample; times are ms since trial start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fixation {
    pub x: f64,
    pub y: f64,
    pub start_ms: f64,
    pub end_ms: f64,
}

impl Fixation {
    pub fn duration_ms(&self) -> f64 {
        self.end_ms - self.start_ms
    }

    pub fn position(&self) -> PixelCoord {
        PixelCoord::new(self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixationDetector {
    max_distance_px: f64,
    min_duration_ms: f64,
}

/// Samples collected since the current anchor.
struct Run {
    anchor: (f64, f64),
    start_ms: f64,
    last_ms: f64,
}

impl FixationDetector {
    pub fn new(max_distance_px: f64, min_duration_ms: f64) -> Self {
        FixationDetector {
            max_distance_px,
            min_duration_ms,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.fixation_max_distance_px, config.fixation_min_duration_ms)
    }

    /// Fixations in sample order. The coordinates keep whatever frame `coords` is in.
    pub fn detect(&self, coords: &Coords) -> Vec<Fixation> {
        let mut fixations = Vec::new();
        let mut run: Option<Run> = None;

        for (x, y, t) in coords.iter() {
            if let Some(current) = run.as_mut() {
                if self.within(current.anchor, (x, y)) {
                    current.last_ms = t;
                    continue;
                }
            }
            let next = Run {
                anchor: (x, y),
                start_ms: t,
                last_ms: t,
            };
            if let Some(done) = run.replace(next) {
                self.close(done, &mut fixations);
            }
        }
        if let Some(done) = run {
            self.close(done, &mut fixations);
        }

        log::trace!("{} fixations in {} samples", fixations.len(), coords.len());
        fixations
    }

    fn within(&self, anchor: (f64, f64), point: (f64, f64)) -> bool {
        let (dx, dy) = (point.0 - anchor.0, point.1 - anchor.1);
        (dx * dx + dy * dy).sqrt() <= self.max_distance_px
    }

    fn close(&self, run: Run, fixations: &mut Vec<Fixation>) {
        if run.last_ms - run.start_ms >= self.min_duration_ms {
            fixations.push(Fixation {
                x: run.anchor.0,
                y: run.anchor.1,
                start_ms: run.start_ms,
                end_ms: run.last_ms,
            });
        }
    }
}

impl Default for FixationDetector {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

/// Keep fixations inside `geometry` (edges inclusive), moved into image-local space.
pub fn trim_fixations(
    fixations: &[Fixation],
    geometry: &PictureGeometry,
) -> Result<Vec<Fixation>, PipelineError> {
    geometry.validate()?;
    Ok(fixations
        .iter()
        .filter(|f| geometry.contains(f.x, f.y))
        .map(|f| Fixation {
            x: f.x - geometry.x,
            y: f.y - geometry.y,
            ..*f
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // Samples every 10 ms.
    fn stream(points: &[(f64, f64)]) -> Coords {
        let mut c = Coords::new();
        for (i, &(x, y)) in points.iter().enumerate() {
            c.push(x, y, i as f64 * 10.0);
        }
        c
    }

    fn dwell(x: f64, y: f64, samples: usize) -> Vec<(f64, f64)> {
        (0..samples).map(|i| (x + (i % 3) as f64, y)).collect()
    }

    #[test]
    fn empty_stream_has_no_fixations() {
        assert!(FixationDetector::default().detect(&Coords::new()).is_empty());
    }

    #[test]
    fn one_long_dwell_is_one_fixation() {
        let fixations = FixationDetector::default().detect(&stream(&dwell(300.0, 200.0, 30)));
        assert_eq!(fixations.len(), 1);
        assert_eq!(fixations[0].position(), PixelCoord::new(300.0, 200.0));
        assert_eq!(fixations[0].start_ms, 0.0);
        assert_eq!(fixations[0].duration_ms(), 290.0);
    }

    #[test]
    fn saccade_splits_two_fixations() {
        let mut points = dwell(100.0, 100.0, 15);
        points.extend(dwell(400.0, 100.0, 15));
        let fixations = FixationDetector::default().detect(&stream(&points));
        assert_eq!(fixations.len(), 2);
        assert_eq!(fixations[0].end_ms, 140.0);
        assert_eq!(fixations[1].x, 400.0);
        assert_eq!(fixations[1].start_ms, 150.0);
    }

    #[test]
    fn short_dwell_is_dropped() {
        let mut points = dwell(100.0, 100.0, 5);
        points.extend(dwell(400.0, 400.0, 20));
        let fixations = FixationDetector::default().detect(&stream(&points));
        assert_eq!(fixations.len(), 1);
        assert_eq!(fixations[0].x, 400.0);
    }

    #[test]
    fn distance_is_measured_from_first_sample() {
        // Each step is 30 px, but the third sample is 60 px from the first.
        let points = [(0.0, 0.0), (30.0, 0.0), (60.0, 0.0)];
        let detector = FixationDetector::new(42.0, 10.0);
        let fixations = detector.detect(&stream(&points));
        assert_eq!(fixations.len(), 1);
        assert_eq!(fixations[0].end_ms, 10.0);
    }

    #[test]
    fn trimming_keeps_inclusive_edges_and_translates() {
        let g = PictureGeometry::new(100.0, 50.0, 200.0, 200.0);
        let fixations = [
            Fixation { x: 100.0, y: 50.0, start_ms: 0.0, end_ms: 120.0 },
            Fixation { x: 301.0, y: 60.0, start_ms: 130.0, end_ms: 400.0 },
            Fixation { x: 300.0, y: 250.0, start_ms: 410.0, end_ms: 600.0 },
        ];
        let trimmed = trim_fixations(&fixations, &g).unwrap();
        assert_eq!(trimmed.len(), 2);
        assert_eq!(trimmed[0].position(), PixelCoord::new(0.0, 0.0));
        assert_eq!(trimmed[1].position(), PixelCoord::new(200.0, 200.0));
        assert_eq!(trimmed[1].duration_ms(), 190.0);
    }

    #[test]
    fn trimming_rejects_degenerate_geometry() {
        let g = PictureGeometry::new(0.0, 0.0, 0.0, 10.0);
        assert!(trim_fixations(&[], &g).unwrap_err().is_configuration());
    }

    proptest! {
        #[test]
        fn fixations_are_ordered_and_long_enough(
            points in prop::collection::vec((0.0f64..500.0, 0.0f64..500.0), 0..200)
        ) {
            let detector = FixationDetector::default();
            let fixations = detector.detect(&stream(&points));
            for f in &fixations {
                prop_assert!(f.duration_ms() >= 100.0);
            }
            for pair in fixations.windows(2) {
                prop_assert!(pair[0].end_ms < pair[1].start_ms);
            }
        }
    }
}

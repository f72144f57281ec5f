// Binocular to monocular gaze, plus sample-loss accounting.
// See DESIGN.md: Monocular Reducer

use serde::{Deserialize, Serialize};

use crate::types::*;

impl GazePoint {
    /// Both eyes lost. Only the X component of each eye is consulted.
    pub fn is_nan(&self) -> bool {
        self.left.is_lost() && self.right.is_lost()
    }

    /// Single best-estimate point for this sample, or `None` when both eyes were lost.
    pub fn reduce(&self) -> Option<PixelCoord> {
        match (self.left.is_lost(), self.right.is_lost()) {
            (true, true) => None,
            (true, false) => Some(self.right),
            (false, true) => Some(self.left),
            (false, false) => Some(PixelCoord::new(
                ((self.left.x + self.right.x) / 2.0).floor(),
                ((self.left.y + self.right.y) / 2.0).floor(),
            )),
        }
    }
}

/// Share of fully lost samples in one trial.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossReport {
    pub lost: usize,
    pub total: usize,
    /// Percentage rounded to 2 decimals. A trial without samples reports 100.
    pub percent: f64,
}

impl LossReport {
    pub fn from_points(points: &[ReducedPoint]) -> Self {
        let lost = points.iter().filter(|p| p.is_nan()).count();
        let total = points.len();
        let percent = if total == 0 {
            100.0
        } else {
            round_to(lost as f64 / total as f64 * 100.0, 2)
        };
        LossReport {
            lost,
            total,
            percent,
        }
    }
}

/// Loss summary over every trial of a session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionLoss {
    pub mean_percent: f64,
    /// Trials at or above the configured warning threshold.
    pub flagged: usize,
}

impl SessionLoss {
    pub fn summarize(reports: &[LossReport], warning_percent: f64) -> Option<Self> {
        if reports.is_empty() {
            return None;
        }
        let mean = reports.iter().map(|r| r.percent).sum::<f64>() / reports.len() as f64;
        let flagged = reports
            .iter()
            .filter(|r| r.percent >= warning_percent)
            .count();
        Some(SessionLoss {
            mean_percent: round_to(mean, 2),
            flagged,
        })
    }
}

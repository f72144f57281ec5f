// Scanpath measures over trimmed, image-local coordinates.

use serde::{Deserialize, Serialize};

use crate::coords::Coords;
use crate::fixation::Fixation;
use crate::types::PixelCoord;

/// A dividing line in image-local pixels, e.g. the axis between two compared halves of a stimulus.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DividingLine {
    pub start: PixelCoord,
    pub end: PixelCoord,
}

impl DividingLine {
    pub fn new(start: PixelCoord, end: PixelCoord) -> Self {
        DividingLine { start, end }
    }

    /// From `[x0, y0, x1, y1]`.
    pub fn from_array(line: [f64; 4]) -> Self {
        Self::new(PixelCoord::new(line[0], line[1]), PixelCoord::new(line[2], line[3]))
    }

    /// Z component of (end - start) x (point - start). Positive on the left of the line.
    fn side(&self, point: PixelCoord) -> f64 {
        let (lx, ly) = (self.end.x - self.start.x, self.end.y - self.start.y);
        let (px, py) = (point.x - self.start.x, point.y - self.start.y);
        lx * py - ly * px
    }
}

/// How often consecutive gaze points change side of `line`.
pub fn count_line_crossings(coords: &Coords, line: &DividingLine) -> usize {
    count_side_changes(coords.points(), line)
}

/// Same measure over fixation centers instead of raw samples.
pub fn count_fixation_crossings(fixations: &[Fixation], line: &DividingLine) -> usize {
    count_side_changes(fixations.iter().map(Fixation::position), line)
}

/// Points exactly on the line count as the non-positive side.
fn count_side_changes(points: impl IntoIterator<Item = PixelCoord>, line: &DividingLine) -> usize {
    let mut sides = points.into_iter().map(|p| line.side(p) > 0.0);
    let Some(mut current) = sides.next() else {
        return 0;
    };

    let mut switches = 0;
    for side in sides {
        if side != current {
            switches += 1;
            current = side;
        }
    }
    switches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coords(points: &[(f64, f64)]) -> Coords {
        let mut c = Coords::new();
        for &(x, y) in points {
            c.push(x, y, 0.0);
        }
        c
    }

    fn vertical_middle() -> DividingLine {
        DividingLine::new(PixelCoord::new(256.0, 0.0), PixelCoord::new(256.0, 512.0))
    }

    #[test]
    fn counts_side_changes() {
        let path = coords(&[(100.0, 10.0), (120.0, 50.0), (300.0, 60.0), (400.0, 80.0), (200.0, 90.0)]);
        assert_eq!(count_line_crossings(&path, &vertical_middle()), 2);
    }

    #[test]
    fn staying_on_one_side_is_zero() {
        let path = coords(&[(10.0, 10.0), (20.0, 500.0), (255.0, 300.0)]);
        assert_eq!(count_line_crossings(&path, &vertical_middle()), 0);
    }

    #[test]
    fn empty_path_is_zero() {
        assert_eq!(count_line_crossings(&Coords::new(), &vertical_middle()), 0);
    }

    #[test]
    fn on_line_groups_with_non_positive_side() {
        // For this downward line, points with x < 256 are on the positive side.
        let path = coords(&[(100.0, 10.0), (256.0, 20.0), (300.0, 30.0)]);
        assert_eq!(count_line_crossings(&path, &vertical_middle()), 1);
    }

    #[test]
    fn fixation_centers_are_counted() {
        let fixation = |x: f64, start_ms: f64| Fixation {
            x,
            y: 100.0,
            start_ms,
            end_ms: start_ms + 150.0,
        };
        let fixations = [fixation(100.0, 0.0), fixation(400.0, 200.0), fixation(120.0, 400.0)];
        let line = DividingLine::from_array([256.0, 0.0, 256.0, 512.0]);
        assert_eq!(line, vertical_middle());
        assert_eq!(count_fixation_crossings(&fixations, &line), 2);
        assert_eq!(count_fixation_crossings(&[], &line), 0);
    }
}

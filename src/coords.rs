// Parallel coordinate columns for histogramming and tables.
// See DESIGN.md: Heatmap Coordinate Extractor

use serde::{Deserialize, Serialize};

use crate::types::*;

/// Parallel `xs`/`ys` columns with the matching `times` (ms since trial start).
/// All three columns always have the same length.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Coords {
    pub xs: Vec<f64>,
    pub ys: Vec<f64>,
    pub times: Vec<f64>,
}

impl Coords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Coords {
            xs: Vec::with_capacity(capacity),
            ys: Vec::with_capacity(capacity),
            times: Vec::with_capacity(capacity),
        }
    }

    /// Unzip reduced points in order. Fully lost samples contribute nothing.
    pub fn from_points(points: &[ReducedPoint]) -> Self {
        let mut coords = Coords::with_capacity(points.len());
        for point in points {
            if let Some(position) = point.position {
                coords.push(position.x, position.y, point.relative_ms);
            }
        }
        coords
    }

    pub fn push(&mut self, x: f64, y: f64, time: f64) {
        self.xs.push(x);
        self.ys.push(y);
        self.times.push(time);
    }

    pub fn len(&self) -> usize {
        self.xs.len()
    }

    /// "No data for this image". Callers skip peak finding and trimming.
    pub fn is_empty(&self) -> bool {
        self.xs.is_empty()
    }

    /// `(x, y, time)` triples in order.
    pub fn iter(&self) -> impl Iterator<Item = (f64, f64, f64)> + '_ {
        self.xs
            .iter()
            .zip(&self.ys)
            .zip(&self.times)
            .map(|((&x, &y), &t)| (x, y, t))
    }

    pub fn points(&self) -> impl Iterator<Item = PixelCoord> + '_ {
        self.xs
            .iter()
            .zip(&self.ys)
            .map(|(&x, &y)| PixelCoord::new(x, y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reduced(position: Option<(f64, f64)>, t: f64) -> ReducedPoint {
        ReducedPoint {
            position: position.map(|(x, y)| PixelCoord::new(x, y)),
            relative_ms: t,
        }
    }

    #[test]
    fn unzips_in_order() {
        let points = vec![
            reduced(Some((1.0, 2.0)), 0.0),
            reduced(Some((3.0, 4.0)), 8.3),
            reduced(Some((5.0, 6.0)), 16.7),
        ];
        let coords = Coords::from_points(&points);
        assert_eq!(coords.xs, vec![1.0, 3.0, 5.0]);
        assert_eq!(coords.ys, vec![2.0, 4.0, 6.0]);
        assert_eq!(coords.times, vec![0.0, 8.3, 16.7]);
    }

    #[test]
    fn lost_points_are_dropped() {
        let points = vec![
            reduced(None, 0.0),
            reduced(Some((3.0, 4.0)), 8.3),
            reduced(None, 16.7),
        ];
        let coords = Coords::from_points(&points);
        assert_eq!(coords.len(), 1);
        assert_eq!(coords.times, vec![8.3]);
    }

    #[test]
    fn empty_input_gives_empty_columns() {
        let coords = Coords::from_points(&[]);
        assert!(coords.is_empty());
        assert!(coords.xs.is_empty() && coords.ys.is_empty() && coords.times.is_empty());

        let all_lost = Coords::from_points(&[reduced(None, 0.0)]);
        assert!(all_lost.is_empty());
    }
}

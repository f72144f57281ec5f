// Clip coordinates to the picture and move them into image-local space.
// See DESIGN.md: Geometry Trimmer

use crate::coords::Coords;
use crate::error::PipelineError;
use crate::types::*;

/// Keep points inside `geometry` (edges inclusive), translated so the picture's top-left is (0, 0).
/// Points outside are dropped, never clamped. An empty result is a valid outcome.
pub fn trim(coords: &Coords, geometry: &PictureGeometry) -> Result<Coords, PipelineError> {
    geometry.validate()?;
    if coords.is_empty() {
        return Ok(Coords::new());
    }

    let mut trimmed = Coords::with_capacity(coords.len());
    for (x, y, t) in coords.iter() {
        if geometry.contains(x, y) {
            trimmed.push(x - geometry.x, y - geometry.y, t);
        }
    }

    if trimmed.is_empty() {
        log::debug!("all {} points fell outside the picture", coords.len());
    }
    Ok(trimmed)
}

//! Turns EAST score and geometry maps into candidate boxes.
//!
//! The network predicts one cell per 4x4 block of the resized input. Every cell
//! carries a text probability plus five geometry channels: distances from the
//! cell to the top, right, bottom and left edges of its box, and the box angle.

use geo::{BoundingRect, Coord, LineString, Polygon};
use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};
use tracing::instrument;

use crate::{CandidateBox, Error, Result};

/// Per-cell text probabilities, indexed by `(row, col)`.
pub type ScoreGrid = Array2<f32>;
/// Geometry channels stacked as `(channel, row, col)`: top, right, bottom, left, angle.
pub type GeometryGrid = Array3<f32>;

pub const FEATURE_STRIDE: f32 = 4.0;
pub const GEOMETRY_CHANNELS: usize = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GeometryDecoding {
    /// Rotate only the end corner and derive the start corner by subtracting the
    /// unrotated width and height. This is the decoding published with EAST.
    #[default]
    EndCorner,
    /// Rotate all four corners of the predicted rectangle and keep their
    /// axis-aligned bounds, rounded outwards to whole pixels.
    RotatedBounds,
}

#[instrument(skip(scores, geometry), level = "debug")]
pub fn decode_predictions(
    scores: ArrayView2<f32>,
    geometry: ArrayView3<f32>,
    min_confidence: f32,
    decoding: GeometryDecoding,
) -> Result<Vec<CandidateBox>> {
    let (rows, cols) = scores.dim();
    let expected = (GEOMETRY_CHANNELS, rows, cols);
    if geometry.dim() != expected {
        return Err(Error::UnexpectedOutput(format!(
            "geometry shape {:?} does not match scores {:?}",
            geometry.dim(),
            expected
        )));
    }

    let top = geometry.index_axis(Axis(0), 0);
    let right = geometry.index_axis(Axis(0), 1);
    let bottom = geometry.index_axis(Axis(0), 2);
    let left = geometry.index_axis(Axis(0), 3);
    let angles = geometry.index_axis(Axis(0), 4);

    let candidates = scores
        .indexed_iter()
        .filter(|(_, score)| **score >= min_confidence)
        .map(|((y, x), score)| {
            let cell = Cell {
                offset_x: x as f32 * FEATURE_STRIDE,
                offset_y: y as f32 * FEATURE_STRIDE,
                top: top[[y, x]],
                right: right[[y, x]],
                bottom: bottom[[y, x]],
                left: left[[y, x]],
                angle: angles[[y, x]],
            };
            match decoding {
                GeometryDecoding::EndCorner => cell.end_corner_box(*score),
                GeometryDecoding::RotatedBounds => cell.rotated_bounds_box(*score),
            }
        })
        .collect::<Vec<_>>();

    log::debug!(
        "{} of {} cells passed confidence {min_confidence}",
        candidates.len(),
        rows * cols
    );
    Ok(candidates)
}

#[derive(Debug, Clone, Copy)]
struct Cell {
    offset_x: f32,
    offset_y: f32,
    top: f32,
    right: f32,
    bottom: f32,
    left: f32,
    angle: f32,
}

impl Cell {
    /// Maps a point given relative to the cell origin in the box's own frame.
    fn rotate(&self, local_x: f32, local_y: f32) -> Coord<f32> {
        let (sin, cos) = self.angle.sin_cos();
        Coord {
            x: self.offset_x + cos * local_x + sin * local_y,
            y: self.offset_y - sin * local_x + cos * local_y,
        }
    }

    fn end_corner_box(&self, score: f32) -> CandidateBox {
        let h = self.top + self.bottom;
        let w = self.right + self.left;
        let end = self.rotate(self.right, self.bottom);
        let end_x = end.x as i32;
        let end_y = end.y as i32;
        CandidateBox {
            start_x: (end_x as f32 - w) as i32,
            start_y: (end_y as f32 - h) as i32,
            end_x,
            end_y,
            score,
        }
    }

    fn rotated_bounds_box(&self, score: f32) -> CandidateBox {
        let corners = vec![
            self.rotate(-self.left, -self.top),
            self.rotate(self.right, -self.top),
            self.rotate(self.right, self.bottom),
            self.rotate(-self.left, self.bottom),
        ];
        let polygon = Polygon::new(LineString::new(corners), vec![]);
        match polygon.bounding_rect() {
            Some(rect) => CandidateBox {
                start_x: rect.min().x.floor() as i32,
                start_y: rect.min().y.floor() as i32,
                end_x: rect.max().x.ceil() as i32,
                end_y: rect.max().y.ceil() as i32,
                score,
            },
            // four finite corners always have bounds
            None => self.end_corner_box(score),
        }
    }
}

use image::{DynamicImage, GenericImageView};
use tracing::instrument;

use crate::{util::Scale, BBox, CandidateBox, Error, Result};

/// How the enclosing text box is widened before cropping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CropMargin {
    /// Every edge moves halfway towards the matching image border.
    #[default]
    HalfwayToEdge,
    /// Crop exactly to the detected extents.
    None,
}

pub fn rescale(candidate: &CandidateBox, scale: Scale) -> BBox {
    BBox {
        x0: (candidate.start_x as f32 * scale.factor_x) as i32,
        y0: (candidate.start_y as f32 * scale.factor_y) as i32,
        x1: (candidate.end_x as f32 * scale.factor_x) as i32,
        y1: (candidate.end_y as f32 * scale.factor_y) as i32,
    }
}

/// Maps every box back to original-image space and returns their common extents.
#[instrument(skip(boxes), fields(boxes = boxes.len()), level = "debug")]
pub fn enclosing_box(boxes: &[CandidateBox], scale: Scale) -> Result<BBox> {
    boxes
        .iter()
        .map(|it| rescale(it, scale))
        .reduce(|acc, it| BBox {
            x0: acc.x0.min(it.x0),
            y0: acc.y0.min(it.y0),
            x1: acc.x1.max(it.x1),
            y1: acc.y1.max(it.y1),
        })
        .ok_or(Error::NoTextDetected)
}

/// Clamps `bbox` into a `width` x `height` image and applies `margin`.
pub fn apply_margin(bbox: BBox, width: u32, height: u32, margin: CropMargin) -> BBox {
    let (width, height) = (width as i32, height as i32);
    let clamped = BBox {
        x0: bbox.x0.clamp(0, width),
        y0: bbox.y0.clamp(0, height),
        x1: bbox.x1.clamp(0, width),
        y1: bbox.y1.clamp(0, height),
    };
    match margin {
        CropMargin::None => clamped,
        CropMargin::HalfwayToEdge => BBox {
            x0: clamped.x0 / 2,
            y0: clamped.y0 / 2,
            x1: width - (width - clamped.x1) / 2,
            y1: height - (height - clamped.y1) / 2,
        },
    }
}

pub(crate) fn crop_to(image: &DynamicImage, bbox: BBox) -> DynamicImage {
    log::trace!("Slicing subimage to {bbox:?}");
    let (width, height) = image.dimensions();
    let x = (bbox.x0.max(0) as u32).min(width);
    let y = (bbox.y0.max(0) as u32).min(height);
    let w = (bbox.width().max(0) as u32).min(width - x);
    let h = (bbox.height().max(0) as u32).min(height - y);
    image.crop_imm(x, y, w, h)
}

use std::path::PathBuf;

use image::DynamicImage;

/// A detection in resized-image pixel space, produced once per grid cell that passed
/// the confidence filter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateBox {
    pub start_x: i32,
    pub start_y: i32,
    pub end_x: i32,
    pub end_y: i32,
    pub score: f32,
}

/// An `(x0, y0, x1, y1)` rectangle in original-image pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BBox {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl BBox {
    pub fn width(&self) -> i32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> i32 {
        self.y1 - self.y0
    }

    pub fn to_array(self) -> [i32; 4] {
        [self.x0, self.y0, self.x1, self.y1]
    }
}

#[derive(Debug, Clone)]
pub struct TextCrop {
    pub image: DynamicImage,
    pub bbox: BBox,
    pub candidates: usize,
    pub survivors: usize,
    pub saved_to: Option<PathBuf>,
}

/// Document corners ordered top-left, top-right, bottom-right, bottom-left.
pub type Quad = [(f32, f32); 4];

#[derive(Debug, Clone)]
pub struct DocumentScan {
    pub image: DynamicImage,
    pub corners: Quad,
    pub saved_to: Option<PathBuf>,
}

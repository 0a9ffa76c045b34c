//! Document scanning: locate the page outline in a photo and warp it flat.
//!
//! The outline is taken to be the largest contour of the edge map that simplifies
//! to exactly four vertices. Edge detection runs on a downscaled copy; the warp is
//! applied to the full-resolution image.

use std::path::PathBuf;

use float_ord::FloatOrd;
use geo::{Area, Coord, EuclideanLength, LineString, Polygon, Simplify};
use image::{imageops::FilterType, DynamicImage, ImageBuffer, Pixel, Rgb, RgbImage};
use imageproc::{
    contours::find_contours,
    distance_transform::Norm,
    edges::canny,
    filter::gaussian_blur_f32,
    geometric_transformations::{warp_into, Interpolation, Projection},
    morphology::dilate_mut,
    point::Point,
};
use tracing::instrument;

use crate::{DocumentScan, Error, Quad, Result};

#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Height of the copy that edge detection runs on.
    pub working_height: u32,
    pub blur_sigma: f32,
    pub canny_low: f32,
    pub canny_high: f32,
    /// How many of the largest contours are tried.
    pub max_contours: usize,
    /// Simplification tolerance as a fraction of the contour perimeter.
    pub epsilon_ratio: f32,
    pub gamma: Option<f32>,
    pub save_path: Option<PathBuf>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            working_height: 500,
            blur_sigma: 1.0,
            canny_low: 75.0,
            canny_high: 200.0,
            max_contours: 5,
            epsilon_ratio: 0.02,
            gamma: None,
            save_path: None,
        }
    }
}

pub struct DocumentScanner {
    options: ScanOptions,
}

impl DocumentScanner {
    pub fn new(options: ScanOptions) -> Self {
        Self { options }
    }

    /// Finds, warps and optionally gamma-corrects the document in `image`.
    #[instrument(skip(self, image))]
    pub fn scan(&self, image: &DynamicImage) -> Result<DocumentScan> {
        let corners = self.find_document(image)?.ok_or(Error::NoDocumentFound)?;
        log::debug!("Document corners: {corners:?}");

        let mut warped = four_point_transform(image, &corners)?;
        if let Some(gamma) = self.options.gamma {
            warped = adjust_gamma(&warped, gamma)?;
        }

        let saved_to = match &self.options.save_path {
            Some(path) => {
                log::info!("saving scan to {}", path.display());
                warped.save(path)?;
                Some(path.clone())
            }
            None => None,
        };

        Ok(DocumentScan {
            image: warped,
            corners,
            saved_to,
        })
    }

    /// Returns the ordered corners of the page outline in `image` coordinates, or
    /// `None` when no contour simplifies to four vertices.
    #[instrument(skip(self, image), level = "debug")]
    pub fn find_document(&self, image: &DynamicImage) -> Result<Option<Quad>> {
        self.validate()?;
        let ScanOptions {
            working_height,
            blur_sigma,
            canny_low,
            canny_high,
            max_contours,
            epsilon_ratio,
            ..
        } = self.options;

        let ratio = if image.height() > working_height {
            image.height() as f32 / working_height as f32
        } else {
            1.0
        };
        let small = if ratio > 1.0 {
            let width = ((image.width() as f32 / ratio) as u32).max(1);
            image.resize_exact(width, working_height, FilterType::Triangle)
        } else {
            image.clone()
        };

        let gray = small.to_luma8();
        let blurred = gaussian_blur_f32(&gray, blur_sigma);
        let mut edges = canny(&blurred, canny_low, canny_high);
        // close single-pixel gaps at corners
        dilate_mut(&mut edges, Norm::LInf, 1);

        let mut outlines = find_contours::<i32>(&edges)
            .into_iter()
            .filter(|it| it.points.len() > 3)
            .map(|it| to_polygon(&it.points))
            .map(|poly| {
                let area = poly.unsigned_area();
                (poly, area)
            })
            .collect::<Vec<_>>();
        outlines.sort_by_key(|(_, area)| std::cmp::Reverse(FloatOrd(*area)));
        log::debug!("Found {} candidate outlines", outlines.len());

        Ok(outlines
            .into_iter()
            .take(max_contours)
            .find_map(|(poly, _)| {
                let perimeter = poly.exterior().euclidean_length();
                let approx = poly.simplify(&(epsilon_ratio * perimeter));
                // closed ring: four corners plus the repeated start
                let coords = &approx.exterior().0;
                if coords.len() != 5 {
                    return None;
                }
                let points = [coords[0], coords[1], coords[2], coords[3]]
                    .map(|c| (c.x * ratio, c.y * ratio));
                Some(order_corners(points))
            }))
    }

    fn validate(&self) -> Result<()> {
        let ScanOptions {
            working_height,
            blur_sigma,
            ..
        } = self.options;
        if working_height == 0 {
            return Err(Error::InvalidOption(
                "working height must be at least 1".to_string(),
            ));
        }
        if !blur_sigma.is_finite() || blur_sigma <= 0.0 {
            return Err(Error::InvalidOption(format!(
                "blur sigma must be positive, got {blur_sigma}"
            )));
        }
        Ok(())
    }
}

fn to_polygon(points: &[Point<i32>]) -> Polygon<f32> {
    let coords = points
        .iter()
        .map(|point| Coord {
            x: point.x as f32,
            y: point.y as f32,
        })
        .collect();
    Polygon::new(LineString::new(coords), vec![])
}

/// Orders four points as top-left, top-right, bottom-right, bottom-left.
///
/// Top-left has the smallest `x + y` and bottom-right the largest; top-right has
/// the smallest `y - x` and bottom-left the largest.
pub fn order_corners(points: [(f32, f32); 4]) -> Quad {
    let by = |key: fn(&(f32, f32)) -> f32, largest: bool| {
        let iter = points.iter().copied();
        let pick = if largest {
            iter.max_by_key(|p| FloatOrd(key(p)))
        } else {
            iter.min_by_key(|p| FloatOrd(key(p)))
        };
        pick.unwrap_or_default()
    };
    let sum = |p: &(f32, f32)| p.0 + p.1;
    let diff = |p: &(f32, f32)| p.1 - p.0;
    [
        by(sum, false),
        by(diff, false),
        by(sum, true),
        by(diff, true),
    ]
}

fn distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

/// Warps the quadrilateral `corners` of `image` onto an upright rectangle.
///
/// The rectangle is as wide as the longer of the top and bottom edges and as tall
/// as the longer of the left and right edges.
#[instrument(skip(image), level = "debug")]
pub fn four_point_transform(image: &DynamicImage, corners: &Quad) -> Result<DynamicImage> {
    let [tl, tr, br, bl] = *corners;
    let width = distance(br, bl).max(distance(tr, tl)) as u32;
    let height = distance(tr, br).max(distance(tl, bl)) as u32;
    if width == 0 || height == 0 {
        return Err(Error::NoDocumentFound);
    }

    let (right, bottom) = ((width - 1) as f32, (height - 1) as f32);
    let destination = [(0.0, 0.0), (right, 0.0), (right, bottom), (0.0, bottom)];
    let projection =
        Projection::from_control_points(*corners, destination).ok_or(Error::NoDocumentFound)?;

    let source = image.to_rgb8();
    let mut warped = RgbImage::new(width, height);
    warp_into(
        &source,
        &projection,
        Interpolation::Bilinear,
        Rgb([0, 0, 0]),
        &mut warped,
    );
    log::debug!("Warped document to {width}x{height}");
    Ok(DynamicImage::ImageRgb8(warped))
}

/// Applies `max * (v / max) ^ (1 / gamma)` to every colour channel.
///
/// Works on the image's own buffer, so alpha and bit depth are preserved.
pub fn adjust_gamma(image: &DynamicImage, gamma: f32) -> Result<DynamicImage> {
    if !gamma.is_finite() || gamma <= 0.0 {
        return Err(Error::InvalidOption(format!(
            "gamma must be positive, got {gamma}"
        )));
    }
    let inverse = 1.0 / gamma;
    let table: [u8; 256] =
        std::array::from_fn(|i| ((i as f32 / 255.0).powf(inverse) * 255.0).round() as u8);
    let curve8 = |c: u8| table[c as usize];
    let curve16 = |c: u16| ((c as f32 / 65535.0).powf(inverse) * 65535.0).round() as u16;
    let curve32 = |c: f32| c.max(0.0).powf(inverse);

    let mut adjusted = image.clone();
    match &mut adjusted {
        DynamicImage::ImageLuma8(buffer) => map_colour(buffer, curve8),
        DynamicImage::ImageLumaA8(buffer) => map_colour(buffer, curve8),
        DynamicImage::ImageRgb8(buffer) => map_colour(buffer, curve8),
        DynamicImage::ImageRgba8(buffer) => map_colour(buffer, curve8),
        DynamicImage::ImageLuma16(buffer) => map_colour(buffer, curve16),
        DynamicImage::ImageLumaA16(buffer) => map_colour(buffer, curve16),
        DynamicImage::ImageRgb16(buffer) => map_colour(buffer, curve16),
        DynamicImage::ImageRgba16(buffer) => map_colour(buffer, curve16),
        DynamicImage::ImageRgb32F(buffer) => map_colour(buffer, curve32),
        DynamicImage::ImageRgba32F(buffer) => map_colour(buffer, curve32),
        other => {
            let mut buffer = other.to_rgba32f();
            map_colour(&mut buffer, curve32);
            *other = DynamicImage::ImageRgba32F(buffer);
        }
    }
    Ok(adjusted)
}

fn map_colour<P: Pixel>(
    buffer: &mut ImageBuffer<P, Vec<P::Subpixel>>,
    curve: impl Fn(P::Subpixel) -> P::Subpixel,
) {
    for pixel in buffer.pixels_mut() {
        pixel.apply_without_alpha(&curve);
    }
}

#[cfg(test)]
mod tests {
    use image::GenericImageView;
    use imageproc::{drawing::draw_filled_rect_mut, rect::Rect};

    use super::*;

    fn page_photo() -> DynamicImage {
        let mut image = RgbImage::from_pixel(400, 300, Rgb([20, 20, 20]));
        draw_filled_rect_mut(
            &mut image,
            Rect::at(80, 60).of_size(240, 180),
            Rgb([230, 230, 230]),
        );
        DynamicImage::ImageRgb8(image)
    }

    fn assert_near(actual: (f32, f32), expected: (f32, f32)) {
        assert!(
            (actual.0 - expected.0).abs() <= 5.0 && (actual.1 - expected.1).abs() <= 5.0,
            "{actual:?} is not near {expected:?}"
        );
    }

    #[test]
    fn corners_are_ordered_clockwise_from_top_left() {
        let ordered = order_corners([(90.0, 10.0), (5.0, 95.0), (100.0, 100.0), (0.0, 0.0)]);
        assert_eq!(
            ordered,
            [(0.0, 0.0), (90.0, 10.0), (100.0, 100.0), (5.0, 95.0)]
        );
    }

    #[test]
    fn finds_bright_page_on_dark_background() {
        let scanner = DocumentScanner::new(ScanOptions::default());
        let corners = scanner
            .find_document(&page_photo())
            .unwrap()
            .expect("no page found");
        assert_near(corners[0], (80.0, 60.0));
        assert_near(corners[1], (319.0, 60.0));
        assert_near(corners[2], (319.0, 239.0));
        assert_near(corners[3], (80.0, 239.0));
    }

    #[test]
    fn blank_photo_has_no_document() {
        let blank = DynamicImage::ImageRgb8(RgbImage::from_pixel(200, 100, Rgb([128, 128, 128])));
        let scanner = DocumentScanner::new(ScanOptions::default());
        assert!(scanner.find_document(&blank).unwrap().is_none());
        assert!(matches!(scanner.scan(&blank), Err(Error::NoDocumentFound)));
    }

    #[test]
    fn transform_of_axis_aligned_quad_is_a_crop() {
        let photo = page_photo();
        let corners = [(80.0, 60.0), (319.0, 60.0), (319.0, 239.0), (80.0, 239.0)];
        let warped = four_point_transform(&photo, &corners).unwrap();
        assert_eq!(warped.dimensions(), (239, 179));
        let rgb = warped.to_rgb8();
        assert!(rgb.get_pixel(120, 90)[0] >= 228);
        assert!(rgb.get_pixel(120, 90)[0] <= 230);
    }

    #[test]
    fn degenerate_quad_is_rejected() {
        let photo = page_photo();
        let corners = [(10.0, 10.0); 4];
        assert!(four_point_transform(&photo, &corners).is_err());
    }

    #[test]
    fn unit_gamma_is_identity() {
        let photo = page_photo();
        let adjusted = adjust_gamma(&photo, 1.0).unwrap();
        assert_eq!(adjusted.to_rgb8(), photo.to_rgb8());
    }

    #[test]
    fn gamma_above_one_brightens() {
        let photo = page_photo();
        let adjusted = adjust_gamma(&photo, 2.0).unwrap().to_rgb8();
        assert!(adjusted.get_pixel(0, 0)[0] > 20);
        assert!(adjust_gamma(&photo, 0.0).is_err());
    }

    #[test]
    fn gamma_keeps_alpha_and_depth() {
        let rgba = image::RgbaImage::from_pixel(4, 4, image::Rgba([64, 64, 64, 100]));
        let adjusted = adjust_gamma(&DynamicImage::ImageRgba8(rgba), 2.0).unwrap();
        let DynamicImage::ImageRgba8(adjusted) = adjusted else {
            panic!("colour type changed");
        };
        let pixel = adjusted.get_pixel(1, 1);
        assert_eq!(pixel[3], 100);
        assert_eq!(pixel[0], 128);

        let deep = image::ImageBuffer::from_pixel(2, 2, image::Luma([16384u16]));
        let adjusted = adjust_gamma(&DynamicImage::ImageLuma16(deep), 2.0).unwrap();
        let DynamicImage::ImageLuma16(adjusted) = adjusted else {
            panic!("bit depth changed");
        };
        assert_eq!(adjusted.get_pixel(0, 0)[0], 32768);
    }

    #[test]
    fn zero_working_height_is_rejected() {
        let scanner = DocumentScanner::new(ScanOptions {
            working_height: 0,
            ..Default::default()
        });
        assert!(matches!(
            scanner.find_document(&page_photo()),
            Err(Error::InvalidOption(_))
        ));
        assert!(matches!(
            scanner.scan(&page_photo()),
            Err(Error::InvalidOption(_))
        ));
    }

    #[test]
    fn non_positive_blur_is_rejected() {
        for blur_sigma in [0.0, -1.0, f32::NAN] {
            let scanner = DocumentScanner::new(ScanOptions {
                blur_sigma,
                ..Default::default()
            });
            assert!(matches!(
                scanner.scan(&page_photo()),
                Err(Error::InvalidOption(_))
            ));
        }
    }
}

use image::{DynamicImage, Pixel, Rgb};
use ndarray::{Array3, Array4, Axis};
use tracing::instrument;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TensorLayout {
    /// `(batch, channel, height, width)`, as produced by OpenCV's dnn module.
    #[default]
    Nchw,
    /// `(batch, height, width, channel)`, as produced by TensorFlow exports.
    Nhwc,
}

#[instrument(level = "debug", skip(image))]
pub(crate) fn subtract_mean_normalize(
    image: &DynamicImage,
    mean_vals: &[f32; 3],
    norm_vals: &[f32; 3],
) -> Array3<f32> {
    let mut image = image.to_rgb32f();
    let norm = Rgb::<f32>(*norm_vals);
    let mean_vals = Rgb::<f32>(*mean_vals).map2(&norm, |c1, c2| c1 * c2);
    for pixel in image.pixels_mut() {
        *pixel = pixel
            .map2(&norm, |c1, c2| c1 * c2)
            .map2(&mean_vals, |c1, c2| c1 - c2);
    }
    Array3::<f32>::from_shape_fn(
        (3, image.height() as usize, image.width() as usize),
        |(ch, y, x)| image.get_pixel(x as u32, y as u32).channels()[ch],
    )
}

/// Builds a batch of one from a `(channel, height, width)` array.
pub(crate) fn to_blob(chw: Array3<f32>, layout: TensorLayout) -> Array4<f32> {
    let blob = chw.insert_axis(Axis(0));
    match layout {
        TensorLayout::Nchw => blob,
        TensorLayout::Nhwc => blob.permuted_axes([0, 2, 3, 1]).as_standard_layout().to_owned(),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Scale {
    pub factor_x: f32,
    pub factor_y: f32,
    pub target_width: u32,
    pub target_height: u32,
}

/// Computes the ratios between `image` and a `width` x `height` network input.
///
/// The network downsamples by 32, so dimensions are floored to a multiple of 32.
pub fn scale_exact(image: &DynamicImage, width: u32, height: u32) -> Scale {
    let target_width = floor_to_32(width, "width");
    let target_height = floor_to_32(height, "height");
    let scale_x = image.width() as f32 / target_width as f32;
    let scale_y = image.height() as f32 / target_height as f32;
    log::debug!("Resize will change image dimensions from (w: {}, h: {}) to (w: {target_width}, h: {target_height}) with scaling factor ({scale_x}, {scale_y}).", image.width(), image.height());
    Scale {
        target_width,
        target_height,
        factor_x: scale_x,
        factor_y: scale_y,
    }
}

fn floor_to_32(value: u32, what: &str) -> u32 {
    if value % 32 == 0 && value != 0 {
        return value;
    }
    let floored = (value / 32 * 32).max(32);
    log::debug!("Target {what} of {value} wasn't a multiple of 32, flooring to {floored}.");
    floored
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimensions_floor_to_multiples_of_32() {
        let image = DynamicImage::new_rgb8(640, 480);
        let scale = scale_exact(&image, 330, 20);
        assert_eq!((scale.target_width, scale.target_height), (320, 32));
        assert_eq!(scale.factor_x, 2.0);
        assert_eq!(scale.factor_y, 15.0);
    }

    #[test]
    fn normalization_subtracts_mean() {
        let image = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            2,
            2,
            Rgb([255, 0, 128]),
        ));
        let chw = subtract_mean_normalize(&image, &[0.5, 0.0, 0.5], &[2.0, 2.0, 2.0]);
        assert_eq!(chw.dim(), (3, 2, 2));
        assert!((chw[[0, 0, 0]] - 1.0).abs() < 1e-5);
        assert!(chw[[1, 1, 1]].abs() < 1e-5);
        assert!((chw[[2, 1, 0]] - (2.0 * 128.0 / 255.0 - 1.0)).abs() < 1e-5);
    }

    #[test]
    fn nhwc_blob_moves_channels_last() {
        let chw = Array3::from_shape_fn((3, 2, 4), |(c, y, x)| (c * 100 + y * 10 + x) as f32);
        let nchw = to_blob(chw.clone(), TensorLayout::Nchw);
        let nhwc = to_blob(chw, TensorLayout::Nhwc);
        assert_eq!(nchw.dim(), (1, 3, 2, 4));
        assert_eq!(nhwc.dim(), (1, 2, 4, 3));
        assert_eq!(nhwc[[0, 1, 3, 2]], 213.0);
    }
}

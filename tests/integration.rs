use std::path::PathBuf;

use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use imageproc::{drawing::draw_polygon_mut, point::Point};
use ndarray::{Array2, Array3};
use textscan::{
    locate, util::scale_exact, DetectionOptions, DocumentScanner, EastDetectorBuilder, Error,
    ScanOptions,
};

fn tmp_dir() -> PathBuf {
    let dir = PathBuf::from(std::env!("CARGO_TARGET_TMPDIR")).join("textscan");
    std::fs::create_dir_all(&dir).expect("Failed to create temp dir");
    dir
}

/// One row of confident cells shaped like a short line of text.
fn text_line_predictions() -> (Array2<f32>, Array3<f32>) {
    let mut scores = Array2::<f32>::zeros((80, 80));
    let mut geometry = Array3::<f32>::zeros((5, 80, 80));
    for x in 30..40 {
        scores[[20, x]] = 0.9;
        geometry[[0, 20, x]] = 4.0;
        geometry[[1, 20, x]] = 6.0;
        geometry[[2, 20, x]] = 4.0;
        geometry[[3, 20, x]] = 2.0;
    }
    (scores, geometry)
}

#[test]
fn synthetic_text_line_is_cropped_inside_image() {
    let _ = env_logger::builder().is_test(true).try_init();

    let image = DynamicImage::new_rgb8(640, 480);
    let (scores, geometry) = text_line_predictions();
    let save_path = tmp_dir().join("text_crop.png");
    let options = DetectionOptions {
        save_path: Some(save_path.clone()),
        ..Default::default()
    };
    let scale = scale_exact(&image, options.width, options.height);

    let crop = locate(&image, &scores, &geometry, scale, &options).expect("Failed to locate");

    assert_eq!(crop.candidates, 10);
    assert_eq!(crop.survivors, 5);
    assert_eq!(crop.bbox.to_array(), [122, 57, 482, 303]);
    assert!(crop.bbox.width() > 0 && crop.bbox.height() > 0);
    assert!(crop.bbox.x1 <= 640 && crop.bbox.y1 <= 480);
    assert_eq!(crop.image.dimensions(), (360, 246));
    assert_eq!(crop.saved_to.as_deref(), Some(save_path.as_path()));
    assert_eq!(
        image::open(&save_path).expect("Crop not written").dimensions(),
        (360, 246)
    );
}

#[test]
fn nothing_above_threshold_reports_no_text() {
    let image = DynamicImage::new_rgb8(320, 320);
    let (scores, geometry) = text_line_predictions();
    let options = DetectionOptions {
        min_confidence: 1.0,
        ..Default::default()
    };
    let scale = scale_exact(&image, options.width, options.height);
    let result = locate(&image, &scores, &geometry, scale, &options);
    assert!(matches!(result, Err(Error::NoTextDetected)));
}

#[test]
fn skewed_page_is_flattened() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut photo = RgbImage::from_pixel(640, 480, Rgb([30, 30, 30]));
    draw_polygon_mut(
        &mut photo,
        &[
            Point::new(100, 80),
            Point::new(520, 120),
            Point::new(480, 400),
            Point::new(140, 360),
        ],
        Rgb([220, 220, 210]),
    );
    let photo = DynamicImage::ImageRgb8(photo);
    let save_path = tmp_dir().join("scan.png");
    let scanner = DocumentScanner::new(ScanOptions {
        gamma: Some(1.2),
        save_path: Some(save_path.clone()),
        ..Default::default()
    });

    let scan = scanner.scan(&photo).expect("Failed to scan");

    let expected = [(100.0, 80.0), (520.0, 120.0), (480.0, 400.0), (140.0, 360.0)];
    for (actual, expected) in scan.corners.iter().zip(expected) {
        assert!(
            (actual.0 - expected.0).abs() <= 6.0 && (actual.1 - expected.1).abs() <= 6.0,
            "{actual:?} is not near {expected:?}"
        );
    }
    let (width, height) = scan.image.dimensions();
    assert!((width as i32 - 421).abs() <= 10, "width {width}");
    assert!((height as i32 - 282).abs() <= 10, "height {height}");
    assert!(save_path.exists());
}

// Needs the EAST weights exported to ONNX and a photo with one line of text.
#[test]
#[ignore]
fn east_model_finds_text() {
    let _ = env_logger::builder().is_test(true).try_init();

    let detector = EastDetectorBuilder::new()
        .model("tests/data/models/east.onnx")
        .build()
        .expect("Failed to build engine");
    let image = image::open("tests/data/test_image.png").expect("Failed to load test image");
    let crop = detector
        .detect(&image, &DetectionOptions::default())
        .expect("Failed detection");

    let (width, height) = image.dimensions();
    let [x0, y0, x1, y1] = crop.bbox.to_array();
    assert!(0 <= x0 && x0 < x1 && x1 <= width as i32);
    assert!(0 <= y0 && y0 < y1 && y1 <= height as i32);
}

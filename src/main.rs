use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use textscan::{
    DetectionOptions, DocumentScanner, EastDetectorBuilder, GeometryDecoding, ScanOptions,
    TensorLayout,
};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

#[derive(Parser)]
#[command(version, about = "Text region detection and document scanning")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Crop an image to its detected text region
    Detect(DetectArgs),
    /// Flatten the document in a photo
    Scan(ScanArgs),
}

#[derive(Args)]
struct DetectArgs {
    /// Path to input image
    image: PathBuf,
    /// Path to the EAST text detector model
    #[arg(long, default_value = "weights/frozen_east_text_detection.onnx")]
    model: PathBuf,
    /// Minimum probability required to inspect a region
    #[arg(short = 'c', long, default_value_t = 0.5)]
    min_confidence: f32,
    /// Resized image width (should be multiple of 32)
    #[arg(short, long, default_value_t = 320)]
    width: u32,
    /// Resized image height (should be multiple of 32)
    #[arg(short = 'e', long, default_value_t = 320)]
    height: u32,
    /// Overlap above which weaker boxes are suppressed
    #[arg(long, default_value_t = 0.3)]
    overlap: f32,
    /// Decode the full rotated rectangle of each detection
    #[arg(long)]
    rotated: bool,
    /// Model input is channels-last
    #[arg(long)]
    nhwc: bool,
    #[arg(long, default_value_t = 4)]
    threads: usize,
    /// Where to write the cropped region
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct ScanArgs {
    /// Path to input image
    image: PathBuf,
    /// Gamma correction applied after warping
    #[arg(short, long)]
    gamma: Option<f32>,
    /// Height of the copy used for edge detection
    #[arg(long, default_value_t = 500, value_parser = clap::value_parser!(u32).range(1..))]
    working_height: u32,
    /// Where to write the flattened document
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match Cli::parse().command {
        Command::Detect(args) => detect(args),
        Command::Scan(args) => scan(args),
    }
}

fn detect(args: DetectArgs) -> anyhow::Result<()> {
    let layout = if args.nhwc {
        TensorLayout::Nhwc
    } else {
        TensorLayout::Nchw
    };
    let detector = EastDetectorBuilder::new()
        .model(&args.model)
        .threads(args.threads)
        .input_layout(layout)
        .build()
        .with_context(|| format!("failed to load model {}", args.model.display()))?;

    let options = DetectionOptions {
        min_confidence: args.min_confidence,
        width: args.width,
        height: args.height,
        overlap_threshold: args.overlap,
        decoding: if args.rotated {
            GeometryDecoding::RotatedBounds
        } else {
            GeometryDecoding::EndCorner
        },
        save_path: args.output,
        ..Default::default()
    };
    let crop = detector
        .detect_file(&args.image, &options)
        .with_context(|| format!("text detection failed for {}", args.image.display()))?;

    log::debug!(
        "{} candidates, {} after suppression",
        crop.candidates,
        crop.survivors
    );
    println!("{:?}", crop.bbox.to_array());
    Ok(())
}

fn scan(args: ScanArgs) -> anyhow::Result<()> {
    let image = image::open(&args.image)
        .with_context(|| format!("failed to open {}", args.image.display()))?;
    let scanner = DocumentScanner::new(ScanOptions {
        gamma: args.gamma,
        working_height: args.working_height,
        save_path: args.output,
        ..Default::default()
    });
    let scan = scanner
        .scan(&image)
        .with_context(|| format!("document scan failed for {}", args.image.display()))?;

    println!("{}x{}", scan.image.width(), scan.image.height());
    Ok(())
}

use std::path::{Path, PathBuf};

use east_net::EastNet;
use image::{DynamicImage, GenericImageView};
use tracing::instrument;

pub mod crop;
pub mod decode;
pub mod document;
mod east_net;
mod error;
mod result;
pub mod suppression;
pub mod util;

pub use crop::CropMargin;
pub use decode::{GeometryDecoding, GeometryGrid, ScoreGrid};
pub use document::{DocumentScanner, ScanOptions};
pub use east_net::TensorNames;
pub use error::{Error, Result};
pub use result::*;
pub use util::TensorLayout;

pub use ort as runtime;

pub struct EastDetectorBuilder {
    threads: usize,
    model_path: Option<PathBuf>,
    names: TensorNames,
    layout: TensorLayout,
    max_side_len: u32,
    cache_path: Option<PathBuf>,
    execution_providers: Vec<ExecutionProvider>,
}

impl EastDetectorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn model(mut self, path: impl Into<PathBuf>) -> Self {
        self.model_path = Some(path.into());
        self
    }

    pub fn tensor_names(mut self, names: TensorNames) -> Self {
        self.names = names;
        self
    }

    pub fn input_layout(mut self, layout: TensorLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Largest input side the engine is optimised for. Only used by TensorRT.
    pub fn max_side_len(mut self, max_side_len: u32) -> Self {
        self.max_side_len = max_side_len;
        self
    }

    pub fn with_engine_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    pub fn with_execution_providers(
        mut self,
        providers: impl IntoIterator<Item = ExecutionProvider>,
    ) -> Self {
        self.execution_providers = providers.into_iter().collect();
        self
    }

    #[instrument(skip(self))]
    pub fn build(mut self) -> ort::Result<EastDetector> {
        let model_path = self
            .model_path
            .take()
            .unwrap_or_else(|| "weights/frozen_east_text_detection.onnx".into());
        log::info!("loading EAST text detector from {}", model_path.display());
        let net = EastNet::init(
            model_path,
            self.threads,
            self.names,
            self.layout,
            self.max_side_len,
            &self.execution_providers,
            self.cache_path,
        )?;
        Ok(EastDetector { net })
    }
}

impl Default for EastDetectorBuilder {
    fn default() -> Self {
        Self {
            threads: 4,
            model_path: None,
            names: TensorNames::default(),
            layout: TensorLayout::default(),
            max_side_len: 1024,
            cache_path: None,
            execution_providers: DEFAULT_PROVIDERS.to_vec(),
        }
    }
}

pub struct EastDetector {
    net: EastNet,
}

impl EastDetector {
    /// Finds the text region of `image` and crops to it.
    #[instrument(skip(self, image))]
    pub fn detect(&self, image: &DynamicImage, options: &DetectionOptions) -> Result<TextCrop> {
        let scale = util::scale_exact(image, options.width, options.height);
        let (scores, geometry) = self.net.predict(image, scale)?;
        locate(image, &scores, &geometry, scale, options)
    }

    pub fn detect_file(
        &self,
        path: impl AsRef<Path>,
        options: &DetectionOptions,
    ) -> Result<TextCrop> {
        let image = image::open(path.as_ref())?;
        self.detect(&image, options)
    }
}

/// Everything after the forward pass: filter, decode, suppress, aggregate and crop.
#[instrument(skip_all, level = "debug")]
pub fn locate(
    image: &DynamicImage,
    scores: &ScoreGrid,
    geometry: &GeometryGrid,
    scale: util::Scale,
    options: &DetectionOptions,
) -> Result<TextCrop> {
    let candidates = decode::decode_predictions(
        scores.view(),
        geometry.view(),
        options.min_confidence,
        options.decoding,
    )?;
    let survivors = suppression::non_max_suppression(&candidates, options.overlap_threshold);
    let enclosing = crop::enclosing_box(&survivors, scale)?;

    let (width, height) = image.dimensions();
    let bbox = crop::apply_margin(enclosing, width, height, options.margin);
    log::info!("text bbox {:?} in {width}x{height} image", bbox.to_array());

    let cropped = crop::crop_to(image, bbox);
    let saved_to = match &options.save_path {
        Some(path) => {
            log::info!("saving crop to {}", path.display());
            cropped.save(path)?;
            Some(path.clone())
        }
        None => None,
    };

    Ok(TextCrop {
        image: cropped,
        bbox,
        candidates: candidates.len(),
        survivors: survivors.len(),
        saved_to,
    })
}

#[derive(Debug, Clone)]
pub struct DetectionOptions {
    pub min_confidence: f32,
    pub width: u32,
    pub height: u32,
    pub overlap_threshold: f32,
    pub decoding: GeometryDecoding,
    pub margin: CropMargin,
    pub save_path: Option<PathBuf>,
}

impl Default for DetectionOptions {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            width: 320,
            height: 320,
            overlap_threshold: 0.3,
            decoding: GeometryDecoding::default(),
            margin: CropMargin::default(),
            save_path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionProvider {
    Default,
    #[cfg(feature = "tensorrt")]
    TensorRT,
    #[cfg(feature = "coreml")]
    CoreML,
    #[cfg(feature = "cuda")]
    Cuda,
    #[cfg(feature = "directml")]
    DirectML,
}

const DEFAULT_PROVIDERS: &[ExecutionProvider] = &[
    #[cfg(feature = "tensorrt")]
    ExecutionProvider::TensorRT,
    #[cfg(feature = "coreml")]
    ExecutionProvider::CoreML,
    #[cfg(feature = "directml")]
    ExecutionProvider::DirectML,
    #[cfg(feature = "cuda")]
    ExecutionProvider::Cuda,
    ExecutionProvider::Default,
];

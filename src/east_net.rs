use std::{path::PathBuf, time::Instant};

use image::{imageops::FilterType, DynamicImage};
use ndarray::{Array3, ArrayViewD, Axis, Ix4};
use ort::{inputs, ExecutionProviderDispatch, GraphOptimizationLevel, Session, SessionOutputs};
use tracing::instrument;

use crate::{
    decode::{GeometryGrid, ScoreGrid, GEOMETRY_CHANNELS},
    util::{self, subtract_mean_normalize, to_blob, TensorLayout},
    Error, ExecutionProvider, Result,
};

// ImageNet channel means in 0..255, applied without scaling.
const MEAN_VALUES: [f32; 3] = [123.68 / 255.0, 116.78 / 255.0, 103.94 / 255.0];
const NORM_VALUES: [f32; 3] = [255.0, 255.0, 255.0];

#[derive(Debug, Clone)]
pub struct TensorNames {
    pub input: String,
    pub scores: String,
    pub geometry: String,
}

impl Default for TensorNames {
    fn default() -> Self {
        Self {
            input: "input_images:0".to_string(),
            scores: "feature_fusion/Conv_7/Sigmoid:0".to_string(),
            geometry: "feature_fusion/concat_3:0".to_string(),
        }
    }
}

pub struct EastNet {
    session: Session,
    names: TensorNames,
    layout: TensorLayout,
}

#[cfg(feature = "tensorrt")]
fn setup_tensorrt(
    cache_path: PathBuf,
    input: &str,
    layout: TensorLayout,
    max_side_len: u32,
) -> ExecutionProviderDispatch {
    use ort::TensorRTExecutionProvider;

    let shape = |side: u32| match layout {
        TensorLayout::Nchw => format!("{input}:1x3x{side}x{side}"),
        TensorLayout::Nhwc => format!("{input}:1x{side}x{side}x3"),
    };
    TensorRTExecutionProvider::default()
        .with_profile_min_shapes(shape(32))
        .with_profile_max_shapes(shape(max_side_len))
        .with_profile_opt_shapes(shape(320))
        .with_engine_cache(true)
        .with_engine_cache_path(cache_path.to_string_lossy())
        .with_timing_cache(true)
        .with_builder_optimization_level(5)
        .with_detailed_build_log(true)
        .build()
}

#[cfg(feature = "cuda")]
fn setup_cuda() -> ExecutionProviderDispatch {
    use ort::CUDAExecutionProvider;

    CUDAExecutionProvider::default().build()
}

#[cfg(feature = "directml")]
fn setup_directml() -> ExecutionProviderDispatch {
    use ort::DirectMLExecutionProvider;

    DirectMLExecutionProvider::default().build()
}

#[cfg(feature = "coreml")]
fn setup_coreml() -> ExecutionProviderDispatch {
    use ort::CoreMLExecutionProvider;

    CoreMLExecutionProvider::default().build()
}

impl EastNet {
    #[instrument(level = "debug", skip(execution_providers))]
    pub fn init(
        path: PathBuf,
        num_threads: usize,
        names: TensorNames,
        layout: TensorLayout,
        max_side_len: u32,
        execution_providers: &[ExecutionProvider],
        cache_path: Option<PathBuf>,
    ) -> ort::Result<Self> {
        #[cfg(feature = "directml")]
        let parallel = !execution_providers.contains(&ExecutionProvider::DirectML);
        #[cfg(not(feature = "directml"))]
        let parallel = true;

        let cache_path = cache_path.unwrap_or_else(|| {
            path.parent()
                .map(|dir| dir.join(".cache"))
                .unwrap_or_else(|| PathBuf::from(".cache"))
        });
        let execution_providers = execution_providers
            .iter()
            .filter_map(|provider| -> Option<ExecutionProviderDispatch> {
                match provider {
                    ExecutionProvider::Default => None,
                    #[cfg(feature = "tensorrt")]
                    ExecutionProvider::TensorRT => Some(setup_tensorrt(
                        cache_path.clone(),
                        &names.input,
                        layout,
                        max_side_len,
                    )),
                    #[cfg(feature = "coreml")]
                    ExecutionProvider::CoreML => Some(setup_coreml()),
                    #[cfg(feature = "cuda")]
                    ExecutionProvider::Cuda => Some(setup_cuda()),
                    #[cfg(feature = "directml")]
                    ExecutionProvider::DirectML => Some(setup_directml()),
                }
            })
            .collect::<Vec<_>>();
        log::trace!(
            "Engine cache at {} for inputs up to {max_side_len}px",
            cache_path.display()
        );

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_memory_pattern(parallel)?
            .with_parallel_execution(parallel)?
            .with_inter_threads(num_threads)?
            .with_intra_threads(num_threads)?
            .with_execution_providers(execution_providers)?
            .commit_from_file(path)?;

        log::debug!("EAST session inputs: {:?}", session.inputs);
        log::debug!("EAST session outputs: {:?}", session.outputs);

        Ok(Self {
            session,
            names,
            layout,
        })
    }

    /// Runs the network on `image` resized to the target size in `scale`.
    #[instrument(skip(self, image), level = "debug")]
    pub fn predict(
        &self,
        image: &DynamicImage,
        scale: util::Scale,
    ) -> Result<(ScoreGrid, GeometryGrid)> {
        let image =
            image.resize_exact(scale.target_width, scale.target_height, FilterType::Triangle);
        #[cfg(feature = "debug")]
        image.save("debug/east_input.png")?;

        let blob = to_blob(
            subtract_mean_normalize(&image, &MEAN_VALUES, &NORM_VALUES),
            self.layout,
        );

        let start = Instant::now();
        let outputs = self
            .session
            .run(inputs![self.names.input.as_str() => blob]?)?;
        log::info!(
            "text detection took {:.6} seconds",
            start.elapsed().as_secs_f64()
        );

        let scores = extract_grid(&outputs, &self.names.scores, 1)?.index_axis_move(Axis(0), 0);
        let geometry = extract_grid(&outputs, &self.names.geometry, GEOMETRY_CHANNELS)?;
        log::trace!("Score grid {:?}, geometry grid {:?}", scores.dim(), geometry.dim());
        Ok((scores, geometry))
    }
}

fn extract_grid(outputs: &SessionOutputs, name: &str, channels: usize) -> Result<Array3<f32>> {
    let tensor = outputs
        .get(name)
        .ok_or_else(|| Error::UnexpectedOutput(format!("missing output {name}")))?
        .try_extract_tensor::<f32>()?;
    to_grid(tensor, name, channels)
}

/// Reads a 4D output as `(channel, row, col)`, accepting either channel position
/// since the layout of converted graphs varies.
fn to_grid(tensor: ArrayViewD<f32>, name: &str, channels: usize) -> Result<Array3<f32>> {
    let tensor = tensor
        .into_dimensionality::<Ix4>()
        .map_err(|err| Error::UnexpectedOutput(format!("{name}: {err}")))?;
    let batch = tensor.index_axis(Axis(0), 0);

    if batch.len_of(Axis(0)) == channels {
        Ok(batch.to_owned())
    } else if batch.len_of(Axis(2)) == channels {
        Ok(batch.permuted_axes([2, 0, 1]).to_owned())
    } else {
        Err(Error::UnexpectedOutput(format!(
            "{name} has shape {:?}, expected {channels} channels",
            tensor.dim()
        )))
    }
}

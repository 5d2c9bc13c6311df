use std::path::Path;

use image::{imageops, imageops::FilterType, RgbImage};
use ndarray::prelude::*;
use nshare::AsNdarray3;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::TensorRef;
#[cfg(any(feature = "cuda", feature = "tensorrt"))]
use ort::execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider};
use rayon::prelude::*;
use tracing::info;

use crate::{
    errors::{Result, SamAreaError},
    inference::{Mask, PointPrompt, Prediction},
    traits::MaskPredictor,
};

/// Side length of the square SAM encoder input.
pub const SAM_INPUT_SIZE: u32 = 1024;
/// Side length of the low-resolution mask prompt accepted by the decoder.
const SAM_MASK_INPUT_SIZE: usize = 256;
const PIXEL_MEAN: [f32; 3] = [123.675, 116.28, 103.53];
const PIXEL_STD: [f32; 3] = [58.395, 57.12, 57.375];
/// Decoder logits above this are foreground.
const MASK_THRESHOLD: f32 = 0.0;

/// Image embedding cached by `set_image`, together with the geometry needed to
/// map prompts into model space.
struct ImageState {
    embeddings: Array4<f32>,
    width: u32,
    height: u32,
}

/// Segment Anything predictor backed by an ONNX encoder/decoder pair.
pub struct SamPredictor {
    encoder: Session,
    decoder: Session,
    encoder_input: String,
    encoder_output: String,
    state: Option<ImageState>,
}

impl SamPredictor {
    pub fn new(encoder_path: &Path, decoder_path: &Path) -> Result<Self> {
        let encoder = build_session(encoder_path)?;
        let decoder = build_session(decoder_path)?;

        let encoder_input = encoder
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| {
                SamAreaError::model(
                    format!("encoder input lookup: {}", encoder_path.display()),
                    "encoder declares no inputs",
                )
            })?;
        let encoder_output = encoder
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| {
                SamAreaError::model(
                    format!("encoder output lookup: {}", encoder_path.display()),
                    "encoder declares no outputs",
                )
            })?;

        Ok(Self {
            encoder,
            decoder,
            encoder_input,
            encoder_output,
            state: None,
        })
    }

    fn encode(&mut self, tensor: &Array4<f32>) -> Result<Array4<f32>> {
        let outputs = self.encoder.run(ort::inputs![
            self.encoder_input.as_str() => TensorRef::from_array_view(tensor)?
        ])?;
        Ok(outputs[self.encoder_output.as_str()]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix4>()?
            .to_owned())
    }
}

fn build_session(path: &Path) -> Result<Session> {
    let builder = Session::builder()
        .map_err(|e| SamAreaError::model("session builder initialization", e.to_string()))?;

    #[cfg(any(feature = "cuda", feature = "tensorrt"))]
    let builder = builder
        .with_execution_providers([
            TensorRTExecutionProvider::default().build(),
            CUDAExecutionProvider::default().build(),
        ])
        .map_err(|e| SamAreaError::model("execution provider setup", e.to_string()))?;

    builder
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| SamAreaError::model("optimization level setup", e.to_string()))?
        .with_memory_pattern(true)
        .map_err(|e| SamAreaError::model("memory pattern setup", e.to_string()))?
        .commit_from_file(path)
        .map_err(|e| {
            SamAreaError::model(format!("model file load: {}", path.display()), e.to_string())
        })
}

/// Load `count` independent predictors from the same checkpoint pair.
pub fn load_predictors(
    encoder_path: &Path,
    decoder_path: &Path,
    count: usize,
) -> Result<Vec<Box<dyn MaskPredictor>>> {
    info!(
        count,
        encoder = %encoder_path.display(),
        decoder = %decoder_path.display(),
        "loading SAM predictors"
    );
    (0..count)
        .into_par_iter()
        .map(|_| {
            SamPredictor::new(encoder_path, decoder_path)
                .map(|predictor| Box::new(predictor) as Box<dyn MaskPredictor>)
        })
        .collect()
}

impl MaskPredictor for SamPredictor {
    fn set_image(&mut self, image: &RgbImage) -> Result<()> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(SamAreaError::Validation {
                field: "image".to_string(),
                reason: "has no pixels".to_string(),
            });
        }

        self.state = None;
        let tensor = preprocess(image, SAM_INPUT_SIZE);
        let embeddings = self.encode(&tensor)?;
        self.state = Some(ImageState {
            embeddings,
            width,
            height,
        });
        Ok(())
    }

    fn predict(&mut self, prompt: &PointPrompt, multimask: bool) -> Result<Prediction> {
        let state = self.state.as_ref().ok_or_else(|| SamAreaError::Inference {
            message: "predict called before set_image".to_string(),
        })?;

        let (coords, labels) = encode_prompt(prompt, state.width, state.height, SAM_INPUT_SIZE);
        let mask_input =
            Array4::<f32>::zeros((1, 1, SAM_MASK_INPUT_SIZE, SAM_MASK_INPUT_SIZE));
        let has_mask_input = Array1::<f32>::zeros(1);
        let orig_im_size = array![state.height as f32, state.width as f32];

        let outputs = self.decoder.run(ort::inputs![
            "image_embeddings" => TensorRef::from_array_view(&state.embeddings)?,
            "point_coords" => TensorRef::from_array_view(&coords)?,
            "point_labels" => TensorRef::from_array_view(&labels)?,
            "mask_input" => TensorRef::from_array_view(&mask_input)?,
            "has_mask_input" => TensorRef::from_array_view(&has_mask_input)?,
            "orig_im_size" => TensorRef::from_array_view(&orig_im_size)?,
        ])?;

        let logits = outputs["masks"]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix4>()?
            .to_owned();
        let scores = outputs["iou_predictions"]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix2>()?
            .to_owned();

        postprocess(logits.view(), scores.view(), multimask)
    }
}

/// Resize so the longest side is `input_size`, normalize per channel, and pad
/// bottom/right with zeros into a `1x3xNxN` tensor.
pub fn preprocess(image: &RgbImage, input_size: u32) -> Array4<f32> {
    let (width, height) = image.dimensions();
    let (new_w, new_h) = resized_dimensions(width, height, input_size);
    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    // (channel, height, width)
    let pixels = resized.as_ndarray3();
    let size = input_size as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (c, (mean, std)) in PIXEL_MEAN.iter().zip(PIXEL_STD.iter()).enumerate() {
        tensor
            .slice_mut(s![0, c, ..new_h as usize, ..new_w as usize])
            .zip_mut_with(&pixels.index_axis(Axis(0), c), |dst, &src| {
                *dst = (f32::from(src) - mean) / std;
            });
    }
    tensor
}

/// Dimensions after scaling the longest side to `target`, rounded to nearest.
pub fn resized_dimensions(width: u32, height: u32, target: u32) -> (u32, u32) {
    let scale = target as f32 / width.max(height) as f32;
    let new_w = ((width as f32 * scale).round() as u32).clamp(1, target);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, target);
    (new_w, new_h)
}

/// Point coordinates in model space plus the padding point the decoder expects
/// when no box prompt is given.
pub fn encode_prompt(
    prompt: &PointPrompt,
    width: u32,
    height: u32,
    input_size: u32,
) -> (Array3<f32>, Array2<f32>) {
    let scale = input_size as f32 / width.max(height) as f32;
    let coords = array![[[prompt.x * scale, prompt.y * scale], [0.0, 0.0]]];
    let labels = array![[prompt.label.as_f32(), -1.0]];
    (coords, labels)
}

/// Threshold decoder logits into boolean masks.
///
/// Multimask decoders emit the single-mask token first; when four candidates
/// come back for a multimask request that first one is dropped.
pub fn postprocess(
    logits: ArrayView4<f32>,
    scores: ArrayView2<f32>,
    multimask: bool,
) -> Result<Prediction> {
    let candidates = logits.shape()[1];
    if scores.shape()[1] != candidates {
        return Err(SamAreaError::Inference {
            message: format!(
                "decoder returned {candidates} masks but {} scores",
                scores.shape()[1]
            ),
        });
    }

    let range = match (multimask, candidates) {
        (true, 4) => 1..4,
        (false, n) if n > 1 => 0..1,
        (_, n) => 0..n,
    };

    let masks = range
        .clone()
        .map(|i| {
            logits
                .index_axis(Axis(0), 0)
                .index_axis(Axis(0), i)
                .mapv(|logit| logit > MASK_THRESHOLD)
        })
        .collect::<Vec<Mask>>();
    let scores = range.map(|i| scores[[0, i]]).collect();

    Ok(Prediction { masks, scores })
}

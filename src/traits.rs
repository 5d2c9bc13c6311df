use async_trait::async_trait;
use image::RgbImage;

use crate::errors::Result;
use crate::inference::{PointPrompt, Prediction};
use crate::persistence::DetectionRecord;

/// A promptable segmentation model.
///
/// The predictor is stateful: `set_image` computes and caches the image
/// embedding, and every `predict` call decodes masks against the cached
/// image. A predictor must therefore never be shared between concurrent
/// requests; the inference pool hands each one out exclusively.
pub trait MaskPredictor: Send {
    /// Compute and cache the embedding for `image`.
    fn set_image(&mut self, image: &RgbImage) -> Result<()>;

    /// Decode candidate masks for `prompt` against the cached image.
    ///
    /// With `multimask` set, several candidates are returned; masks and
    /// scores have the same length and order.
    fn predict(&mut self, prompt: &PointPrompt, multimask: bool) -> Result<Prediction>;
}

/// Append-only sink for detection results.
#[async_trait]
pub trait DetectionStore: Send + Sync {
    async fn record_detection(&self, record: &DetectionRecord) -> Result<()>;
}

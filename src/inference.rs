use std::sync::Arc;

use image::RgbImage;
use ndarray::Array2;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error};

use crate::errors::{Result, SamAreaError};
use crate::traits::MaskPredictor;

/// Per-pixel membership map, shape `(height, width)`.
pub type Mask = Array2<bool>;

/// Placeholder prompt used when the client does not send a point.
pub const DEFAULT_PROMPT_POINT: (f32, f32) = (200.0, 200.0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointLabel {
    Background,
    Foreground,
}

impl PointLabel {
    pub const fn as_f32(self) -> f32 {
        match self {
            Self::Background => 0.0,
            Self::Foreground => 1.0,
        }
    }
}

/// A single point prompt in original image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointPrompt {
    pub x: f32,
    pub y: f32,
    pub label: PointLabel,
}

impl PointPrompt {
    pub const fn foreground(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            label: PointLabel::Foreground,
        }
    }
}

impl Default for PointPrompt {
    fn default() -> Self {
        Self::foreground(DEFAULT_PROMPT_POINT.0, DEFAULT_PROMPT_POINT.1)
    }
}

/// Candidate masks with their confidence scores, in matching order.
#[derive(Debug, Clone, Default)]
pub struct Prediction {
    pub masks: Vec<Mask>,
    pub scores: Vec<f32>,
}

impl Prediction {
    /// The mask callers consume. No ranking by score is applied.
    pub fn first_mask(&self) -> Option<&Mask> {
        self.masks.first()
    }
}

/// Set `image` on the predictor and request multiple candidates for `prompt`.
pub fn segment<P>(predictor: &mut P, image: &RgbImage, prompt: &PointPrompt) -> Result<Prediction>
where
    P: MaskPredictor + ?Sized,
{
    predictor.set_image(image)?;
    let prediction = predictor.predict(prompt, true)?;
    if prediction.masks.len() != prediction.scores.len() {
        return Err(SamAreaError::Inference {
            message: format!(
                "predictor returned {} masks but {} scores",
                prediction.masks.len(),
                prediction.scores.len()
            ),
        });
    }
    Ok(prediction)
}

/// Number of foreground pixels. Unitless.
pub fn area(mask: &Mask) -> f64 {
    mask.iter().filter(|&&inside| inside).count() as f64
}

/// Bounded pool of independent predictors.
///
/// Each request checks out one predictor for the duration of its
/// `set_image` + `predict` pair, so the per-image state inside a predictor is
/// never touched by two requests at once. Inference runs on tokio's blocking
/// threads.
pub struct InferencePool {
    idle: Arc<Mutex<Vec<Box<dyn MaskPredictor>>>>,
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl InferencePool {
    pub fn new(predictors: Vec<Box<dyn MaskPredictor>>) -> Result<Self> {
        if predictors.is_empty() {
            return Err(SamAreaError::Configuration {
                message: "inference pool needs at least one predictor".to_string(),
            });
        }
        let capacity = predictors.len();
        Ok(Self {
            idle: Arc::new(Mutex::new(predictors)),
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        })
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run [`segment`] on a checked-out predictor.
    ///
    /// The predictor and its permit travel into the blocking task, so they are
    /// returned to the pool even if the caller stops waiting.
    pub async fn segment(&self, image: RgbImage, prompt: PointPrompt) -> Result<Prediction> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| SamAreaError::Inference {
                message: format!("inference pool closed: {e}"),
            })?;

        let predictor = self.idle.lock().pop().ok_or_else(|| SamAreaError::Inference {
            message: "no idle predictor despite a free permit".to_string(),
        })?;
        debug!(idle = self.idle.lock().len(), "predictor checked out");

        let mut checkout = Checkout {
            predictor: Some(predictor),
            permit: Some(permit),
            idle: Arc::clone(&self.idle),
        };
        let task = tokio::task::spawn_blocking(move || match checkout.predictor.as_deref_mut() {
            Some(predictor) => segment(predictor, &image, &prompt),
            None => Err(SamAreaError::Inference {
                message: "checkout lost its predictor".to_string(),
            }),
        });

        task.await.map_err(|e| SamAreaError::Inference {
            message: format!("inference task failed: {e}"),
        })?
    }
}

/// A predictor on loan from the pool, together with the permit that covers it.
///
/// Dropping it hands both back. A predictor that panicked mid-inference may
/// hold half-written state, so it is discarded instead and its permit
/// forgotten; the pool shrinks rather than offering a permit with no
/// predictor behind it.
struct Checkout {
    predictor: Option<Box<dyn MaskPredictor>>,
    permit: Option<OwnedSemaphorePermit>,
    idle: Arc<Mutex<Vec<Box<dyn MaskPredictor>>>>,
}

impl Drop for Checkout {
    fn drop(&mut self) {
        let permit = self.permit.take();
        match self.predictor.take() {
            Some(predictor) if !std::thread::panicking() => {
                // Push before releasing so the next permit holder finds it.
                self.idle.lock().push(predictor);
                drop(permit);
            }
            _ => {
                if let Some(permit) = permit {
                    permit.forget();
                }
                error!("inference task panicked, predictor dropped from pool");
            }
        }
    }
}

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::errors::{Result, SamAreaError};
use crate::inference::{area, InferencePool, PointPrompt};
use crate::persistence::DetectionRecord;
use crate::storage::UploadDir;
use crate::traits::DetectionStore;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Pushed to real-time subscribers after every recorded detection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionEvent {
    pub r#type: &'static str,
    pub filename: String,
    pub area: f64,
    pub created_at: DateTime<Utc>,
}

impl From<&DetectionRecord> for DetectionEvent {
    fn from(record: &DetectionRecord) -> Self {
        Self {
            r#type: "detection",
            filename: record.filename.clone(),
            area: record.area,
            created_at: record.created_at,
        }
    }
}

/// Upload use case: store the image, segment it, record the area.
pub struct DetectionService {
    uploads: UploadDir,
    pool: Arc<InferencePool>,
    store: Arc<dyn DetectionStore>,
    events: broadcast::Sender<DetectionEvent>,
}

impl DetectionService {
    pub fn new(uploads: UploadDir, pool: Arc<InferencePool>, store: Arc<dyn DetectionStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            uploads,
            pool,
            store,
            events,
        }
    }

    pub fn uploads(&self) -> &UploadDir {
        &self.uploads
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DetectionEvent> {
        self.events.subscribe()
    }

    /// Number of live real-time subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    /// Run the full upload pipeline for one image.
    ///
    /// The file is written before decoding, so an unreadable image still
    /// leaves its upload on disk. Nothing is recorded unless segmentation
    /// succeeds.
    pub async fn detect(
        &self,
        filename: &str,
        bytes: &[u8],
        prompt: PointPrompt,
    ) -> Result<DetectionRecord> {
        let path = self.uploads.save(filename, bytes).await?;

        let data = bytes.to_vec();
        let display_path = path.display().to_string();
        let image = tokio::task::spawn_blocking(move || image::load_from_memory(&data))
            .await
            .map_err(|e| SamAreaError::Inference {
                message: format!("image decode task failed: {e}"),
            })?
            .map_err(|e| SamAreaError::ImageProcessing {
                path: display_path,
                operation: "image decode".to_string(),
                source: Box::new(e),
            })?
            .into_rgb8();
        debug!(filename, width = image.width(), height = image.height(), "image decoded");

        let prediction = self.pool.segment(image, prompt).await?;
        let mask = prediction.first_mask().ok_or_else(|| SamAreaError::Inference {
            message: "predictor returned no masks".to_string(),
        })?;

        let record = DetectionRecord::new(filename, area(mask));
        self.store.record_detection(&record).await?;
        info!(filename, area = record.area, "detection complete");

        // No subscribers is not an error.
        let _ = self.events.send(DetectionEvent::from(&record));
        Ok(record)
    }
}

use std::sync::Arc;

use crate::service::DetectionService;

/// Shared state for the axum handlers.
#[derive(Clone)]
pub struct HttpState {
    /// Upload use case; also owns the upload directory and the event channel.
    pub detection: Arc<DetectionService>,
    /// Largest accepted request body, in bytes.
    pub max_upload_bytes: usize,
}

impl HttpState {
    pub fn new(detection: Arc<DetectionService>, max_upload_bytes: usize) -> Self {
        Self {
            detection,
            max_upload_bytes,
        }
    }
}

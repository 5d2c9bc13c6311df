pub mod checkpoint;
pub mod config;
pub mod errors;
pub mod http;
pub mod inference;
pub mod model;
pub mod persistence;
pub mod report;
pub mod service;
pub mod storage;
pub mod traits;

pub mod mocks;

pub use config::Config;
pub use errors::{Result, SamAreaError};
pub use inference::{area, segment, InferencePool, Mask, PointPrompt, Prediction};
pub use model::SamPredictor;
pub use persistence::{DetectionRecord, PostgresDetectionStore};
pub use service::{DetectionEvent, DetectionService};
pub use traits::*;

use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use parking_lot::Mutex;

use crate::errors::{Result, SamAreaError};
use crate::inference::{Mask, PointPrompt, Prediction};
use crate::persistence::DetectionRecord;
use crate::traits::{DetectionStore, MaskPredictor};

/// Half-width of the square the mock "segments" around the prompt point.
const MOCK_REGION_RADIUS: usize = 10;

/// Test predictor that marks a square around the prompt point.
///
/// It is stateful like the real predictor: `predict` fails unless
/// `set_image` ran first, and masks are sized for the last image set.
#[derive(Debug, Clone, Default)]
pub struct MockPredictor {
    image_size: Option<(u32, u32)>,
    delay: Option<Duration>,
    calls: usize,
}

impl MockPredictor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep between `set_image` and returning, to widen race windows.
    pub const fn with_delay_ms(mut self, millis: u64) -> Self {
        self.delay = Some(Duration::from_millis(millis));
        self
    }

    /// Number of completed `predict` calls.
    pub const fn calls(&self) -> usize {
        self.calls
    }
}

impl MaskPredictor for MockPredictor {
    fn set_image(&mut self, image: &RgbImage) -> Result<()> {
        self.image_size = Some(image.dimensions());
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        Ok(())
    }

    fn predict(&mut self, prompt: &PointPrompt, multimask: bool) -> Result<Prediction> {
        let (width, height) = self.image_size.ok_or_else(|| SamAreaError::Inference {
            message: "predict called before set_image".to_string(),
        })?;
        let (width, height) = (width as usize, height as usize);

        let mut region = Mask::from_elem((height, width), false);
        let cx = prompt.x.max(0.0) as usize;
        let cy = prompt.y.max(0.0) as usize;
        if cx < width && cy < height {
            let rows = cy.saturating_sub(MOCK_REGION_RADIUS)..(cy + MOCK_REGION_RADIUS).min(height);
            let cols = cx.saturating_sub(MOCK_REGION_RADIUS)..(cx + MOCK_REGION_RADIUS).min(width);
            for y in rows {
                for x in cols.clone() {
                    region[[y, x]] = true;
                }
            }
        }

        self.calls += 1;
        let prediction = if multimask {
            Prediction {
                masks: vec![
                    region,
                    Mask::from_elem((height, width), false),
                    Mask::from_elem((height, width), true),
                ],
                scores: vec![0.9, 0.5, 0.1],
            }
        } else {
            Prediction {
                masks: vec![region],
                scores: vec![0.9],
            }
        };
        Ok(prediction)
    }
}

/// In-memory [`DetectionStore`] for tests.
#[derive(Debug, Default)]
pub struct InMemoryDetectionStore {
    records: Mutex<Vec<DetectionRecord>>,
    fail: bool,
}

impl InMemoryDetectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every insert fails, as if the database were down.
    pub fn failing() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn records(&self) -> Vec<DetectionRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl DetectionStore for InMemoryDetectionStore {
    async fn record_detection(&self, record: &DetectionRecord) -> Result<()> {
        if self.fail {
            return Err(SamAreaError::filesystem(
                "detections",
                "detection insert",
                std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "store unavailable"),
            ));
        }
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// Encode a solid-colour RGB image of the given size as PNG.
pub fn png_bytes(width: u32, height: u32) -> Result<Vec<u8>> {
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([34, 139, 34])));
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Png)?;
    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_region_is_clipped_to_image() -> Result<()> {
        let mut mock = MockPredictor::new();
        mock.set_image(&RgbImage::new(15, 12))?;

        let prediction = mock.predict(&PointPrompt::foreground(2.0, 3.0), true)?;
        let mask = &prediction.masks[0];
        assert_eq!(mask.dim(), (12, 15));
        // rows 0..12, cols 0..12
        assert_eq!(mask.iter().filter(|&&v| v).count(), 12 * 12);
        Ok(())
    }

    #[test]
    fn test_prompt_outside_image_gives_empty_mask() -> Result<()> {
        let mut mock = MockPredictor::new();
        mock.set_image(&RgbImage::new(100, 100))?;

        let prediction = mock.predict(&PointPrompt::foreground(200.0, 200.0), false)?;
        assert_eq!(prediction.masks.len(), 1);
        assert!(!prediction.masks[0].iter().any(|&v| v));
        Ok(())
    }

    #[tokio::test]
    async fn test_failing_store_records_nothing() {
        let store = InMemoryDetectionStore::failing();
        let result = store
            .record_detection(&DetectionRecord::new("leaf.png", 1.0))
            .await;
        assert!(result.is_err());
        assert!(store.records().is_empty());
    }

    #[test]
    fn test_png_bytes_decode() -> Result<()> {
        let decoded = image::load_from_memory(&png_bytes(7, 5)?)?;
        assert_eq!((decoded.width(), decoded.height()), (7, 5));
        Ok(())
    }
}

//! Run Orchestration
//!
//! Drives the per-image loop: fetch, detect, crop, preprocess, recognize,
//! normalize, correct, record. Images are processed sequentially and
//! independently; any per-image failure is logged and skipped, and the run
//! always continues to a final decision.

use image::RgbImage;
use tracing::{debug, info, warn};

use crate::fetch::ImageFetcher;
use crate::plate::{
    format_plate, normalize_fragments, CandidateAggregator, ImageOutcome, SkipReason,
};
use crate::vision::{preprocess, PlateBox, PlateDetector, RecognizerOptions, TextRecognizer};

/// Sequential multi-image plate reader.
///
/// Owns the detector and recognizer backends plus the per-run aggregation
/// context; nothing is shared across runs.
pub struct PlateReader<D, R> {
    fetcher: ImageFetcher,
    detector: D,
    recognizer: R,
    /// Detections at or below this confidence are discarded
    detection_threshold: f32,
    recognizer_options: RecognizerOptions,
}

impl<D: PlateDetector, R: TextRecognizer> PlateReader<D, R> {
    pub fn new(
        fetcher: ImageFetcher,
        detector: D,
        recognizer: R,
        detection_threshold: f32,
        recognizer_options: RecognizerOptions,
    ) -> Self {
        Self {
            fetcher,
            detector,
            recognizer,
            detection_threshold,
            recognizer_options,
        }
    }

    /// Process every image source and return the consensus plate, if any.
    pub fn run(&mut self, urls: &[String]) -> Option<String> {
        let mut aggregator = CandidateAggregator::new();

        for url in urls {
            let outcome = self.process_url(url);
            record_outcome(&mut aggregator, url, outcome);
        }

        let decision = aggregator.decide();
        match &decision {
            Some(plate) => info!(
                "Final plate: {} ({} candidates from {} images)",
                plate,
                aggregator.len(),
                urls.len()
            ),
            None => info!("No plate candidates recorded from {} images", urls.len()),
        }

        decision
    }

    /// Fetch and decode one source, then run the recognition stages.
    fn process_url(&mut self, url: &str) -> ImageOutcome {
        let bytes = match self.fetcher.fetch_bytes(url) {
            Ok(bytes) => bytes,
            Err(e) => return ImageOutcome::Skipped(SkipReason::Fetch(e.to_string())),
        };

        let image = match image::load_from_memory(&bytes) {
            Ok(decoded) => decoded.to_rgb8(),
            Err(e) => return ImageOutcome::Skipped(SkipReason::Decode(e.to_string())),
        };

        self.process_image(&image)
    }

    /// Run detection through format validation on one decoded image.
    pub fn process_image(&mut self, image: &RgbImage) -> ImageOutcome {
        let boxes = match self.detector.detect(image) {
            Ok(boxes) => boxes,
            Err(e) => {
                warn!("Detector failed: {}", e);
                return ImageOutcome::Skipped(SkipReason::NoDetection);
            }
        };

        // First surviving box in detector-reported order; no re-ranking
        let Some(plate) = boxes
            .iter()
            .find(|b| b.confidence > self.detection_threshold)
        else {
            debug!(
                "No box above threshold {} ({} raw)",
                self.detection_threshold,
                boxes.len()
            );
            return ImageOutcome::Skipped(SkipReason::NoDetection);
        };

        let crop = crop_plate(image, plate);
        let prepared = preprocess::prepare_plate(&crop);

        let fragments = match self.recognizer.recognize(&prepared, &self.recognizer_options) {
            Ok(fragments) => fragments,
            Err(e) => {
                warn!("Recognizer failed: {}", e);
                return ImageOutcome::Skipped(SkipReason::NoRecognition);
            }
        };

        let Some(normalized) = normalize_fragments(fragments) else {
            return ImageOutcome::Skipped(SkipReason::NoRecognition);
        };

        debug!(
            "Normalized reading {:?} at confidence {:.2}",
            normalized.text, normalized.confidence
        );

        match format_plate(&normalized.text) {
            Some(candidate) => ImageOutcome::Accepted {
                candidate,
                confidence: normalized.confidence,
            },
            None => ImageOutcome::Skipped(SkipReason::FormatRejected(normalized.text)),
        }
    }
}

/// Fold one per-image outcome into the run's aggregation context.
fn record_outcome(aggregator: &mut CandidateAggregator, url: &str, outcome: ImageOutcome) {
    match outcome {
        ImageOutcome::Accepted {
            candidate,
            confidence,
        } => {
            info!("{}: accepted {} ({:.2})", url, candidate, confidence);
            aggregator.record(&candidate, confidence);
        }
        ImageOutcome::Skipped(reason) => {
            warn!("{}: skipped - {}", url, reason);
        }
    }
}

/// Crop a detected box out of the source image, clamped to its bounds.
fn crop_plate(image: &RgbImage, plate: &PlateBox) -> RgbImage {
    let (w, h) = image.dimensions();

    let x1 = (plate.x1.max(0.0) as u32).min(w.saturating_sub(1));
    let y1 = (plate.y1.max(0.0) as u32).min(h.saturating_sub(1));
    let x2 = (plate.x2.max(0.0) as u32).clamp(x1 + 1, w);
    let y2 = (plate.y2.max(0.0) as u32).clamp(y1 + 1, h);

    image::imageops::crop_imm(image, x1, y1, x2 - x1, y2 - y1).to_image()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::{RecognitionFragment, VisionError};

    struct FixedDetector(Vec<PlateBox>);

    impl PlateDetector for FixedDetector {
        fn detect(&mut self, _image: &RgbImage) -> Result<Vec<PlateBox>, VisionError> {
            Ok(self.0.clone())
        }
    }

    struct FixedRecognizer(Vec<RecognitionFragment>);

    impl TextRecognizer for FixedRecognizer {
        fn recognize(
            &mut self,
            _image: &image::GrayImage,
            _options: &RecognizerOptions,
        ) -> Result<Vec<RecognitionFragment>, VisionError> {
            Ok(self.0.clone())
        }
    }

    fn plate_box(confidence: f32) -> PlateBox {
        PlateBox {
            x1: 10.0,
            y1: 10.0,
            x2: 70.0,
            y2: 30.0,
            confidence,
        }
    }

    fn fragment(text: &str, confidence: f32) -> RecognitionFragment {
        RecognitionFragment {
            quad: [(0.0, 0.0), (60.0, 0.0), (60.0, 20.0), (0.0, 20.0)],
            text: text.to_string(),
            confidence,
        }
    }

    fn reader(
        boxes: Vec<PlateBox>,
        fragments: Vec<RecognitionFragment>,
    ) -> PlateReader<FixedDetector, FixedRecognizer> {
        PlateReader::new(
            ImageFetcher::new("plate-reader-test", None).unwrap(),
            FixedDetector(boxes),
            FixedRecognizer(fragments),
            0.5,
            RecognizerOptions::default(),
        )
    }

    fn test_image() -> RgbImage {
        RgbImage::from_pixel(100, 60, image::Rgb([90, 90, 90]))
    }

    #[test]
    fn test_accepts_valid_plate() {
        let mut reader = reader(vec![plate_box(0.9)], vec![fragment("AB123", 0.8)]);

        let outcome = reader.process_image(&test_image());
        assert_eq!(
            outcome,
            ImageOutcome::Accepted {
                candidate: "AB123".to_string(),
                confidence: 0.8,
            }
        );
    }

    #[test]
    fn test_no_boxes_skips() {
        let mut reader = reader(vec![], vec![fragment("AB123", 0.8)]);

        let outcome = reader.process_image(&test_image());
        assert_eq!(outcome, ImageOutcome::Skipped(SkipReason::NoDetection));
    }

    #[test]
    fn test_low_confidence_boxes_skip() {
        let mut reader = reader(vec![plate_box(0.4)], vec![fragment("AB123", 0.8)]);

        let outcome = reader.process_image(&test_image());
        assert_eq!(outcome, ImageOutcome::Skipped(SkipReason::NoDetection));
    }

    #[test]
    fn test_first_surviving_box_wins() {
        // The second box has higher confidence but detector order rules
        let low_first = vec![plate_box(0.3), plate_box(0.6), plate_box(0.95)];
        let mut reader = reader(low_first, vec![fragment("AB123", 0.8)]);

        let outcome = reader.process_image(&test_image());
        assert!(matches!(outcome, ImageOutcome::Accepted { .. }));
    }

    #[test]
    fn test_empty_recognition_skips() {
        let mut reader = reader(vec![plate_box(0.9)], vec![]);

        let outcome = reader.process_image(&test_image());
        assert_eq!(outcome, ImageOutcome::Skipped(SkipReason::NoRecognition));
    }

    #[test]
    fn test_format_rejection_skips() {
        let mut reader = reader(vec![plate_box(0.9)], vec![fragment("50123", 0.9)]);

        let outcome = reader.process_image(&test_image());
        assert_eq!(
            outcome,
            ImageOutcome::Skipped(SkipReason::FormatRejected("50123".to_string()))
        );
    }

    #[test]
    fn test_outcome_folding_matches_majority_vote() {
        let mut aggregator = CandidateAggregator::new();
        let outcomes = [
            ImageOutcome::Accepted {
                candidate: "AB123".to_string(),
                confidence: 0.9,
            },
            ImageOutcome::Skipped(SkipReason::NoDetection),
            ImageOutcome::Accepted {
                candidate: "AB123".to_string(),
                confidence: 0.8,
            },
            ImageOutcome::Accepted {
                candidate: "CD456".to_string(),
                confidence: 0.95,
            },
        ];

        for (i, outcome) in outcomes.into_iter().enumerate() {
            record_outcome(&mut aggregator, &format!("image-{i}"), outcome);
        }

        assert_eq!(aggregator.len(), 3);
        assert_eq!(aggregator.decide().as_deref(), Some("AB123"));
    }

    #[test]
    fn test_crop_clamps_to_image_bounds() {
        let image = test_image();
        let oversized = PlateBox {
            x1: -20.0,
            y1: -5.0,
            x2: 500.0,
            y2: 400.0,
            confidence: 1.0,
        };

        let crop = crop_plate(&image, &oversized);
        assert_eq!(crop.dimensions(), (100, 60));
    }
}

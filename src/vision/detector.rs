//! ONNX plate detection backend
//!
//! Runs a single-class YOLO-style detector and reports boxes in source
//! pixel space, preserving the model's anchor ordering.

use image::RgbImage;
use ndarray::Array4;
use ort::value::Value;
use std::path::Path;
use tracing::debug;

use super::models::OnnxSession;
use super::{PlateBox, PlateDetector, VisionError};

/// Anchors below this raw score are never surfaced; callers apply their own
/// threshold on top
const RAW_CONFIDENCE_FLOOR: f32 = 0.25;
/// Overlap ratio above which two boxes count as the same detection
const IOU_SUPPRESSION: f32 = 0.45;

/// Single-class YOLO plate detector via ONNX Runtime
pub struct OnnxPlateDetector {
    session: OnnxSession,
    input_name: String,
    input_size: u32,
}

impl OnnxPlateDetector {
    /// Load the detection model from a file
    pub fn new(model_path: &Path, input_size: u32) -> Result<Self, VisionError> {
        let session =
            OnnxSession::new(model_path).map_err(|e| VisionError::ModelLoad(e.to_string()))?;

        let input_name = session
            .input_names()
            .first()
            .cloned()
            .unwrap_or_else(|| "images".to_string());

        Ok(Self {
            session,
            input_name,
            input_size,
        })
    }

    /// Build the NCHW input tensor, pixels scaled to [0, 1]
    fn build_input(&self, image: &RgbImage) -> Array4<f32> {
        let size = self.input_size;
        let resized =
            image::imageops::resize(image, size, size, image::imageops::FilterType::Triangle);

        let mut input = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
        for y in 0..size as usize {
            for x in 0..size as usize {
                let pixel = resized.get_pixel(x as u32, y as u32);
                input[[0, 0, y, x]] = pixel[0] as f32 / 255.0;
                input[[0, 1, y, x]] = pixel[1] as f32 / 255.0;
                input[[0, 2, y, x]] = pixel[2] as f32 / 255.0;
            }
        }

        input
    }
}

impl PlateDetector for OnnxPlateDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<PlateBox>, VisionError> {
        let (orig_w, orig_h) = image.dimensions();
        let input = self.build_input(image);

        let input_value =
            Value::from_array(input).map_err(|e| VisionError::Inference(e.to_string()))?;

        let input_name = self.input_name.clone();
        let outputs = self
            .session
            .session_mut()
            .run(ort::inputs![&input_name => input_value])
            .map_err(|e| VisionError::Inference(e.to_string()))?;

        let output = outputs[0]
            .try_extract_array::<f32>()
            .map_err(|e| VisionError::Inference(e.to_string()))?;

        let shape = output.shape().to_vec();
        if shape.len() != 3 {
            return Err(VisionError::Inference(format!(
                "expected (1, features, anchors) output, got {:?}",
                shape
            )));
        }

        let data: Vec<f32> = output.iter().copied().collect();
        drop(outputs);

        let scale_x = orig_w as f32 / self.input_size as f32;
        let scale_y = orig_h as f32 / self.input_size as f32;

        let raw = parse_detections(
            &data,
            shape[1],
            shape[2],
            scale_x,
            scale_y,
            RAW_CONFIDENCE_FLOOR,
        );
        let boxes = suppress_overlaps(raw, IOU_SUPPRESSION);

        debug!("Detector produced {} boxes", boxes.len());
        Ok(boxes)
    }
}

/// Parse a YOLO output laid out as (1, features, anchors).
///
/// Features are (cx, cy, w, h) followed by one or more class scores; the box
/// confidence is the best class score. Anchor order is preserved so callers
/// see the model-reported ordering.
fn parse_detections(
    data: &[f32],
    num_features: usize,
    num_anchors: usize,
    scale_x: f32,
    scale_y: f32,
    floor: f32,
) -> Vec<PlateBox> {
    let mut boxes = Vec::new();
    if num_features < 5 {
        return boxes;
    }

    for anchor in 0..num_anchors {
        let feature = |f: usize| data[f * num_anchors + anchor];

        let confidence = (4..num_features)
            .map(feature)
            .fold(f32::NEG_INFINITY, f32::max);
        if confidence <= floor {
            continue;
        }

        let cx = feature(0);
        let cy = feature(1);
        let w = feature(2);
        let h = feature(3);

        boxes.push(PlateBox {
            x1: (cx - w / 2.0) * scale_x,
            y1: (cy - h / 2.0) * scale_y,
            x2: (cx + w / 2.0) * scale_x,
            y2: (cy + h / 2.0) * scale_y,
            confidence,
        });
    }

    boxes
}

/// Drop boxes that substantially overlap a stronger box, keeping first-seen
/// order for the survivors.
fn suppress_overlaps(boxes: Vec<PlateBox>, iou_threshold: f32) -> Vec<PlateBox> {
    let mut kept: Vec<PlateBox> = Vec::new();

    for candidate in boxes {
        let dominated = kept.iter().any(|existing| {
            iou(existing, &candidate) > iou_threshold && existing.confidence >= candidate.confidence
        });

        if !dominated {
            kept.retain(|existing| {
                !(iou(existing, &candidate) > iou_threshold
                    && candidate.confidence > existing.confidence)
            });
            kept.push(candidate);
        }
    }

    kept
}

/// Intersection over union of two boxes
fn iou(a: &PlateBox, b: &PlateBox) -> f32 {
    let ix = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let iy = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let intersection = ix * iy;

    let union = a.width() * a.height() + b.width() * b.height() - intersection;
    if union <= 0.0 {
        return 0.0;
    }

    intersection / union
}

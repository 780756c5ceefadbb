//! ONNX text recognition backend
//!
//! Runs a CRNN recognition model over the preprocessed plate crop and
//! decodes the CTC output sequence. The character allowlist is applied as a
//! class mask before decoding, so disallowed glyphs can never be emitted.

use image::GrayImage;
use ndarray::Array4;
use ort::value::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

use super::models::OnnxSession;
use super::{DecoderMode, RecognitionFragment, RecognizerOptions, TextRecognizer, VisionError};

/// Model input height; widths scale proportionally
const REC_TARGET_HEIGHT: u32 = 48;
/// Cap on the model input width for very wide crops
const REC_MAX_WIDTH: u32 = 640;
/// CTC blank class index
const BLANK: usize = 0;

/// CRNN text recognizer via ONNX Runtime
pub struct OnnxTextRecognizer {
    session: OnnxSession,
    input_name: String,
    charset: Vec<String>,
}

impl OnnxTextRecognizer {
    /// Load the recognition model and its character dictionary
    pub fn new(model_path: &Path, charset_path: &Path) -> Result<Self, VisionError> {
        let session =
            OnnxSession::new(model_path).map_err(|e| VisionError::ModelLoad(e.to_string()))?;

        let input_name = session
            .input_names()
            .first()
            .cloned()
            .unwrap_or_else(|| "x".to_string());

        let charset = load_charset(charset_path)?;
        debug!("Loaded charset with {} entries", charset.len());

        Ok(Self {
            session,
            input_name,
            charset,
        })
    }

    /// Build the NCHW input tensor: fixed height, proportional width, the
    /// single channel replicated to three, normalized to [-1, 1]
    fn build_input(&self, image: &GrayImage) -> Array4<f32> {
        let (w, h) = image.dimensions();
        let scale = REC_TARGET_HEIGHT as f32 / h.max(1) as f32;
        let new_w = ((w as f32 * scale) as u32).clamp(1, REC_MAX_WIDTH);

        let resized = image::imageops::resize(
            image,
            new_w,
            REC_TARGET_HEIGHT,
            image::imageops::FilterType::Triangle,
        );

        let mut input = Array4::<f32>::zeros((
            1,
            3,
            REC_TARGET_HEIGHT as usize,
            new_w as usize,
        ));
        for y in 0..REC_TARGET_HEIGHT as usize {
            for x in 0..new_w as usize {
                let value = (resized.get_pixel(x as u32, y as u32).0[0] as f32 / 255.0 - 0.5) / 0.5;
                input[[0, 0, y, x]] = value;
                input[[0, 1, y, x]] = value;
                input[[0, 2, y, x]] = value;
            }
        }

        input
    }
}

impl TextRecognizer for OnnxTextRecognizer {
    fn recognize(
        &mut self,
        image: &GrayImage,
        options: &RecognizerOptions,
    ) -> Result<Vec<RecognitionFragment>, VisionError> {
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
                "expected (1, steps, classes) output, got {:?}",
                shape
            )));
        }
        let (steps, classes) = (shape[1], shape[2]);

        let mask = class_mask(&self.charset, classes, &options.allowlist);
        let mut probs = Vec::with_capacity(steps);
        for t in 0..steps {
            let row: Vec<f32> = (0..classes).map(|c| output[[0, t, c]]).collect();
            probs.push(masked_softmax(&row, &mask));
        }
        drop(outputs);

        let (indices, confidence) = match options.decoder {
            DecoderMode::Greedy => greedy_decode(&probs),
            DecoderMode::BeamSearch => beam_search_decode(&probs, options.beam_width.max(1)),
        };

        let text = indices_to_text(&indices, &self.charset);
        debug!("Decoded {:?} at confidence {:.2}", text, confidence);

        if text.is_empty() {
            return Ok(vec![]);
        }

        let (w, h) = image.dimensions();
        Ok(vec![RecognitionFragment {
            quad: [
                (0.0, 0.0),
                (w as f32, 0.0),
                (w as f32, h as f32),
                (0.0, h as f32),
            ],
            text,
            confidence,
        }])
    }
}

/// Load the character dictionary; line N is CTC class N + 1
fn load_charset(path: &Path) -> Result<Vec<String>, VisionError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| VisionError::ModelLoad(format!("charset read failed: {}", e)))?;

    let charset: Vec<String> = content.lines().map(|line| line.to_string()).collect();
    if charset.is_empty() {
        return Err(VisionError::ModelLoad("charset is empty".to_string()));
    }

    Ok(charset)
}

/// Per-class emission mask. The blank class is always allowed; a character
/// class passes when it matches the allowlist case-insensitively. An empty
/// allowlist disables masking.
fn class_mask(charset: &[String], num_classes: usize, allowlist: &str) -> Vec<bool> {
    let mut mask = vec![false; num_classes];
    mask[BLANK] = true;

    for class in 1..num_classes {
        let Some(entry) = charset.get(class - 1) else {
            continue;
        };

        mask[class] = allowlist.is_empty()
            || entry.chars().all(|c| {
                allowlist
                    .chars()
                    .any(|a| a.eq_ignore_ascii_case(&c))
            });
    }

    mask
}

/// Softmax over the unmasked classes; masked classes get probability zero
fn masked_softmax(row: &[f32], mask: &[bool]) -> Vec<f32> {
    let max = row
        .iter()
        .zip(mask)
        .filter(|(_, m)| **m)
        .map(|(v, _)| *v)
        .fold(f32::NEG_INFINITY, f32::max);

    let mut out = vec![0.0f32; row.len()];
    let mut sum = 0.0f32;
    for (i, (value, allowed)) in row.iter().zip(mask).enumerate() {
        if *allowed {
            let e = (value - max).exp();
            out[i] = e;
            sum += e;
        }
    }

    if sum > 0.0 {
        for value in out.iter_mut() {
            *value /= sum;
        }
    }

    out
}

/// Greedy CTC decode: argmax per step, collapse repeats, drop blanks.
/// Confidence is the mean probability of the emitted steps.
fn greedy_decode(probs: &[Vec<f32>]) -> (Vec<usize>, f32) {
    let mut indices = Vec::new();
    let mut confidence_sum = 0.0f32;
    let mut last: Option<usize> = None;

    for row in probs {
        let (best, best_prob) = row
            .iter()
            .enumerate()
            .fold((BLANK, f32::NEG_INFINITY), |(bi, bp), (i, p)| {
                if *p > bp {
                    (i, *p)
                } else {
                    (bi, bp)
                }
            });

        if best != BLANK && last != Some(best) {
            indices.push(best);
            confidence_sum += best_prob;
        }
        last = Some(best);
    }

    let confidence = if indices.is_empty() {
        0.0
    } else {
        confidence_sum / indices.len() as f32
    };

    (indices, confidence)
}

/// CTC prefix beam search.
///
/// Tracks blank/non-blank path probability per prefix so repeated characters
/// and collapses are handled exactly. Returns the best prefix and its mean
/// per-character probability. Deterministic: ties sort by prefix.
fn beam_search_decode(probs: &[Vec<f32>], beam_width: usize) -> (Vec<usize>, f32) {
    // prefix -> (probability ending in blank, probability ending in non-blank)
    let mut beams: Vec<(Vec<usize>, f64, f64)> = vec![(Vec::new(), 1.0, 0.0)];

    for row in probs {
        let mut next: HashMap<Vec<usize>, (f64, f64)> = HashMap::new();

        for (prefix, p_blank, p_char) in &beams {
            for (class, p) in row.iter().enumerate() {
                let p = *p as f64;
                if p <= 0.0 {
                    continue;
                }

                if class == BLANK {
                    let entry = next.entry(prefix.clone()).or_insert((0.0, 0.0));
                    entry.0 += (p_blank + p_char) * p;
                } else if prefix.last() == Some(&class) {
                    // Repeat: same prefix absorbs it, extension needs a blank
                    let entry = next.entry(prefix.clone()).or_insert((0.0, 0.0));
                    entry.1 += p_char * p;

                    let mut extended = prefix.clone();
                    extended.push(class);
                    let entry = next.entry(extended).or_insert((0.0, 0.0));
                    entry.1 += p_blank * p;
                } else {
                    let mut extended = prefix.clone();
                    extended.push(class);
                    let entry = next.entry(extended).or_insert((0.0, 0.0));
                    entry.1 += (p_blank + p_char) * p;
                }
            }
        }

        let mut ranked: Vec<(Vec<usize>, f64, f64)> = next
            .into_iter()
            .map(|(prefix, (p_blank, p_char))| (prefix, p_blank, p_char))
            .collect();
        ranked.sort_by(|a, b| {
            (b.1 + b.2)
                .total_cmp(&(a.1 + a.2))
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(beam_width);
        beams = ranked;
    }

    let Some((prefix, p_blank, p_char)) = beams.into_iter().next() else {
        return (Vec::new(), 0.0);
    };

    let total = p_blank + p_char;
    let confidence = if prefix.is_empty() || total <= 0.0 {
        0.0
    } else {
        total.powf(1.0 / prefix.len() as f64) as f32
    };

    (prefix, confidence)
}

/// Map CTC class indices back to dictionary characters
fn indices_to_text(indices: &[usize], charset: &[String]) -> String {
    indices
        .iter()
        .filter_map(|&class| charset.get(class - 1))
        .map(|entry| entry.as_str())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn charset() -> Vec<String> {
        vec!["A".to_string(), "B".to_string(), "1".to_string()]
    }

    #[test]
    fn test_greedy_collapses_repeats_and_blanks() {
        // Classes: 0 blank, 1 'A', 2 'B'
        let probs = vec![
            vec![0.1, 0.8, 0.1],
            vec![0.1, 0.8, 0.1],
            vec![0.9, 0.05, 0.05],
            vec![0.1, 0.1, 0.8],
        ];

        let (indices, confidence) = greedy_decode(&probs);
        assert_eq!(indices, vec![1, 2]);
        assert!((confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_greedy_all_blank_is_empty() {
        let probs = vec![vec![0.9, 0.05, 0.05], vec![0.9, 0.05, 0.05]];

        let (indices, confidence) = greedy_decode(&probs);
        assert!(indices.is_empty());
        assert_eq!(confidence, 0.0);
    }

    #[test]
    fn test_beam_search_beats_greedy_on_split_mass() {
        // Per-step argmax is blank, but the aggregate mass of "A" paths wins
        let probs = vec![vec![0.6, 0.4], vec![0.6, 0.4]];

        let (greedy_indices, _) = greedy_decode(&probs);
        assert!(greedy_indices.is_empty());

        let (beam_indices, confidence) = beam_search_decode(&probs, 5);
        assert_eq!(beam_indices, vec![1]);
        // P("A") = 0.4*0.6 + 0.6*0.4 + 0.4*0.4 = 0.64
        assert!((confidence - 0.64).abs() < 1e-4);
    }

    #[test]
    fn test_beam_search_collapses_repeats() {
        let probs = vec![vec![0.0, 1.0], vec![0.0, 1.0]];

        let (indices, _) = beam_search_decode(&probs, 5);
        // "AA" without an intervening blank collapses to "A"
        assert_eq!(indices, vec![1]);
    }

    #[test]
    fn test_class_mask_filters_allowlist() {
        let mask = class_mask(&charset(), 4, "A1");

        assert!(mask[0], "blank always allowed");
        assert!(mask[1], "'A' in allowlist");
        assert!(!mask[2], "'B' not in allowlist");
        assert!(mask[3], "'1' in allowlist");
    }

    #[test]
    fn test_class_mask_empty_allowlist_allows_all() {
        let mask = class_mask(&charset(), 4, "");
        assert!(mask.iter().all(|m| *m));
    }

    #[test]
    fn test_masked_softmax_zeroes_masked_classes() {
        let probs = masked_softmax(&[1.0, 2.0, 3.0], &[true, false, true]);

        assert_eq!(probs[1], 0.0);
        assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!(probs[2] > probs[0]);
    }

    #[test]
    fn test_indices_to_text() {
        assert_eq!(indices_to_text(&[1, 2, 3], &charset()), "AB1");
    }

    #[test]
    fn test_masked_classes_never_decoded() {
        let mask = class_mask(&charset(), 4, "B");
        // 'A' dominates the raw scores but is masked out
        let probs: Vec<Vec<f32>> = vec![
            masked_softmax(&[0.1, 9.0, 2.0, 0.1], &mask),
            masked_softmax(&[0.1, 9.0, 2.0, 0.1], &mask),
        ];

        let (indices, _) = greedy_decode(&probs);
        assert_eq!(indices, vec![2]);
    }
}

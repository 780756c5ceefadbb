//! Recognizer output cleanup
//!
//! Collapses the fragments the recognizer reports for one plate crop into a
//! single left-to-right string.

use crate::vision::RecognitionFragment;

/// Normalized text for one plate image
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedText {
    /// Uppercase text over {A-Z, 0-9, '.'}
    pub text: String,
    /// Highest confidence among the contributing fragments
    pub confidence: f32,
}

/// Merge recognizer fragments into one normalized reading.
///
/// Fragments are ordered by the x coordinate of their top-left corner, since
/// a plate is sometimes split into several text segments. Characters outside
/// [A-Za-z0-9.] are stripped before concatenation. The reported confidence
/// is the maximum over all fragments, an intentionally optimistic
/// single-frame score. Returns None when there are no fragments.
pub fn normalize_fragments(mut fragments: Vec<RecognitionFragment>) -> Option<NormalizedText> {
    if fragments.is_empty() {
        return None;
    }

    fragments.sort_by(|a, b| a.quad[0].0.total_cmp(&b.quad[0].0));

    let confidence = fragments
        .iter()
        .map(|f| f.confidence)
        .fold(0.0f32, f32::max);

    let text = fragments
        .iter()
        .flat_map(|f| f.text.chars())
        .filter(|c| c.is_ascii_alphanumeric() || *c == '.')
        .collect::<String>()
        .to_uppercase();

    Some(NormalizedText { text, confidence })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(x: f32, text: &str, confidence: f32) -> RecognitionFragment {
        RecognitionFragment {
            quad: [(x, 0.0), (x + 50.0, 0.0), (x + 50.0, 20.0), (x, 20.0)],
            text: text.to_string(),
            confidence,
        }
    }

    #[test]
    fn test_empty_fragments() {
        assert!(normalize_fragments(vec![]).is_none());
    }

    #[test]
    fn test_fragments_ordered_left_to_right() {
        let result = normalize_fragments(vec![
            fragment(120.0, "123", 0.7),
            fragment(10.0, "AB", 0.8),
        ])
        .unwrap();

        assert_eq!(result.text, "AB123");
    }

    #[test]
    fn test_junk_characters_stripped() {
        let result = normalize_fragments(vec![fragment(0.0, " a b-1#2|3 ", 0.9)]).unwrap();
        assert_eq!(result.text, "AB123");
    }

    #[test]
    fn test_confidence_is_maximum_not_mean() {
        let result = normalize_fragments(vec![
            fragment(0.0, "AB", 0.4),
            fragment(60.0, "123", 0.9),
        ])
        .unwrap();

        assert!((result.confidence - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_dots_are_kept() {
        let result = normalize_fragments(vec![fragment(0.0, "ab.12", 0.5)]).unwrap();
        assert_eq!(result.text, "AB.12");
    }
}

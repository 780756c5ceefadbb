//! Plate shape correction and validation
//!
//! OCR confuses visually similar glyphs (0/O, 1/I, 5/S ...). Two shapes are
//! accepted: an all-letter vanity plate of 3-8 characters, and the standard
//! two letters followed by one to four digits. Anything else is rejected
//! rather than guessed at.

/// Glyph pairs the recognizer commonly swaps, digit form to letter form
const DIGIT_TO_LETTER: [(char, char); 6] = [
    ('0', 'O'),
    ('1', 'I'),
    ('3', 'J'),
    ('4', 'A'),
    ('6', 'G'),
    ('5', 'S'),
];

fn digit_to_letter(c: char) -> char {
    DIGIT_TO_LETTER
        .iter()
        .find(|(digit, _)| *digit == c)
        .map_or(c, |(_, letter)| *letter)
}

fn letter_to_digit(c: char) -> char {
    DIGIT_TO_LETTER
        .iter()
        .find(|(_, letter)| *letter == c)
        .map_or(c, |(digit, _)| *digit)
}

/// Validate normalized text against the accepted plate shapes, repairing
/// common digit/letter confusions in the standard shape.
///
/// Returns None when the text fits neither shape. Shape validation for the
/// standard plate reads the uncorrected text: a leading character misread as
/// a digit fails validation even though a substitution exists for it.
pub fn format_plate(text: &str) -> Option<String> {
    // A leading "LV" is the country code picked up from the plate frame, not
    // part of the number, unless the remainder is purely numeric
    let text = match text.strip_prefix("LV") {
        Some(rest) if rest.is_empty() || !rest.chars().all(|c| c.is_ascii_digit()) => rest,
        _ => text,
    };

    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();

    if (3..=8).contains(&len) && chars.iter().all(|c| c.is_ascii_alphabetic()) {
        return Some(text.to_string());
    }

    if (3..=6).contains(&len) {
        let (prefix, suffix) = chars.split_at(2);

        let shape_ok = prefix.iter().all(|c| c.is_ascii_alphabetic())
            && (1..=4).contains(&suffix.len())
            && suffix.iter().all(|c| c.is_ascii_digit());

        if shape_ok {
            let corrected: String = prefix
                .iter()
                .map(|&c| digit_to_letter(c))
                .chain(suffix.iter().map(|&c| letter_to_digit(c)))
                .collect();
            return Some(corrected);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alphabetic_plates_pass_unchanged() {
        for plate in ["ABC", "FOUR", "WORDS", "ABCDEF", "ABCDEFG", "ABCDEFGH"] {
            assert_eq!(format_plate(plate).as_deref(), Some(plate));
        }
    }

    #[test]
    fn test_alphabetic_length_bounds() {
        assert_eq!(format_plate("AB"), None);
        assert_eq!(format_plate("ABCDEFGHI"), None);
    }

    #[test]
    fn test_standard_shape_accepted() {
        assert_eq!(format_plate("AB123").as_deref(), Some("AB123"));
        assert_eq!(format_plate("XY1").as_deref(), Some("XY1"));
        assert_eq!(format_plate("CD9876").as_deref(), Some("CD9876"));
    }

    #[test]
    fn test_numeric_prefix_rejected() {
        // "50" is not alphabetic, so the shape check fails outright
        assert_eq!(format_plate("50123"), None);
    }

    #[test]
    fn test_digit_in_prefix_rejected_despite_known_confusion() {
        // "4" maps to "A" in the correction table, but validation reads the
        // original text and the original prefix is not alphabetic
        assert_eq!(format_plate("4B123"), None);
    }

    #[test]
    fn test_letter_in_suffix_rejected() {
        assert_eq!(format_plate("ABS23"), None);
    }

    #[test]
    fn test_lv_prefix_stripped() {
        assert_eq!(format_plate("LVAB1234").as_deref(), Some("AB1234"));
        assert_eq!(format_plate("LVWORDS").as_deref(), Some("WORDS"));
    }

    #[test]
    fn test_lv_with_numeric_remainder_kept() {
        // "LV1234" reads as a standard plate with prefix "LV"
        assert_eq!(format_plate("LV1234").as_deref(), Some("LV1234"));
    }

    #[test]
    fn test_bare_lv_rejected() {
        assert_eq!(format_plate("LV"), None);
    }

    #[test]
    fn test_too_long_mixed_rejected() {
        assert_eq!(format_plate("AB12345"), None);
    }

    #[test]
    fn test_empty_rejected() {
        assert_eq!(format_plate(""), None);
    }

    #[test]
    fn test_confusion_tables_are_inverses() {
        for (digit, letter) in DIGIT_TO_LETTER {
            assert_eq!(digit_to_letter(digit), letter);
            assert_eq!(letter_to_digit(letter), digit);
        }
    }
}

//! Cross-image candidate aggregation
//!
//! One run yields at most one candidate per image. The final answer is the
//! candidate read most often, with total confidence mass breaking frequency
//! ties: a plate read consistently at middling confidence beats a single
//! high-confidence misread.

use std::collections::HashMap;

/// Per-run tally of accepted plate candidates.
///
/// Owned by the orchestrator for exactly one run; never shared across runs.
#[derive(Debug, Default)]
pub struct CandidateAggregator {
    /// Accepted candidates in arrival order
    candidates: Vec<String>,
    /// Confidences observed per candidate, in arrival order
    ledger: HashMap<String, Vec<f32>>,
}

impl CandidateAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one accepted candidate and its single-frame confidence.
    pub fn record(&mut self, candidate: &str, confidence: f32) {
        self.candidates.push(candidate.to_string());
        self.ledger
            .entry(candidate.to_string())
            .or_default()
            .push(confidence);
    }

    /// Number of candidates recorded so far
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Majority vote with confidence-sum tie-break.
    ///
    /// Returns None when nothing was recorded. Frequency ties go to the tied
    /// candidate with the greatest summed confidence; ties in the sum keep
    /// the first-recorded candidate.
    pub fn decide(&self) -> Option<String> {
        // Frequency per distinct candidate, first-seen order preserved
        let mut counts: Vec<(&str, usize)> = Vec::new();
        for candidate in &self.candidates {
            match counts.iter_mut().find(|(c, _)| *c == candidate.as_str()) {
                Some((_, n)) => *n += 1,
                None => counts.push((candidate.as_str(), 1)),
            }
        }

        let max_count = counts.iter().map(|(_, n)| *n).max()?;

        let mut winner: Option<(&str, f32)> = None;
        for &(candidate, count) in &counts {
            if count != max_count {
                continue;
            }
            let sum = self.confidence_sum(candidate);
            match winner {
                Some((_, best)) if sum <= best => {}
                _ => winner = Some((candidate, sum)),
            }
        }

        winner.map(|(candidate, _)| candidate.to_string())
    }

    fn confidence_sum(&self, candidate: &str) -> f32 {
        self.ledger
            .get(candidate)
            .map(|confidences| confidences.iter().sum())
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_run_decides_none() {
        let aggregator = CandidateAggregator::new();
        assert_eq!(aggregator.decide(), None);
        assert!(aggregator.is_empty());
    }

    #[test]
    fn test_frequency_beats_confidence() {
        let mut aggregator = CandidateAggregator::new();
        aggregator.record("AB123", 0.9);
        aggregator.record("AB123", 0.8);
        aggregator.record("CD456", 0.95);

        assert_eq!(aggregator.decide().as_deref(), Some("AB123"));
        assert_eq!(aggregator.len(), 3);
    }

    #[test]
    fn test_frequency_tie_broken_by_confidence_sum() {
        let mut aggregator = CandidateAggregator::new();
        aggregator.record("AB123", 0.6);
        aggregator.record("CD456", 0.7);

        assert_eq!(aggregator.decide().as_deref(), Some("CD456"));
    }

    #[test]
    fn test_tie_break_uses_sum_not_max() {
        // Two middling readings outweigh one strong reading
        let mut aggregator = CandidateAggregator::new();
        aggregator.record("AB123", 0.5);
        aggregator.record("AB123", 0.5);
        aggregator.record("CD456", 0.9);
        aggregator.record("CD456", 0.05);

        assert_eq!(aggregator.decide().as_deref(), Some("AB123"));
    }

    #[test]
    fn test_single_candidate_wins() {
        let mut aggregator = CandidateAggregator::new();
        aggregator.record("EF789", 0.3);

        assert_eq!(aggregator.decide().as_deref(), Some("EF789"));
    }

    #[test]
    fn test_equal_sums_keep_first_recorded() {
        let mut aggregator = CandidateAggregator::new();
        aggregator.record("AB123", 0.5);
        aggregator.record("CD456", 0.5);

        assert_eq!(aggregator.decide().as_deref(), Some("AB123"));
    }

    #[test]
    fn test_decide_does_not_consume_state() {
        let mut aggregator = CandidateAggregator::new();
        aggregator.record("AB123", 0.5);

        assert_eq!(aggregator.decide(), aggregator.decide());
    }
}

//! Citation parsing and outcome classification

use regex::Regex;
use tracing::warn;

use quill_core::{Error, Outcome, Result};

use crate::prompts::REFUSAL_SENTENCE;

/// Extracts `Source N` labels from generated answers
#[derive(Debug, Clone)]
pub struct CitationParser {
    pattern: Regex,
}

impl CitationParser {
    pub fn new() -> Result<Self> {
        let pattern = Regex::new(r"(?i)\bSource\s+(\d+)\b")
            .map_err(|e| Error::Configuration(format!("Invalid citation pattern: {}", e)))?;
        Ok(Self { pattern })
    }

    /// Distinct labels cited in an answer, in order of first use.
    ///
    /// Labels outside `1..=evidence_len` cannot be traced to evidence and are
    /// dropped.
    pub fn parse(&self, answer: &str, evidence_len: usize) -> Vec<usize> {
        let mut labels = Vec::new();
        for caps in self.pattern.captures_iter(answer) {
            let Some(label) = caps.get(1).and_then(|m| m.as_str().parse::<usize>().ok()) else {
                continue;
            };
            if label == 0 || label > evidence_len {
                warn!(label, evidence = evidence_len, "answer cites a source that was not provided");
                continue;
            }
            if !labels.contains(&label) {
                labels.push(label);
            }
        }
        labels
    }
}

/// `Refused` when the answer is the refusal sentence, `Answered` otherwise
pub fn classify_outcome(answer: &str) -> Outcome {
    let normalised = answer.trim().trim_matches('"').trim();
    if normalised.starts_with(REFUSAL_SENTENCE) {
        Outcome::Refused
    } else {
        Outcome::Answered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_citations(answer: &str, evidence_len: usize) -> Vec<usize> {
        CitationParser::new().unwrap().parse(answer, evidence_len)
    }

    #[test]
    fn test_parse_in_order_and_dedup() {
        let answer = "Leaves are green (Source 2). Light drives it (Source 1, Source 2). See source 3.";
        assert_eq!(parse_citations(answer, 3), vec![2, 1, 3]);
    }

    #[test]
    fn test_out_of_range_labels_dropped() {
        assert_eq!(parse_citations("(Source 0) (Source 4) (Source 1)", 3), vec![1]);
        assert!(parse_citations("Source 1", 0).is_empty());
    }

    #[test]
    fn test_no_citations() {
        assert!(parse_citations("The mitochondria is the powerhouse.", 5).is_empty());
    }

    #[test]
    fn test_classify_outcome() {
        assert_eq!(classify_outcome(REFUSAL_SENTENCE), Outcome::Refused);
        assert_eq!(classify_outcome(&format!("  \"{}\"\n", REFUSAL_SENTENCE)), Outcome::Refused);
        assert_eq!(classify_outcome("Chlorophyll absorbs light (Source 1)."), Outcome::Answered);
    }
}

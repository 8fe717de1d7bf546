//! Insight generation from a finished call's transcript

use crate::config::FinalizerConfig;
use crate::domain::shared::value_objects::CallSid;
use crate::domain::transcript::{LocationExtractionResult, TranscriptSummary};
use once_cell::sync::Lazy;
use regex::Regex;

/// Summary used when a call ends without any final segment
pub const EMPTY_TRANSCRIPT_SUMMARY: &str = "No finalized transcript was captured for this call.";

/// Confidence attached to pattern-matched street addresses
const ADDRESS_MATCH_CONFIDENCE: f64 = 0.6;

const FINDING_CUES: &[&str] = &[
    "help",
    "need",
    "emergency",
    "hurt",
    "injured",
    "fire",
    "address",
    "located",
    "location",
];

static STREET_ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b\d{1,6}\s+(?:[A-Za-z0-9.'-]+\s+){0,4}?(?:street|st|avenue|ave|road|rd|boulevard|blvd|lane|ln|drive|dr|way|court|ct|place|pl)\b",
    )
    .expect("street address pattern")
});

/// Summary and optional location derived for one call
#[derive(Debug, Clone, PartialEq)]
pub struct Insights {
    pub summary: TranscriptSummary,
    pub location: Option<LocationExtractionResult>,
}

/// Produces insights from the final segments of a call, in arrival order
#[cfg_attr(test, mockall::automock)]
pub trait InsightGenerator: Send + Sync {
    fn generate(&self, call_sid: &CallSid, transcript: &[String]) -> Insights;
}

/// Deterministic keyword and pattern based generator
#[derive(Debug, Clone)]
pub struct KeywordInsightGenerator {
    max_summary_chars: usize,
    max_key_findings: usize,
}

impl KeywordInsightGenerator {
    pub fn new(max_summary_chars: usize, max_key_findings: usize) -> Self {
        Self {
            max_summary_chars,
            max_key_findings,
        }
    }

    pub fn from_config(config: &FinalizerConfig) -> Self {
        Self::new(config.max_summary_chars, config.max_key_findings)
    }

    fn summarize(&self, transcript: &[String]) -> String {
        let joined = transcript
            .iter()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        if joined.is_empty() {
            return EMPTY_TRANSCRIPT_SUMMARY.to_string();
        }

        truncate_chars(&joined, self.max_summary_chars)
    }

    fn key_findings(&self, transcript: &[String]) -> Vec<String> {
        transcript
            .iter()
            .map(|line| line.trim())
            .filter(|line| is_finding(line))
            .take(self.max_key_findings)
            .map(str::to_string)
            .collect()
    }
}

impl InsightGenerator for KeywordInsightGenerator {
    fn generate(&self, call_sid: &CallSid, transcript: &[String]) -> Insights {
        let summary = TranscriptSummary::new(
            call_sid.as_str(),
            self.summarize(transcript),
            self.key_findings(transcript),
        );

        let location = transcript.iter().find_map(|line| {
            find_address(line).map(|address| {
                LocationExtractionResult::from_text(call_sid.as_str(), address)
                    .with_confidence(ADDRESS_MATCH_CONFIDENCE)
            })
        });

        Insights { summary, location }
    }
}

fn is_finding(line: &str) -> bool {
    if line.is_empty() {
        return false;
    }
    if line.ends_with('?') {
        return true;
    }

    let lower = line.to_lowercase();
    lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| FINDING_CUES.contains(&word))
        || find_address(line).is_some()
}

/// First street address mentioned in `line`
fn find_address(line: &str) -> Option<&str> {
    STREET_ADDRESS.find(line).map(|m| m.as_str().trim())
}

/// Cut `text` to at most `max_chars` characters, never splitting a char
fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => text[..byte_index].trim_end().to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid() -> CallSid {
        CallSid::parse("CA123").unwrap()
    }

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_single_final_segment_becomes_summary() {
        let generator = KeywordInsightGenerator::new(600, 5);
        let insights = generator.generate(&sid(), &lines(&["Hello, how can I help"]));

        assert_eq!(insights.summary.call_sid, "CA123");
        assert_eq!(insights.summary.summary, "Hello, how can I help");
        assert_eq!(insights.summary.key_findings, vec!["Hello, how can I help"]);
        assert!(insights.location.is_none());
    }

    #[test]
    fn test_empty_transcript() {
        let generator = KeywordInsightGenerator::new(600, 5);
        let insights = generator.generate(&sid(), &[]);

        assert_eq!(insights.summary.summary, EMPTY_TRANSCRIPT_SUMMARY);
        assert!(insights.summary.key_findings.is_empty());
        assert!(insights.location.is_none());
    }

    #[test]
    fn test_extracts_street_address() {
        let generator = KeywordInsightGenerator::new(600, 5);
        let transcript = lines(&[
            "There is smoke everywhere",
            "We are at 742 Evergreen Terrace Road near the school",
        ]);
        let insights = generator.generate(&sid(), &transcript);

        let location = insights.location.unwrap();
        assert_eq!(
            location.raw_location_text.as_deref(),
            Some("742 Evergreen Terrace Road")
        );
        assert_eq!(location.confidence, Some(ADDRESS_MATCH_CONFIDENCE));
        assert!(location.latitude.is_none() && location.longitude.is_none());
        assert!(location.validate().is_ok());
    }

    #[test]
    fn test_street_address_pattern_compiles() {
        assert!(STREET_ADDRESS.is_match("12 Oak Street"));
        assert!(!STREET_ADDRESS.is_match("Oak Street"));
    }

    #[test]
    fn test_findings_are_capped() {
        let generator = KeywordInsightGenerator::new(600, 2);
        let transcript = lines(&["I need help", "Is anyone there?", "Please help", "ok"]);
        let insights = generator.generate(&sid(), &transcript);

        assert_eq!(insights.summary.key_findings, vec!["I need help", "Is anyone there?"]);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo");
        assert_eq!(truncate_chars("short", 50), "short");
    }
}

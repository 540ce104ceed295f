//! Auto-reply trigger matching.
//!
//! Inbound bodies are normalized (trim, lowercase, punctuation stripped,
//! whitespace collapsed) and compared against a fixed set of greeting
//! phrases. Matching is exact after normalization, so "Hi, Emma!" counts
//! but "Hello Emma" does not.

use std::sync::LazyLock;

use regex::Regex;

/// Greeting phrases that earn an auto-reply.
const TRIGGER_PHRASES: &[&str] = &["hi emma", "hey emma", "hi", "hey"];

static PUNCTUATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[[:punct:]]+").unwrap_or_else(|e| panic!("punctuation regex: {e}"))
});

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s+").unwrap_or_else(|e| panic!("whitespace regex: {e}"))
});

/// Normalize an inbound body for trigger comparison.
pub fn normalize(body: &str) -> String {
    let lowered = body.to_lowercase();
    let stripped = PUNCTUATION.replace_all(&lowered, " ");
    WHITESPACE.replace_all(&stripped, " ").trim().to_string()
}

/// Whether a raw inbound body should trigger the auto-reply.
pub fn matches_trigger(body: &str) -> bool {
    let normalized = normalize(body);
    TRIGGER_PHRASES.iter().any(|t| *t == normalized)
}

//! Pure extraction of model identity and token-usage counts from raw
//! response text.
//!
//! The upstream wire format is undocumented and versioned: usage metadata
//! appears either as plaintext JSON fragments (often with escaped quotes)
//! or inside base64 payloads embedded in an escaped envelope. Parsing is
//! pattern-based and fails soft — a miss returns `None` and is logged,
//! never an error, because transient upstream format drift is expected.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Token counts extracted from one response. Ephemeral: produced per
/// response, consumed immediately by the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedUsage {
    /// Cumulative prompt-side tokens reported by the service
    pub prompt_tokens: u64,
    /// Cumulative candidate (output) tokens
    pub candidates_tokens: u64,
    /// Explicit thinking-token breakdown, when the payload reports one
    pub thoughts_tokens: Option<u64>,
}

/// Known model identifiers, matched by pattern against response text.
/// Canonical names align with the model-rules table keys. Order matters:
/// more specific version strings first.
static KNOWN_MODELS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("Gemini 2.5 Pro", r"(?i)\b2\.5[ \-]?pro\b"),
        ("Gemini 2.5 Flash", r"(?i)\b2\.5[ \-]?flash\b"),
        ("Gemini 3 Pro", r"(?i)\b3(\.0)?[ \-]pro\b"),
        ("Gemini 3 Flash", r"(?i)\b3(\.0)?[ \-]flash\b"),
    ]
    .into_iter()
    .map(|(name, pattern)| (name, Regex::new(pattern).unwrap()))
    .collect()
});

// Quotes in the wire format may be escaped once (the usage JSON is nested
// inside a string literal), so every quote in these patterns tolerates a
// leading backslash.
static USAGE_ANCHOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\\?"usageMetadata\\?"\s*:"#).unwrap());
static PROMPT_COUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\\?"promptTokenCount\\?"\s*:\s*(\d+)"#).unwrap());
static CANDIDATES_COUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\\?"candidatesTokenCount\\?"\s*:\s*(\d+)"#).unwrap());
static THOUGHTS_COUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\\?"thoughtsTokenCount\\?"\s*:\s*(\d+)"#).unwrap());

/// Base64 runs long enough to plausibly hold a wrapped payload.
static EMBEDDED_B64: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\\?"([A-Za-z0-9+/=]{100,})\\?""#).unwrap());

/// Extract a known model identifier from response text.
///
/// Returns `None` when no known identifier is present — callers must
/// treat this as "keep previous model", not as failure.
pub fn parse_model_name(body: &str) -> Option<&'static str> {
    if let Some(name) = match_known_model(body) {
        return Some(name);
    }
    for decoded in decode_embedded_payloads(body) {
        if let Some(name) = match_known_model(&decoded) {
            return Some(name);
        }
    }
    None
}

fn match_known_model(text: &str) -> Option<&'static str> {
    KNOWN_MODELS
        .iter()
        .find(|(_, re)| re.is_match(text))
        .map(|(name, _)| *name)
}

/// Extract usage counts from response text.
///
/// A response may embed multiple usage-metadata blocks; only the final,
/// cumulative one is authoritative. Returns `None` when no block is
/// present or the two required counts cannot both be parsed — never a
/// partially-filled result.
pub fn parse_usage(body: &str) -> Option<ParsedUsage> {
    if let Some(usage) = usage_from_text(body) {
        return Some(usage);
    }

    // The service often wraps the metadata JSON in base64 inside an
    // escaped envelope; scan blobs and keep the last one that parses.
    let mut last = None;
    for decoded in decode_embedded_payloads(body) {
        if let Some(usage) = usage_from_text(&decoded) {
            last = Some(usage);
        }
    }
    if last.is_none() {
        debug!(
            response_len = body.len(),
            pattern = "usageMetadata",
            "no usage metadata in response"
        );
    }
    last
}

/// Find the last usage block in plain text and pull its counts.
fn usage_from_text(text: &str) -> Option<ParsedUsage> {
    let anchor = USAGE_ANCHOR.find_iter(text).last()?;
    let tail = &text[anchor.start()..];

    let prompt_tokens = capture_u64(&PROMPT_COUNT, tail)?;
    let candidates_tokens = capture_u64(&CANDIDATES_COUNT, tail)?;
    let thoughts_tokens = capture_u64(&THOUGHTS_COUNT, tail);

    Some(ParsedUsage {
        prompt_tokens,
        candidates_tokens,
        thoughts_tokens,
    })
}

fn capture_u64(re: &Regex, text: &str) -> Option<u64> {
    re.captures(text)?.get(1)?.as_str().parse().ok()
}

/// Decode base64 payloads embedded in the response envelope. Payloads
/// that fail to decode are skipped; only blobs mentioning usage or model
/// metadata are returned.
fn decode_embedded_payloads(body: &str) -> Vec<String> {
    EMBEDDED_B64
        .captures_iter(body)
        .filter_map(|caps| {
            let blob = caps.get(1)?.as_str();
            let bytes = BASE64.decode(blob).ok()?;
            let text = String::from_utf8_lossy(&bytes).into_owned();
            (text.contains("usageMetadata") || text.contains("version")).then_some(text)
        })
        .collect()
}

//! Structured extraction from captured agent output.
//!
//! The agent is instructed to terminate with a single completion marker,
//! `<ACCOMPLISHED success="BOOL">PAYLOAD</ACCOMPLISHED>`, where PAYLOAD is
//! meant to be one JSON object (raw text for message-reading tasks). In
//! practice the agent retries, the upstream LLM wraps objects in arrays or
//! mangles quoting, and runs die mid-emission, so extraction is layered:
//! markers newest-first, then a tolerant key/value scan of the payload,
//! then a loose price scan over the whole trace. Markers are never merged;
//! the newest usable one wins whole.

use crate::compare;
use crate::error::WatchError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, trace};

static MARKER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<ACCOMPLISHED\s+success="(true|false)"\s*>(.*?)</ACCOMPLISHED>"#)
        .expect("marker regex is valid")
});

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("tag regex is valid"));

// Tolerant patterns for payloads and traces with broken JSON. `\W+`
// absorbs whatever separator the agent improvised (":", "=", "is").
static KV_PRICE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)price\W+(\d+(?:\.\d+)?)").expect("price regex is valid"));
static KV_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)name\W+([A-Za-z0-9 ]+)").expect("name regex is valid"));
static KV_WEIGHT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)weight\W+(\d+(?:\.\d+)?\s*(?:kg|gm|g|ml|l)\b)").expect("weight regex is valid")
});

/// Outcome classification for one source record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// A usable price was recovered.
    Found,
    /// The agent reported the product as unavailable.
    NotFound,
    /// Nothing usable could be recovered.
    Error,
}

/// Structured result attributed to one target source.
///
/// Created by the extractor, consumed by the comparison engine and the
/// renderer; never mutated after creation. `status == Found` implies
/// `price` is present, and a normalized price is plain non-negative
/// numeric text with no currency symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Source identifier (platform name).
    pub platform: String,
    /// Selling price, currency-stripped.
    pub price: Option<String>,
    /// Secondary list price (MRP), currency-stripped.
    pub list_price: Option<String>,
    /// Quantity descriptor as the agent reported it (e.g., "500g").
    pub quantity: Option<String>,
    /// Price per normalized unit (per kg / per l), when derivable.
    pub unit_price: Option<f64>,
    /// Stock availability as reported.
    pub availability: Option<String>,
    /// Delivery estimate as reported.
    pub delivery: Option<String>,
    /// Product title as reported.
    pub title: Option<String>,
    /// Outcome classification.
    pub status: RecordStatus,
    /// Explanation when status is not `Found`.
    pub note: Option<String>,
}

impl SourceRecord {
    /// Creates an error record with the given note.
    #[must_use]
    pub fn error(platform: &str, note: &str) -> Self {
        Self {
            platform: platform.to_string(),
            price: None,
            list_price: None,
            quantity: None,
            unit_price: None,
            availability: None,
            delivery: None,
            title: None,
            status: RecordStatus::Error,
            note: Some(note.to_string()),
        }
    }

    /// Creates a not-found record with the given note.
    #[must_use]
    pub fn not_found(platform: &str, note: &str) -> Self {
        Self { status: RecordStatus::NotFound, ..Self::error(platform, note) }
    }

    /// Returns `true` when a usable price was recovered.
    #[must_use]
    pub fn is_found(&self) -> bool {
        self.status == RecordStatus::Found
    }
}

/// Shape of an LLM-produced payload, decided once at the parser boundary.
///
/// The upstream model sometimes wraps a single object in a one-element
/// array; that quirk is absorbed here instead of scattering shape checks
/// through callers.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadShape {
    /// A single JSON object.
    Object(Map<String, Value>),
    /// An array whose first element is an object; the rest is discarded.
    ArrayOfObject(Map<String, Value>),
    /// Not parseable as either.
    Unparseable,
}

impl PayloadShape {
    /// Classifies raw payload text.
    ///
    /// Single quotes are rewritten to double quotes first; the model
    /// produces Python-flavored quoting often enough that this rescue is
    /// worth the occasional false positive (which still ends up
    /// `Unparseable`).
    #[must_use]
    pub fn classify(payload: &str) -> Self {
        let cleaned = payload.trim().replace('\'', "\"");
        match serde_json::from_str::<Value>(&cleaned) {
            Ok(Value::Object(map)) => Self::Object(map),
            Ok(Value::Array(items)) => match items.into_iter().next() {
                Some(Value::Object(map)) => Self::ArrayOfObject(map),
                _ => Self::Unparseable,
            },
            _ => Self::Unparseable,
        }
    }

    /// Returns the payload object regardless of wrapping, if any.
    #[must_use]
    pub fn into_object(self) -> Option<Map<String, Value>> {
        match self {
            Self::Object(map) | Self::ArrayOfObject(map) => Some(map),
            Self::Unparseable => None,
        }
    }
}

/// Normalizes a price-like field to plain numeric text.
///
/// Strips currency symbols and thousands separators, keeps digits and the
/// first decimal point, and requires the remainder to parse as a
/// non-negative number. Returns `None` when nothing usable remains.
#[must_use]
pub fn normalize_price(raw: &str) -> Option<String> {
    let mut out = String::new();
    let mut seen_dot = false;
    for c in raw.chars() {
        if c.is_ascii_digit() {
            out.push(c);
        } else if c == '.' && !seen_dot {
            seen_dot = true;
            out.push('.');
        }
    }
    let value: f64 = out.parse().ok()?;
    (value >= 0.0).then_some(out)
}

/// Extracts a structured record from captured agent output.
///
/// Never raises: every failure mode degrades to a record with status
/// `NotFound` or `Error` and an explanatory note. Idempotent on a fixed
/// input.
#[must_use]
pub fn extract(captured: &str, platform: &str) -> SourceRecord {
    if captured.trim().is_empty() {
        return SourceRecord::error(platform, "parse failed");
    }

    let markers: Vec<(bool, &str)> = MARKER_RE
        .captures_iter(captured)
        .filter_map(|caps| {
            let success = caps.get(1)?.as_str().eq_ignore_ascii_case("true");
            Some((success, caps.get(2)?.as_str()))
        })
        .collect();

    // Most recent marker first: later markers supersede earlier
    // speculative ones when the agent retried internally.
    for (success, payload) in markers.iter().rev() {
        match record_from_marker(*success, payload, platform) {
            Ok(record) => {
                debug!(platform, status = ?record.status, "Record recovered from marker");
                return record;
            }
            Err(e) => trace!(platform, error = %e, "Marker unusable, trying older one"),
        }
    }

    // No marker yielded a usable record; scan the whole trace for a loose
    // price mention.
    if let Some(record) = loose_scan(captured, platform) {
        debug!(platform, "Record recovered from loose price scan");
        return record;
    }

    SourceRecord::error(platform, "parse failed")
}

/// Recovers the raw-text payload of a message-reading task.
///
/// Takes the newest `success="true"` marker, strips residual tags, and
/// rejects text that is clearly the agent narrating its own progress
/// rather than the message it was asked to read.
#[must_use]
pub fn extract_message(captured: &str) -> Option<String> {
    const STATUS_NOISE: [&str; 4] = ["successfully", "opened", "navigated", "completed"];

    for caps in MARKER_RE.captures_iter(captured).collect::<Vec<_>>().iter().rev() {
        if !caps.get(1)?.as_str().eq_ignore_ascii_case("true") {
            continue;
        }
        let payload = caps.get(2)?.as_str();
        let text = TAG_RE.replace_all(payload, "").trim().to_string();
        let lowered = text.to_lowercase();
        let is_noise = lowered.is_empty()
            || text.len() >= 200
            || matches!(lowered.as_str(), "none" | "null" | "no message")
            || STATUS_NOISE.iter().any(|word| lowered.contains(word));
        if !is_noise {
            return Some(text);
        }
    }
    None
}

/// Attempts to turn one marker into a usable record.
///
/// A `success="false"` marker is itself usable (it means the agent looked
/// and the product was not there); a `success="true"` marker without a
/// recoverable price is not, and the caller moves on to an older marker.
fn record_from_marker(
    success: bool,
    payload: &str,
    platform: &str,
) -> Result<SourceRecord, WatchError> {
    let shape = PayloadShape::classify(payload);

    if !success {
        let note = shape
            .into_object()
            .and_then(|map| map.get("note").and_then(value_to_text))
            .unwrap_or_else(|| "not found".to_string());
        return Ok(SourceRecord::not_found(platform, &note));
    }

    match shape.into_object() {
        Some(map) => record_from_map(&map, platform),
        None => record_from_loose_text(payload, platform).ok_or_else(|| {
            WatchError::ExtractionFailure("payload is neither JSON nor key/value text".to_string())
        }),
    }
}

/// Builds a found record from a payload object.
fn record_from_map(map: &Map<String, Value>, platform: &str) -> Result<SourceRecord, WatchError> {
    let price = map
        .get("price")
        .and_then(value_to_text)
        .and_then(|raw| normalize_price(&raw))
        .ok_or_else(|| {
            WatchError::ValidationFailure("price failed numeric normalization".to_string())
        })?;

    let quantity = field(map, &["weight", "quantity"]);
    let unit_price = derived_unit_price(&price, quantity.as_deref());

    Ok(SourceRecord {
        platform: platform.to_string(),
        price: Some(price),
        list_price: field(map, &["mrp", "list_price"]).and_then(|raw| normalize_price(&raw)),
        quantity,
        unit_price,
        availability: field(map, &["stock", "availability"]),
        delivery: field(map, &["delivery"]),
        title: field(map, &["name", "title"]),
        status: RecordStatus::Found,
        note: None,
    })
}

/// Flexible `price ... <number>` recovery over arbitrary text.
fn record_from_loose_text(text: &str, platform: &str) -> Option<SourceRecord> {
    let price = KV_PRICE_RE
        .captures(text)
        .and_then(|caps| normalize_price(caps.get(1)?.as_str()))?;
    let quantity =
        KV_WEIGHT_RE.captures(text).map(|caps| caps[1].split_whitespace().collect::<String>());
    let title = KV_NAME_RE.captures(text).map(|caps| caps[1].trim().to_string());
    let unit_price = derived_unit_price(&price, quantity.as_deref());

    Some(SourceRecord {
        platform: platform.to_string(),
        price: Some(price),
        list_price: None,
        quantity,
        unit_price,
        availability: None,
        delivery: None,
        title,
        status: RecordStatus::Found,
        note: None,
    })
}

fn loose_scan(captured: &str, platform: &str) -> Option<SourceRecord> {
    record_from_loose_text(captured, platform)
}

fn derived_unit_price(price: &str, quantity: Option<&str>) -> Option<f64> {
    let price: f64 = price.parse().ok()?;
    compare::unit_price(price, quantity?)
}

/// Reads the first present key as trimmed text.
fn field(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| map.get(*key).and_then(value_to_text))
}

fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty() && !trimmed.eq_ignore_ascii_case("n/a"))
                .then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

//! Lenient timestamp parsing for server payloads.
//!
//! The backend emits UTC instants with varying precision depending on which
//! service produced them. Every accepted shape maps to the same
//! `DateTime<Utc>` for the same instant.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};

/// Naive layouts tried after RFC 3339, all interpreted as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.fZ",
    "%Y-%m-%dT%H:%M:%SZ",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
];

/// Parse a wire timestamp.
///
/// Accepts RFC 3339 / ISO-8601 with or without fractional seconds and any
/// fractional precision (micro-, milli- or whole seconds), plus the same
/// layouts without a zone designator, which are read as UTC.
///
/// Returns `None` if no layout matches.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// `#[serde(deserialize_with = "...")]` helper for optional timestamps.
///
/// # Errors
///
/// Fails when the field is present but matches none of the accepted layouts.
pub fn deserialize_optional<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(s) => parse_timestamp(&s)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("unrecognised timestamp: {s}"))),
    }
}

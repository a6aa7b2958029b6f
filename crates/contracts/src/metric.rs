//! MetricRecord - decoded website-health observation
//!
//! Produced by the ingestion codec, consumed by the storage writer.

use serde::{Deserialize, Serialize};

/// Storage-assigned website identity
pub type WebsiteId = i64;

/// Storage-assigned metric identity
pub type MetricId = i64;

/// Bound of the `metrics.matched_text` column, in characters
pub const MATCHED_TEXT_MAX_CHARS: usize = 200;

/// Status code for a successful check
pub const STATUS_OK: i32 = 200;

/// Synthetic code used by the crawler for DNS lookup failures
pub const DNS_LOOKUP_ERROR_CODE: i32 = 404;

/// Synthetic code used by the crawler for connection timeouts
pub const NETWORK_TIMEOUT_ERROR_CODE: i32 = 599;

/// Synthetic code used by the crawler for unclassified failures
pub const UNKNOWN_ERROR_CODE: i32 = -1;

/// One website-health observation
///
/// Serializes to the broker wire format, so a record can be published back
/// (replay files, tests) with `serde_json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    /// Monitored url (unique key of the owning website)
    pub url: String,

    /// Pattern applied to the page content
    #[serde(rename = "regex_pattern")]
    pub regexp: String,

    /// HTTP status or synthetic failure code
    pub error_code: i32,

    /// Response time in seconds (`-1` when unknown)
    pub response_time: f64,

    /// Text matched by `regexp`, bounded to `MATCHED_TEXT_MAX_CHARS`
    pub matched_text: Option<String>,
}

impl MetricRecord {
    /// Create a record, truncating `matched_text` to the column bound
    pub fn new(
        url: impl Into<String>,
        regexp: impl Into<String>,
        error_code: i32,
        response_time: f64,
        matched_text: Option<String>,
    ) -> Self {
        Self {
            url: url.into(),
            regexp: regexp.into(),
            error_code,
            response_time,
            matched_text: matched_text.map(truncate_matched_text),
        }
    }

    /// Whether the check succeeded
    pub fn is_success(&self) -> bool {
        self.error_code == STATUS_OK
    }
}

/// Truncate on a char boundary to `MATCHED_TEXT_MAX_CHARS`
pub fn truncate_matched_text(text: String) -> String {
    match text.char_indices().nth(MATCHED_TEXT_MAX_CHARS) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundary() {
        let text = "é".repeat(MATCHED_TEXT_MAX_CHARS + 10);
        let truncated = truncate_matched_text(text);
        assert_eq!(truncated.chars().count(), MATCHED_TEXT_MAX_CHARS);
    }

    #[test]
    fn test_short_text_untouched() {
        assert_eq!(truncate_matched_text("Example".into()), "Example");
    }

    #[test]
    fn test_wire_field_names() {
        let record = MetricRecord::new("https://a.test", "Ex.*", 200, 0.25, None);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["regex_pattern"], "Ex.*");
        assert!(json["matched_text"].is_null());
        assert!(record.is_success());
    }
}

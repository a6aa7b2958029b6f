//! Broker payload codec
//!
//! Payloads are UTF-8 JSON objects with exactly five fields:
//! `url`, `regex_pattern`, `error_code`, `response_time`, `matched_text`.
//! Anything else (unknown field, missing field, wrong type) is a decode
//! error; a partially-populated record is never produced.

use bytes::Bytes;
use contracts::{ContractError, MetricRecord, RawMessage};
use serde::{Deserialize, Deserializer};

/// Wire shape of one metric message
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WireMetric {
    url: String,
    #[serde(deserialize_with = "present_or_null")]
    regex_pattern: Option<String>,
    error_code: WireErrorCode,
    response_time: f64,
    #[serde(deserialize_with = "present_or_null")]
    matched_text: Option<String>,
}

/// The crawler emits HTTP statuses as strings and synthetic codes as integers
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireErrorCode {
    Int(i64),
    Text(String),
}

impl WireErrorCode {
    fn to_code(&self) -> Result<i32, String> {
        let value = match self {
            Self::Int(v) => *v,
            Self::Text(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| format!("error_code '{s}' is not an integer"))?,
        };
        i32::try_from(value).map_err(|_| format!("error_code {value} out of range"))
    }
}

/// Field must be present; `null` is allowed
fn present_or_null<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)
}

/// Decode one raw broker message
///
/// # Errors
/// `ContractError::Decode` carrying the message offset.
pub fn decode(raw: &RawMessage) -> Result<MetricRecord, ContractError> {
    let wire: WireMetric = serde_json::from_slice(&raw.payload)
        .map_err(|e| ContractError::decode(raw.offset, e.to_string()))?;

    if wire.url.is_empty() {
        return Err(ContractError::decode(raw.offset, "url is empty"));
    }
    if !wire.response_time.is_finite() {
        return Err(ContractError::decode(
            raw.offset,
            "response_time is not a finite number",
        ));
    }
    let error_code = wire
        .error_code
        .to_code()
        .map_err(|message| ContractError::decode(raw.offset, message))?;

    Ok(MetricRecord::new(
        wire.url,
        wire.regex_pattern.unwrap_or_default(),
        error_code,
        wire.response_time,
        wire.matched_text,
    ))
}

/// Encode a record in the wire format (replay files, tests)
pub fn encode(record: &MetricRecord) -> Result<Bytes, ContractError> {
    serde_json::to_vec(record)
        .map(Bytes::from)
        .map_err(|e| ContractError::Other(format!("metric encode error: {e}")))
}

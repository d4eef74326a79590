use crate::error::{FetchError, PayloadError};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use std::fmt;

/// One sensor stream. `source_key` addresses the upstream payload, `name` is what
/// snapshots publish.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Channel {
    pub source_key: String,
    pub name: String,
}

impl Channel {
    pub fn new(source_key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            source_key: source_key.into(),
            name: name.into(),
        }
    }

    pub fn plain(key: impl Into<String>) -> Self {
        let key = key.into();
        Self::new(key.clone(), key)
    }

    pub fn matches(&self, reference: &str) -> bool {
        self.source_key == reference || self.name == reference
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Opaque version marker of one upstream delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchToken(String);

impl BatchToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Token for deliveries that carry no timestamp: identical values hash identically.
    pub fn from_values(values: &[f64]) -> Self {
        let mut hasher = Sha256::new();
        for value in values {
            hasher.update(value.to_bits().to_le_bytes());
        }
        let digest = hasher.finalize();
        let hex: String = digest.iter().map(|byte| format!("{byte:02x}")).collect();
        Self(format!("sha256:{hex}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BatchToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Readings of one channel from one upstream delivery; every reading shares `token`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingBatch {
    pub channel: String,
    pub token: BatchToken,
    pub readings: Vec<f64>,
}

impl ReadingBatch {
    pub fn new(channel: impl Into<String>, token: BatchToken, values: &[f64]) -> Self {
        Self {
            channel: channel.into(),
            token,
            readings: values.to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.readings.iter().copied()
    }
}

/// Outcome of parsing one upstream response.
#[derive(Debug, Default)]
pub struct ParsedPoll {
    pub batches: Vec<ReadingBatch>,
    pub missing: Vec<String>,
    pub rejected: Vec<(String, PayloadError)>,
}

/// Splits an upstream response into one batch per configured channel.
///
/// Only a payload that is not a JSON object fails the whole poll; every per-channel
/// problem lands in `missing` or `rejected` and the other channels proceed.
pub fn parse_source_payload(
    payload: &mut [u8],
    channels: &[Channel],
    batch_size: usize,
) -> Result<ParsedPoll, FetchError> {
    let root: JsonValue = simd_json::serde::from_slice(payload)
        .map_err(|err| FetchError::Malformed(err.to_string()))?;
    let JsonValue::Object(root) = root else {
        return Err(FetchError::Malformed("top-level value is not an object".into()));
    };

    let mut parsed = ParsedPoll::default();
    for channel in channels {
        let entry = match root.get(&channel.source_key) {
            None | Some(JsonValue::Null) => {
                parsed.missing.push(channel.name.clone());
                continue;
            }
            Some(entry) => entry,
        };
        match parse_channel_entry(&channel.name, entry, batch_size) {
            Ok(Some(batch)) => parsed.batches.push(batch),
            Ok(None) => parsed.missing.push(channel.name.clone()),
            Err(err) => parsed.rejected.push((channel.name.clone(), err)),
        }
    }
    Ok(parsed)
}

fn parse_channel_entry(
    channel: &str,
    entry: &JsonValue,
    batch_size: usize,
) -> Result<Option<ReadingBatch>, PayloadError> {
    let JsonValue::Object(obj) = entry else {
        return Err(PayloadError::Malformed("entry is not an object".into()));
    };

    let raw_values: Vec<&JsonValue> = match obj.get("value") {
        None | Some(JsonValue::Null) => return Ok(None),
        Some(JsonValue::Array(items)) if items.is_empty() => return Ok(None),
        Some(JsonValue::Array(items)) => items.iter().collect(),
        Some(single) => vec![single],
    };

    let mut values: Vec<f64> = raw_values.into_iter().filter_map(numeric_value).collect();
    if values.is_empty() {
        return Err(PayloadError::NoValidValues);
    }
    if values.len() < batch_size {
        return Err(PayloadError::ShortBatch {
            got: values.len(),
            want: batch_size,
        });
    }
    values.truncate(batch_size);

    let token = obj
        .get("timestamp")
        .and_then(token_value)
        .unwrap_or_else(|| BatchToken::from_values(&values));

    Ok(Some(ReadingBatch::new(channel, token, &values)))
}

fn numeric_value(value: &JsonValue) -> Option<f64> {
    let parsed = match value {
        JsonValue::Number(number) => number.as_f64(),
        JsonValue::String(raw) => raw.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

fn token_value(value: &JsonValue) -> Option<BatchToken> {
    match value {
        JsonValue::String(raw) => {
            let trimmed = raw.trim();
            (!trimmed.is_empty()).then(|| BatchToken::new(trimmed))
        }
        JsonValue::Number(number) => Some(BatchToken::new(number.to_string())),
        _ => None,
    }
}

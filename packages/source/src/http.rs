//! JSON-over-HTTP observation source.
//!
//! Accepts either a bare JSON array of observations or an object with an
//! `observations` array. Elements that do not deserialize as a whole are
//! decoded field by field: a bad optional field is dropped, and a bad
//! required field is kept as the record's `decode_error` so the ingest step
//! reports it individually.

use async_trait::async_trait;
use climate_map_observation_models::RawObservation;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::retry::{self, RetryPolicy};
use crate::{ObservationSource, SourceError};

/// Fetches observation batches from an HTTP endpoint.
pub struct HttpSource {
    id: String,
    url: String,
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl HttpSource {
    #[must_use]
    pub fn new(id: impl Into<String>, url: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            client: reqwest::Client::new(),
            policy,
        }
    }
}

#[async_trait]
impl ObservationSource for HttpSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn fetch(&self) -> Result<Vec<RawObservation>, SourceError> {
        log::info!("{}: fetching {}", self.id, self.url);
        let body = retry::send_json(&self.policy, || self.client.get(&self.url)).await?;
        let batch = parse_observations(body)?;
        log::info!("{}: received {} records", self.id, batch.len());
        Ok(batch)
    }
}

/// Extracts raw observations from a JSON payload.
///
/// # Errors
///
/// Returns [`SourceError::Payload`] if the payload is neither an array nor
/// an object with an `observations` array.
pub fn parse_observations(body: serde_json::Value) -> Result<Vec<RawObservation>, SourceError> {
    let items = match body {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut map) => match map.remove("observations") {
            Some(serde_json::Value::Array(items)) => items,
            _ => {
                return Err(SourceError::Payload {
                    message: "object payload without an `observations` array".to_string(),
                });
            }
        },
        other => {
            return Err(SourceError::Payload {
                message: format!("expected an array of observations, got {other}"),
            });
        }
    };

    Ok(items.into_iter().map(lenient_record).collect())
}

fn lenient_record(item: Value) -> RawObservation {
    let e = match serde_json::from_value::<RawObservation>(item.clone()) {
        Ok(raw) => return raw,
        Err(e) => e,
    };
    let Value::Object(fields) = item else {
        log::warn!("Undecodable observation: {e}");
        return RawObservation {
            decode_error: Some(e.to_string()),
            ..RawObservation::default()
        };
    };

    let mut defects = Vec::new();
    let raw = RawObservation {
        id: required(&fields, "id", &mut defects).unwrap_or_default(),
        lat: required(&fields, "lat", &mut defects),
        lon: required(&fields, "lon", &mut defects),
        metric_type: required(&fields, "metricType", &mut defects).unwrap_or_default(),
        value: required(&fields, "value", &mut defects),
        timestamp: optional(&fields, "timestamp"),
        source: optional(&fields, "source").unwrap_or_default(),
        decode_error: None,
    };

    if defects.is_empty() {
        return raw;
    }
    let reason = defects.join("; ");
    log::warn!("Undecodable observation {:?}: {reason}", raw.id);
    RawObservation {
        decode_error: Some(reason),
        ..raw
    }
}

fn required<T: DeserializeOwned>(
    fields: &Map<String, Value>,
    name: &str,
    defects: &mut Vec<String>,
) -> Option<T> {
    match fields.get(name) {
        None | Some(Value::Null) => None,
        Some(v) => match serde_json::from_value(v.clone()) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                defects.push(format!("{name}: {e}"));
                None
            }
        },
    }
}

fn optional<T: DeserializeOwned>(fields: &Map<String, Value>, name: &str) -> Option<T> {
    match fields.get(name) {
        None | Some(Value::Null) => None,
        Some(v) => serde_json::from_value(v.clone())
            .inspect_err(|e| log::debug!("Dropping undecodable {name}: {e}"))
            .ok(),
    }
}

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt::Debug;

use crate::{config::Config, error::SyncError, planner::RequestSpec};

pub mod openmeteo;
pub mod retry;

pub use openmeteo::OpenMeteoClient;
pub use retry::RetryPolicy;

/// Decoded response for one location of a batch.
///
/// Series blocks (`hourly`, `daily`, `minutely_15`) and the `current` object
/// are kept as raw JSON; the normalizer checks their shape.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LocationPayload {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub elevation: Option<f64>,
    pub generationtime_ms: Option<f64>,
    #[serde(default)]
    pub utc_offset_seconds: i64,
    pub timezone: Option<String>,
    pub timezone_abbreviation: Option<String>,
    #[serde(flatten)]
    pub blocks: Map<String, Value>,
}

impl LocationPayload {
    pub fn block(&self, key: &str) -> Option<&Value> {
        self.blocks.get(key)
    }
}

/// Columnar response for a whole batch, one entry per requested location in
/// request order.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPayload {
    pub locations: Vec<LocationPayload>,
}

impl RawPayload {
    /// Decode a response body. A single-location request yields an object,
    /// a multi-location request an array of objects.
    pub fn decode(request: &RequestSpec, body: &str) -> Result<Self, SyncError> {
        let failed = |detail: String| SyncError::RequestFailed {
            locations: request.location_names(),
            status: None,
            detail,
        };

        let value: Value =
            serde_json::from_str(body).map_err(|e| failed(format!("malformed JSON: {e}")))?;

        let items = match value {
            Value::Array(items) => items,
            Value::Object(ref obj) if obj.get("error").and_then(Value::as_bool) == Some(true) => {
                return Err(failed(provider_reason(obj)));
            }
            obj @ Value::Object(_) => vec![obj],
            other => {
                return Err(failed(format!(
                    "expected an object or array, got {}",
                    json_kind(&other)
                )));
            }
        };

        let locations = items
            .into_iter()
            .map(serde_json::from_value::<LocationPayload>)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| failed(format!("unexpected payload shape: {e}")))?;

        Ok(Self { locations })
    }
}

/// Source of weather payloads for planned requests.
#[async_trait]
pub trait WeatherApi: Send + Sync + Debug {
    async fn fetch(&self, request: &RequestSpec) -> Result<RawPayload, SyncError>;
}

/// Construct the HTTP-backed provider from a validated config.
pub fn provider_from_config(config: &Config) -> anyhow::Result<OpenMeteoClient> {
    OpenMeteoClient::new(&config.api)
}

pub(crate) fn provider_reason(obj: &Map<String, Value>) -> String {
    obj.get("reason")
        .and_then(Value::as_str)
        .unwrap_or("provider reported an error without a reason")
        .to_string()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

use thiserror::Error;

use crate::stream::StreamKind;

/// Validation failures raised while turning a raw configuration into a [`crate::Config`].
///
/// Any of these aborts the run before a single request is made.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("no locations configured")]
    NoLocationsConfigured,

    #[error("duplicate location name '{0}'")]
    DuplicateLocation(String),

    #[error(
        "invalid coordinate for location '{location}': latitude {latitude}, longitude {longitude}"
    )]
    InvalidCoordinate {
        location: String,
        latitude: f64,
        longitude: f64,
    },

    #[error("invalid variable '{value}' for stream {stream}")]
    InvalidVariable { stream: StreamKind, value: String },

    #[error("invalid date range: start_date {start} is after end_date {end}")]
    InvalidDateRange { start: String, end: String },

    #[error("{field} = {value} is out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
}

/// Errors produced by the sync engine.
///
/// Only [`SyncError::Config`], [`SyncError::InvalidState`] and [`SyncError::Sink`] stop a run.
/// The rest are caught at the batch boundary and turned into per-location failures.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid prior state for {stream}/{location}: '{value}'")]
    InvalidState {
        stream: String,
        location: String,
        value: String,
    },

    #[error("no applicable variables for stream {stream}")]
    NoApplicableVariables { stream: StreamKind },

    #[error("request failed for [{}] (status {}): {detail}", .locations.join(", "), status_label(.status))]
    RequestFailed {
        locations: Vec<String>,
        status: Option<u16>,
        detail: String,
    },

    #[error("payload shape mismatch for {stream} at '{location}': {detail}")]
    PayloadShapeMismatch {
        stream: StreamKind,
        location: String,
        detail: String,
    },

    #[error("output sink error: {0}")]
    Sink(#[from] SinkError),
}

impl SyncError {
    /// Whether the error stops the whole run rather than a single batch.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Config(_) | SyncError::InvalidState { .. } | SyncError::Sink(_)
        )
    }
}

/// Failures while writing to the output boundary.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn status_label(status: &Option<u16>) -> String {
    status.map_or_else(|| "none".to_string(), |s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_failed_message_lists_locations_and_status() {
        let err = SyncError::RequestFailed {
            locations: vec!["Berlin".into(), "Paris".into()],
            status: Some(400),
            detail: "bad request".into(),
        };

        let msg = err.to_string();
        assert!(msg.contains("Berlin, Paris"));
        assert!(msg.contains("status 400"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn config_errors_are_fatal() {
        let err = SyncError::from(ConfigError::NoLocationsConfigured);
        assert!(err.is_fatal());
        assert!(err.to_string().contains("no locations configured"));
    }
}

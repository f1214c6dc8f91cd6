use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of streams this engine knows how to sync.
///
/// Each variant selects its own request shape and normalization strategy
/// through explicit `match`es rather than a trait object per stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    #[serde(rename = "weather_forecast")]
    Forecast,
    #[serde(rename = "weather_hourly")]
    Hourly,
    #[serde(rename = "weather_daily")]
    Daily,
    #[serde(rename = "weather_current")]
    Current,
    #[serde(rename = "weather_minutely_15")]
    Minutely15,
    #[serde(rename = "weather_historical")]
    Historical,
}

/// How a stream's payload is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamShape {
    /// One record per location describing the forecast itself.
    Metadata,
    /// One record per location from a single `current` object.
    Instant,
    /// One record per time step from a columnar block.
    Series,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Forecast => "weather_forecast",
            StreamKind::Hourly => "weather_hourly",
            StreamKind::Daily => "weather_daily",
            StreamKind::Current => "weather_current",
            StreamKind::Minutely15 => "weather_minutely_15",
            StreamKind::Historical => "weather_historical",
        }
    }

    pub const fn all() -> &'static [StreamKind] {
        &[
            StreamKind::Forecast,
            StreamKind::Hourly,
            StreamKind::Daily,
            StreamKind::Current,
            StreamKind::Minutely15,
            StreamKind::Historical,
        ]
    }

    /// Streams synced when the configuration does not name any.
    pub const fn defaults() -> &'static [StreamKind] {
        &[StreamKind::Forecast, StreamKind::Hourly, StreamKind::Daily]
    }

    /// Endpoint path appended to the API base URL.
    pub fn path(&self) -> &'static str {
        match self {
            StreamKind::Historical => "/v1/archive",
            _ => "/v1/forecast",
        }
    }

    /// Name of the query parameter carrying the variable list, which is also
    /// the key of the response block holding the values.
    pub fn block_key(&self) -> &'static str {
        match self {
            StreamKind::Forecast | StreamKind::Hourly | StreamKind::Historical => "hourly",
            StreamKind::Daily => "daily",
            StreamKind::Current => "current",
            StreamKind::Minutely15 => "minutely_15",
        }
    }

    pub fn shape(&self) -> StreamShape {
        match self {
            StreamKind::Forecast => StreamShape::Metadata,
            StreamKind::Current => StreamShape::Instant,
            _ => StreamShape::Series,
        }
    }

    pub fn is_time_series(&self) -> bool {
        self.shape() == StreamShape::Series
    }

    /// Whether the stream keeps a per-location replication cursor.
    pub fn is_incremental(&self) -> bool {
        self.is_time_series()
    }

    /// Distance between two consecutive time steps.
    pub fn step(&self) -> Option<Duration> {
        match self {
            StreamKind::Hourly | StreamKind::Historical => Some(Duration::hours(1)),
            StreamKind::Daily => Some(Duration::days(1)),
            StreamKind::Minutely15 => Some(Duration::minutes(15)),
            StreamKind::Forecast | StreamKind::Current => None,
        }
    }

    /// Record field holding the step timestamp.
    pub fn timestamp_field(&self) -> &'static str {
        match self {
            StreamKind::Forecast => "generated_at",
            StreamKind::Daily => "date",
            _ => "time",
        }
    }

    /// Whether the stream's request carries an explicit date window.
    pub fn is_windowed(&self) -> bool {
        !matches!(self, StreamKind::Current)
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for StreamKind {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        StreamKind::all()
            .iter()
            .copied()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| {
                format!(
                    "Unknown stream '{value}'. Available streams: {}.",
                    StreamKind::all()
                        .iter()
                        .map(StreamKind::as_str)
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            })
    }
}

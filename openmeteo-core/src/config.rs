use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fs, path::Path, path::PathBuf, time::Duration};
use tracing::warn;

use crate::{error::ConfigError, model::Location, stream::StreamKind};

pub mod variables;

use variables::VariableList;

pub const DEFAULT_API_URL: &str = "https://api.open-meteo.com";
pub const DEFAULT_TIMEZONE: &str = "auto";
pub const DEFAULT_FORECAST_DAYS: i64 = 7;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Upper bound on locations per request. The provider limits the URL
/// length, so large location sets are split into chunks of this size.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 50;
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    #[default]
    Celsius,
    Fahrenheit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindSpeedUnit {
    #[default]
    Kmh,
    Ms,
    Mph,
    Kn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrecipitationUnit {
    #[default]
    Mm,
    Inch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeFormat {
    #[default]
    Iso8601,
    Unixtime,
}

/// Provider policy for picking the grid cell that represents a coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellSelection {
    #[default]
    Land,
    Sea,
    Nearest,
}

impl TemperatureUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemperatureUnit::Celsius => "celsius",
            TemperatureUnit::Fahrenheit => "fahrenheit",
        }
    }
}

impl WindSpeedUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindSpeedUnit::Kmh => "kmh",
            WindSpeedUnit::Ms => "ms",
            WindSpeedUnit::Mph => "mph",
            WindSpeedUnit::Kn => "kn",
        }
    }
}

impl PrecipitationUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrecipitationUnit::Mm => "mm",
            PrecipitationUnit::Inch => "inch",
        }
    }
}

impl TimeFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeFormat::Iso8601 => "iso8601",
            TimeFormat::Unixtime => "unixtime",
        }
    }
}

impl CellSelection {
    pub fn as_str(&self) -> &'static str {
        match self {
            CellSelection::Land => "land",
            CellSelection::Sea => "sea",
            CellSelection::Nearest => "nearest",
        }
    }
}

/// Configuration document as supplied by the caller.
///
/// Unknown fields are ignored and every missing field takes its default.
/// Example TOML:
///
/// ```toml
/// forecast_days = 3
/// hourly_variables = ["temperature_2m"]
///
/// [[locations]]
/// name = "Berlin"
/// latitude = 52.52
/// longitude = 13.41
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub locations: Vec<Location>,
    pub api_key: Option<String>,
    pub api_url: String,
    /// Overrides the base URL of the historical (archive) endpoint only.
    pub historical_api_url: Option<String>,
    pub forecast_days: i64,
    pub past_days: i64,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub hourly_variables: Option<Vec<String>>,
    pub daily_variables: Option<Vec<String>>,
    pub current_variables: Option<Vec<String>>,
    pub minutely_15_variables: Option<Vec<String>>,
    pub temperature_unit: TemperatureUnit,
    pub wind_speed_unit: WindSpeedUnit,
    pub precipitation_unit: PrecipitationUnit,
    pub timeformat: TimeFormat,
    pub timezone: String,
    pub models: Vec<String>,
    pub cell_selection: CellSelection,
    pub tilt: Option<f64>,
    pub azimuth: Option<f64>,
    pub streams_to_sync: Vec<String>,
    pub user_agent: Option<String>,
    /// Seconds.
    pub request_timeout: u64,
    pub max_retries: u32,
    pub max_batch_size: usize,
    pub max_concurrent_requests: usize,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            locations: Vec::new(),
            api_key: None,
            api_url: DEFAULT_API_URL.to_string(),
            historical_api_url: None,
            forecast_days: DEFAULT_FORECAST_DAYS,
            past_days: 0,
            start_date: None,
            end_date: None,
            hourly_variables: None,
            daily_variables: None,
            current_variables: None,
            minutely_15_variables: None,
            temperature_unit: TemperatureUnit::default(),
            wind_speed_unit: WindSpeedUnit::default(),
            precipitation_unit: PrecipitationUnit::default(),
            timeformat: TimeFormat::default(),
            timezone: DEFAULT_TIMEZONE.to_string(),
            models: Vec::new(),
            cell_selection: CellSelection::default(),
            tilt: None,
            azimuth: None,
            streams_to_sync: StreamKind::defaults()
                .iter()
                .map(|s| s.as_str().to_string())
                .collect(),
            user_agent: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
        }
    }
}

impl RawConfig {
    /// Load a configuration file. `.json` files are parsed as JSON, anything else as TOML.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let cfg = if is_json {
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config file: {}", path.display()))?
        } else {
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?
        };

        Ok(cfg)
    }

    /// Default config location in the platform config directory.
    pub fn default_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("com", "open-meteo", "tap-openmeteo")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.json"))
    }
}

/// Connection settings for the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiSettings {
    pub base_url: String,
    pub historical_url: String,
    pub api_key: Option<String>,
    pub user_agent: Option<String>,
    pub request_timeout: Duration,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Units {
    pub temperature: TemperatureUnit,
    pub wind_speed: WindSpeedUnit,
    pub precipitation: PrecipitationUnit,
}

/// Validated, normalized configuration. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub locations: Vec<Location>,
    pub api: ApiSettings,
    pub forecast_days: u32,
    pub past_days: u32,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub hourly_variables: Vec<String>,
    pub daily_variables: Vec<String>,
    pub current_variables: Vec<String>,
    pub minutely_15_variables: Vec<String>,
    pub units: Units,
    pub timeformat: TimeFormat,
    pub timezone: String,
    pub models: Vec<String>,
    pub cell_selection: CellSelection,
    pub tilt: Option<f64>,
    pub azimuth: Option<f64>,
    /// Active streams in caller order, unknown names dropped.
    pub streams: Vec<StreamKind>,
    pub max_batch_size: usize,
    pub max_concurrent_requests: usize,
}

impl TryFrom<RawConfig> for Config {
    type Error = ConfigError;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        Config::validate(raw)
    }
}

impl Config {
    /// Validate a raw configuration and apply defaults.
    pub fn validate(raw: RawConfig) -> Result<Self, ConfigError> {
        validate_locations(&raw.locations)?;

        let forecast_days = check_range("forecast_days", raw.forecast_days, 0, 16)?;
        let past_days = check_range("past_days", raw.past_days, 0, 92)?;
        check_range("max_batch_size", raw.max_batch_size as i64, 1, 1000)?;
        check_range(
            "max_concurrent_requests",
            raw.max_concurrent_requests as i64,
            1,
            64,
        )?;
        check_range("request_timeout", raw.request_timeout as i64, 1, 600)?;

        if let Some(tilt) = raw.tilt {
            check_float_range("tilt", tilt, 0.0, 90.0)?;
        }
        if let Some(azimuth) = raw.azimuth {
            check_float_range("azimuth", azimuth, -180.0, 180.0)?;
        }

        let hourly_variables = resolve_variables(VariableList::Hourly, raw.hourly_variables)?;
        let daily_variables = resolve_variables(VariableList::Daily, raw.daily_variables)?;
        let current_variables = resolve_variables(VariableList::Current, raw.current_variables)?;
        let minutely_15_variables =
            resolve_variables(VariableList::Minutely15, raw.minutely_15_variables)?;

        if let (Some(start), Some(end)) = (raw.start_date, raw.end_date) {
            if start > end {
                return Err(ConfigError::InvalidDateRange {
                    start: start.to_string(),
                    end: end.to_string(),
                });
            }
        }

        let base_url = raw.api_url.trim_end_matches('/').to_string();
        let historical_url = raw
            .historical_api_url
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| base_url.clone());

        Ok(Self {
            locations: raw.locations,
            api: ApiSettings {
                base_url,
                historical_url,
                api_key: raw.api_key.filter(|k| !k.is_empty()),
                user_agent: raw.user_agent.filter(|ua| !ua.is_empty()),
                request_timeout: Duration::from_secs(raw.request_timeout),
                max_retries: raw.max_retries,
            },
            forecast_days,
            past_days,
            start_date: raw.start_date,
            end_date: raw.end_date,
            hourly_variables,
            daily_variables,
            current_variables,
            minutely_15_variables,
            units: Units {
                temperature: raw.temperature_unit,
                wind_speed: raw.wind_speed_unit,
                precipitation: raw.precipitation_unit,
            },
            timeformat: raw.timeformat,
            timezone: raw.timezone,
            models: raw.models,
            cell_selection: raw.cell_selection,
            tilt: raw.tilt,
            azimuth: raw.azimuth,
            streams: resolve_streams(&raw.streams_to_sync),
            max_batch_size: raw.max_batch_size,
            max_concurrent_requests: raw.max_concurrent_requests,
        })
    }

    /// Turn the validated model back into the document it was built from,
    /// with every default made explicit.
    pub fn to_raw(&self) -> RawConfig {
        RawConfig {
            locations: self.locations.clone(),
            api_key: self.api.api_key.clone(),
            api_url: self.api.base_url.clone(),
            historical_api_url: Some(self.api.historical_url.clone()),
            forecast_days: i64::from(self.forecast_days),
            past_days: i64::from(self.past_days),
            start_date: self.start_date,
            end_date: self.end_date,
            hourly_variables: Some(self.hourly_variables.clone()),
            daily_variables: Some(self.daily_variables.clone()),
            current_variables: Some(self.current_variables.clone()),
            minutely_15_variables: Some(self.minutely_15_variables.clone()),
            temperature_unit: self.units.temperature,
            wind_speed_unit: self.units.wind_speed,
            precipitation_unit: self.units.precipitation,
            timeformat: self.timeformat,
            timezone: self.timezone.clone(),
            models: self.models.clone(),
            cell_selection: self.cell_selection,
            tilt: self.tilt,
            azimuth: self.azimuth,
            streams_to_sync: self.streams.iter().map(|s| s.as_str().to_string()).collect(),
            user_agent: self.api.user_agent.clone(),
            request_timeout: self.api.request_timeout.as_secs(),
            max_retries: self.api.max_retries,
            max_batch_size: self.max_batch_size,
            max_concurrent_requests: self.max_concurrent_requests,
        }
    }

    /// Variables requested for a stream. May be empty.
    pub fn variables(&self, stream: StreamKind) -> Vec<String> {
        match stream {
            StreamKind::Forecast => vec![
                self.hourly_variables
                    .first()
                    .cloned()
                    .unwrap_or_else(|| variables::METADATA_FALLBACK.to_string()),
            ],
            StreamKind::Hourly | StreamKind::Historical => self.hourly_variables.clone(),
            StreamKind::Daily => self.daily_variables.clone(),
            StreamKind::Current => self.current_variables.clone(),
            StreamKind::Minutely15 => self.minutely_15_variables.clone(),
        }
    }

    /// Base URL serving a stream's endpoint.
    pub fn base_url(&self, stream: StreamKind) -> &str {
        match stream {
            StreamKind::Historical => &self.api.historical_url,
            _ => &self.api.base_url,
        }
    }

    pub fn timezone_for<'a>(&'a self, location: &'a Location) -> &'a str {
        location
            .timezone
            .as_deref()
            .filter(|tz| !tz.is_empty())
            .unwrap_or(&self.timezone)
    }
}

fn validate_locations(locations: &[Location]) -> Result<(), ConfigError> {
    if locations.is_empty() {
        return Err(ConfigError::NoLocationsConfigured);
    }

    let mut seen = HashSet::new();
    for loc in locations {
        if !seen.insert(loc.name.as_str()) {
            return Err(ConfigError::DuplicateLocation(loc.name.clone()));
        }

        let lat_ok = loc.latitude.is_finite() && (-90.0..=90.0).contains(&loc.latitude);
        let lon_ok = loc.longitude.is_finite() && (-180.0..=180.0).contains(&loc.longitude);
        if !lat_ok || !lon_ok {
            return Err(ConfigError::InvalidCoordinate {
                location: loc.name.clone(),
                latitude: loc.latitude,
                longitude: loc.longitude,
            });
        }
    }

    Ok(())
}

fn check_range(field: &'static str, value: i64, min: i64, max: i64) -> Result<u32, ConfigError> {
    if (min..=max).contains(&value) {
        // max is always well below u32::MAX
        Ok(value as u32)
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value: value as f64,
            min: min as f64,
            max: max as f64,
        })
    }
}

fn check_float_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

fn resolve_variables(
    list: VariableList,
    configured: Option<Vec<String>>,
) -> Result<Vec<String>, ConfigError> {
    let vars = configured
        .unwrap_or_else(|| list.defaults().iter().map(|v| v.to_string()).collect());

    if let Some(bad) = vars.iter().find(|v| !list.contains(v)) {
        return Err(ConfigError::InvalidVariable {
            stream: list.stream(),
            value: bad.clone(),
        });
    }

    Ok(vars)
}

fn resolve_streams(names: &[String]) -> Vec<StreamKind> {
    let mut streams = Vec::new();

    for name in names {
        match StreamKind::try_from(name.as_str()) {
            Ok(kind) if !streams.contains(&kind) => streams.push(kind),
            Ok(_) => {}
            Err(reason) => warn!(stream = %name, "{reason}"),
        }
    }

    streams
}

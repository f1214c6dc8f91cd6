//! Fixed variable catalogs accepted per stream kind, plus the defaults used
//! when a configuration leaves a list unset.

use crate::stream::StreamKind;

pub const HOURLY: &[&str] = &[
    "temperature_2m",
    "relative_humidity_2m",
    "dew_point_2m",
    "apparent_temperature",
    "precipitation_probability",
    "precipitation",
    "rain",
    "showers",
    "snowfall",
    "snow_depth",
    "weather_code",
    "pressure_msl",
    "surface_pressure",
    "cloud_cover",
    "cloud_cover_low",
    "cloud_cover_mid",
    "cloud_cover_high",
    "visibility",
    "evapotranspiration",
    "et0_fao_evapotranspiration",
    "vapour_pressure_deficit",
    "wind_speed_10m",
    "wind_speed_80m",
    "wind_speed_120m",
    "wind_speed_180m",
    "wind_direction_10m",
    "wind_direction_80m",
    "wind_direction_120m",
    "wind_direction_180m",
    "wind_gusts_10m",
    "temperature_80m",
    "temperature_120m",
    "temperature_180m",
    "soil_temperature_0cm",
    "soil_temperature_6cm",
    "soil_temperature_18cm",
    "soil_temperature_54cm",
    "soil_moisture_0_to_1cm",
    "soil_moisture_1_to_3cm",
    "soil_moisture_3_to_9cm",
    "soil_moisture_9_to_27cm",
    "soil_moisture_27_to_81cm",
    "uv_index",
    "uv_index_clear_sky",
    "is_day",
    "sunshine_duration",
    "shortwave_radiation",
    "direct_radiation",
    "diffuse_radiation",
    "direct_normal_irradiance",
    "global_tilted_irradiance",
    "terrestrial_radiation",
    "cape",
    "freezing_level_height",
];

pub const DAILY: &[&str] = &[
    "weather_code",
    "temperature_2m_max",
    "temperature_2m_min",
    "apparent_temperature_max",
    "apparent_temperature_min",
    "sunrise",
    "sunset",
    "daylight_duration",
    "sunshine_duration",
    "uv_index_max",
    "uv_index_clear_sky_max",
    "precipitation_sum",
    "rain_sum",
    "showers_sum",
    "snowfall_sum",
    "precipitation_hours",
    "precipitation_probability_max",
    "wind_speed_10m_max",
    "wind_gusts_10m_max",
    "wind_direction_10m_dominant",
    "shortwave_radiation_sum",
    "et0_fao_evapotranspiration",
];

pub const MINUTELY_15: &[&str] = &[
    "temperature_2m",
    "relative_humidity_2m",
    "dew_point_2m",
    "precipitation",
    "rain",
    "snowfall",
    "weather_code",
    "wind_speed_10m",
    "wind_direction_10m",
    "wind_gusts_10m",
    "shortwave_radiation",
    "direct_radiation",
    "diffuse_radiation",
    "sunshine_duration",
    "visibility",
    "cape",
    "lightning_potential",
    "is_day",
];

// The current block accepts any hourly variable.
pub const CURRENT: &[&str] = HOURLY;

pub const DEFAULT_HOURLY: &[&str] = &[
    "temperature_2m",
    "relative_humidity_2m",
    "precipitation",
    "weather_code",
    "wind_speed_10m",
    "wind_direction_10m",
];

pub const DEFAULT_DAILY: &[&str] = &[
    "weather_code",
    "temperature_2m_max",
    "temperature_2m_min",
    "precipitation_sum",
    "sunrise",
    "sunset",
];

pub const DEFAULT_CURRENT: &[&str] = &[
    "temperature_2m",
    "relative_humidity_2m",
    "apparent_temperature",
    "is_day",
    "precipitation",
    "weather_code",
    "cloud_cover",
    "wind_speed_10m",
    "wind_direction_10m",
];

/// Variable requested by the forecast-metadata stream when no hourly variable is configured.
pub const METADATA_FALLBACK: &str = "temperature_2m";

/// Which configuration list a variable-bearing stream draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableList {
    Hourly,
    Daily,
    Current,
    Minutely15,
}

impl VariableList {
    pub fn catalog(&self) -> &'static [&'static str] {
        match self {
            VariableList::Hourly => HOURLY,
            VariableList::Daily => DAILY,
            VariableList::Current => CURRENT,
            VariableList::Minutely15 => MINUTELY_15,
        }
    }

    pub fn defaults(&self) -> &'static [&'static str] {
        match self {
            VariableList::Hourly => DEFAULT_HOURLY,
            VariableList::Daily => DEFAULT_DAILY,
            VariableList::Current => DEFAULT_CURRENT,
            VariableList::Minutely15 => &[],
        }
    }

    /// Stream reported in validation errors for this list.
    pub fn stream(&self) -> StreamKind {
        match self {
            VariableList::Hourly => StreamKind::Hourly,
            VariableList::Daily => StreamKind::Daily,
            VariableList::Current => StreamKind::Current,
            VariableList::Minutely15 => StreamKind::Minutely15,
        }
    }

    pub fn contains(&self, variable: &str) -> bool {
        self.catalog().contains(&variable)
    }
}

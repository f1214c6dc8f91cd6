//! Turns the configuration and the current cursors into outbound requests.
//!
//! All non-location parameters are global to a config, so locations of a
//! stream normally share one request. Batches are split only by elevation
//! presence (the provider needs an elevation per coordinate or none at all)
//! and by the configured maximum batch size.

use chrono::{Duration, NaiveDate};
use tracing::debug;

use crate::{
    config::{CellSelection, Config, PrecipitationUnit, TemperatureUnit, TimeFormat, WindSpeedUnit},
    error::SyncError,
    model::{DATE_FORMAT, DateWindow, Location},
    state::CursorStore,
    stream::StreamKind,
};

/// Days of archive data fetched when no `start_date` is configured.
pub const DEFAULT_HISTORICAL_DAYS: i64 = 30;

/// A single outbound API request covering one or more locations.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    pub stream: StreamKind,
    pub url: String,
    pub locations: Vec<Location>,
    pub variables: Vec<String>,
    pub window: Option<DateWindow>,
    params: Vec<(&'static str, String)>,
}

impl RequestSpec {
    /// Query parameters in the order they are sent.
    pub fn query(&self) -> &[(&'static str, String)] {
        &self.params
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn location_names(&self) -> Vec<String> {
        self.locations.iter().map(|l| l.name.clone()).collect()
    }
}

/// Requests for one stream, plus the locations that needed none.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub stream: StreamKind,
    pub requests: Vec<RequestSpec>,
    /// Locations whose cursor already covers the whole window.
    pub up_to_date: Vec<String>,
}

#[derive(Debug)]
pub struct RequestPlanner<'a> {
    config: &'a Config,
    today: NaiveDate,
}

impl<'a> RequestPlanner<'a> {
    pub fn new(config: &'a Config, today: NaiveDate) -> Self {
        Self { config, today }
    }

    /// Date window for a stream before any cursor clamping.
    pub fn base_window(&self, stream: StreamKind) -> Option<DateWindow> {
        if !stream.is_windowed() {
            return None;
        }

        match stream {
            StreamKind::Historical => {
                let start = self
                    .config
                    .start_date
                    .unwrap_or(self.today - Duration::days(DEFAULT_HISTORICAL_DAYS));
                let end = self
                    .config
                    .end_date
                    .unwrap_or(self.today - Duration::days(1));
                Some(DateWindow::new(start, end))
            }
            _ => Some(DateWindow::new(
                self.today - Duration::days(i64::from(self.config.past_days)),
                self.today + Duration::days(i64::from(self.config.forecast_days)),
            )),
        }
    }

    /// Plan every request needed to cover the configured locations for `stream`.
    pub fn plan(&self, stream: StreamKind, cursors: &CursorStore) -> Result<Plan, SyncError> {
        let variables = self.config.variables(stream);
        if variables.is_empty() {
            return Err(SyncError::NoApplicableVariables { stream });
        }

        let base = self.base_window(stream);
        let mut up_to_date = Vec::new();
        let mut due: Vec<(&Location, Option<DateWindow>)> = Vec::new();

        for location in &self.config.locations {
            let window = base.map(|w| self.clamp_to_cursor(stream, location, w, cursors));

            match window {
                Some(w) if w.is_empty() => {
                    debug!(%stream, location = %location.name, "Location is up to date");
                    up_to_date.push(location.name.clone());
                }
                _ => due.push((location, window)),
            }
        }

        let requests = self
            .batches(due)
            .into_iter()
            .map(|members| self.build_request(stream, &variables, members))
            .collect();

        Ok(Plan {
            stream,
            requests,
            up_to_date,
        })
    }

    fn clamp_to_cursor(
        &self,
        stream: StreamKind,
        location: &Location,
        window: DateWindow,
        cursors: &CursorStore,
    ) -> DateWindow {
        if !stream.is_incremental() {
            return window;
        }

        match (cursors.get(stream, &location.name), stream.step()) {
            (Some(cursor), Some(step)) => window.clamp_start((cursor + step).date()),
            _ => window,
        }
    }

    /// Group locations by shared parameters, then split into fixed-size
    /// chunks. Original location order is kept within each group.
    fn batches<'l>(
        &self,
        due: Vec<(&'l Location, Option<DateWindow>)>,
    ) -> Vec<Vec<(&'l Location, Option<DateWindow>)>> {
        let mut groups: Vec<(bool, Vec<(&'l Location, Option<DateWindow>)>)> = Vec::new();

        for entry in due {
            let key = entry.0.elevation.is_some();
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, members)) => members.push(entry),
                None => groups.push((key, vec![entry])),
            }
        }

        groups
            .into_iter()
            .flat_map(|(_, members)| {
                members
                    .chunks(self.config.max_batch_size)
                    .map(<[_]>::to_vec)
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    fn build_request(
        &self,
        stream: StreamKind,
        variables: &[String],
        members: Vec<(&Location, Option<DateWindow>)>,
    ) -> RequestSpec {
        let cfg = self.config;

        // The batch starts at its earliest member; the normalizer drops
        // steps a member has already emitted.
        let window = members
            .iter()
            .filter_map(|(_, w)| *w)
            .reduce(|acc, w| DateWindow::new(acc.start.min(w.start), acc.end.max(w.end)));

        let locations: Vec<Location> = members.into_iter().map(|(l, _)| l.clone()).collect();

        let mut params: Vec<(&'static str, String)> = vec![
            ("latitude", join(locations.iter().map(|l| l.latitude))),
            ("longitude", join(locations.iter().map(|l| l.longitude))),
        ];

        if locations.iter().all(|l| l.elevation.is_some()) {
            params.push((
                "elevation",
                join(locations.iter().filter_map(|l| l.elevation)),
            ));
        }

        let timezones: Vec<&str> = locations.iter().map(|l| cfg.timezone_for(l)).collect();
        let timezone = if timezones.iter().all(|tz| *tz == timezones[0]) {
            timezones[0].to_string()
        } else {
            timezones.join(",")
        };
        params.push(("timezone", timezone));

        params.push((stream.block_key(), variables.join(",")));

        if let Some(w) = window {
            params.push(("start_date", w.start.format(DATE_FORMAT).to_string()));
            params.push(("end_date", w.end.format(DATE_FORMAT).to_string()));
        }

        if cfg.units.temperature != TemperatureUnit::Celsius {
            params.push(("temperature_unit", cfg.units.temperature.as_str().to_string()));
        }
        if cfg.units.wind_speed != WindSpeedUnit::Kmh {
            params.push(("wind_speed_unit", cfg.units.wind_speed.as_str().to_string()));
        }
        if cfg.units.precipitation != PrecipitationUnit::Mm {
            params.push((
                "precipitation_unit",
                cfg.units.precipitation.as_str().to_string(),
            ));
        }
        if cfg.timeformat != TimeFormat::Iso8601 {
            params.push(("timeformat", cfg.timeformat.as_str().to_string()));
        }
        if !cfg.models.is_empty() {
            params.push(("models", cfg.models.join(",")));
        }
        if cfg.cell_selection != CellSelection::Land {
            params.push(("cell_selection", cfg.cell_selection.as_str().to_string()));
        }
        if let Some(key) = &cfg.api.api_key {
            params.push(("apikey", key.clone()));
        }
        if let Some(tilt) = cfg.tilt {
            params.push(("tilt", tilt.to_string()));
        }
        if let Some(azimuth) = cfg.azimuth {
            params.push(("azimuth", azimuth.to_string()));
        }

        RequestSpec {
            stream,
            url: format!("{}{}", cfg.base_url(stream), stream.path()),
            locations,
            variables: variables.to_vec(),
            window,
            params,
        }
    }
}

fn join<I>(values: I) -> String
where
    I: IntoIterator<Item = f64>,
{
    values
        .into_iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

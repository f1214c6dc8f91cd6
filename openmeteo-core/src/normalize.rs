//! Flattens columnar provider payloads into one record per time step (or per
//! location for point-in-time streams).
//!
//! Shape checks run for every location of a batch before the first record is
//! produced, so a mismatch yields no records for the batch at all. The
//! returned [`Records`] iterator is lazy and single-pass.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde_json::{Map, Value, json};

use crate::{
    config::Config,
    error::SyncError,
    model::{DATE_FORMAT, Location, NormalizedRecord, format_timestamp, parse_timestamp},
    planner::RequestSpec,
    provider::{LocationPayload, RawPayload},
    state::CursorStore,
    stream::{StreamKind, StreamShape},
};

#[derive(Debug, Clone, Copy)]
pub struct Normalizer<'a> {
    config: &'a Config,
    generated_at: DateTime<Utc>,
}

impl<'a> Normalizer<'a> {
    pub fn new(config: &'a Config, generated_at: DateTime<Utc>) -> Self {
        Self {
            config,
            generated_at,
        }
    }

    /// Verify the payload against its request and return the record sequence.
    ///
    /// Steps at or before a location's existing cursor are skipped.
    pub fn normalize(
        &self,
        request: &'a RequestSpec,
        payload: &'a RawPayload,
        cursors: &CursorStore,
    ) -> Result<Records<'a>, SyncError> {
        let stream = request.stream;

        if payload.locations.len() != request.locations.len() {
            return Err(SyncError::PayloadShapeMismatch {
                stream,
                location: request.location_names().join(", "),
                detail: format!(
                    "expected {} location payloads, got {}",
                    request.locations.len(),
                    payload.locations.len()
                ),
            });
        }

        let frames = request
            .locations
            .iter()
            .zip(&payload.locations)
            .map(|(location, lp)| {
                let body = match stream.shape() {
                    StreamShape::Metadata => FrameBody::Metadata,
                    StreamShape::Instant => instant_body(stream, location, lp)?,
                    StreamShape::Series => {
                        let floor = if stream.is_incremental() {
                            cursors.get(stream, &location.name)
                        } else {
                            None
                        };
                        series_body(request, location, lp, floor)?
                    }
                };
                Ok(Frame {
                    location,
                    payload: lp,
                    body,
                })
            })
            .collect::<Result<Vec<_>, SyncError>>()?;

        Ok(Records {
            stream,
            variables: &request.variables,
            config: self.config,
            generated_at: self.generated_at,
            frames,
            frame: 0,
            step: 0,
        })
    }
}

/// Lazy sequence of records for one batch.
#[derive(Debug)]
pub struct Records<'a> {
    stream: StreamKind,
    variables: &'a [String],
    config: &'a Config,
    generated_at: DateTime<Utc>,
    frames: Vec<Frame<'a>>,
    frame: usize,
    step: usize,
}

#[derive(Debug)]
struct Frame<'a> {
    location: &'a Location,
    payload: &'a LocationPayload,
    body: FrameBody<'a>,
}

#[derive(Debug)]
enum FrameBody<'a> {
    Metadata,
    Instant {
        current: &'a Map<String, Value>,
        time: Option<NaiveDateTime>,
    },
    Series {
        times: Vec<NaiveDateTime>,
        /// Provider values of `time`, kept for exact epochs in unixtime mode.
        raw_times: &'a [Value],
        /// One entry per requested variable; `None` when the provider omitted it.
        columns: Vec<Option<&'a Vec<Value>>>,
        floor: Option<NaiveDateTime>,
    },
}

impl Iterator for Records<'_> {
    type Item = NormalizedRecord;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let frame = self.frames.get(self.frame)?;

            match &frame.body {
                FrameBody::Series {
                    times,
                    raw_times,
                    columns,
                    floor,
                } => {
                    while self.step < times.len() {
                        let i = self.step;
                        self.step += 1;
                        if floor.is_some_and(|f| times[i] <= f) {
                            continue;
                        }
                        return Some(self.series_record(
                            frame,
                            times[i],
                            &raw_times[i],
                            columns,
                            i,
                        ));
                    }
                }
                FrameBody::Instant { current, time } => {
                    if self.step == 0 {
                        self.step = 1;
                        return Some(self.instant_record(frame, current, *time));
                    }
                }
                FrameBody::Metadata => {
                    if self.step == 0 {
                        self.step = 1;
                        return Some(self.metadata_record(frame));
                    }
                }
            }

            self.frame += 1;
            self.step = 0;
        }
    }
}

impl Records<'_> {
    fn base_fields(frame: &Frame<'_>) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("location_name".into(), json!(frame.location.name));
        fields.insert("latitude".into(), json!(frame.payload.latitude));
        fields.insert("longitude".into(), json!(frame.payload.longitude));
        fields
    }

    fn series_record(
        &self,
        frame: &Frame<'_>,
        ts: NaiveDateTime,
        raw_time: &Value,
        columns: &[Option<&Vec<Value>>],
        i: usize,
    ) -> NormalizedRecord {
        let mut fields = Self::base_fields(frame);

        match self.stream {
            StreamKind::Daily => {
                fields.insert("date".into(), json!(ts.format(DATE_FORMAT).to_string()));
            }
            StreamKind::Hourly => {
                fields.insert("time".into(), json!(format_timestamp(ts)));
                fields.insert(
                    "time_unix".into(),
                    json!(unix_time(ts, raw_time, frame.payload.utc_offset_seconds)),
                );
            }
            StreamKind::Historical => {
                fields.insert("time".into(), json!(format_timestamp(ts)));
                fields.insert("date".into(), json!(ts.format(DATE_FORMAT).to_string()));
            }
            _ => {
                fields.insert("time".into(), json!(format_timestamp(ts)));
            }
        }

        for (var, column) in self.variables.iter().zip(columns) {
            let value = column
                .and_then(|values| values.get(i))
                .cloned()
                .unwrap_or(Value::Null);
            fields.insert(var.clone(), value);
        }

        NormalizedRecord {
            stream: self.stream,
            location: frame.location.name.clone(),
            timestamp: Some(ts),
            fields,
        }
    }

    fn instant_record(
        &self,
        frame: &Frame<'_>,
        current: &Map<String, Value>,
        time: Option<NaiveDateTime>,
    ) -> NormalizedRecord {
        let mut fields = Self::base_fields(frame);
        fields.insert("time".into(), json!(time.map(format_timestamp)));
        fields.insert(
            "interval".into(),
            current.get("interval").cloned().unwrap_or(Value::Null),
        );

        for var in self.variables {
            fields.insert(
                var.clone(),
                current.get(var).cloned().unwrap_or(Value::Null),
            );
        }

        NormalizedRecord {
            stream: self.stream,
            location: frame.location.name.clone(),
            timestamp: time,
            fields,
        }
    }

    fn metadata_record(&self, frame: &Frame<'_>) -> NormalizedRecord {
        let lp = frame.payload;
        let cfg = self.config;
        let mut fields = Self::base_fields(frame);

        fields.insert("elevation".into(), json!(lp.elevation));
        fields.insert("timezone".into(), json!(lp.timezone));
        fields.insert("timezone_abbreviation".into(), json!(lp.timezone_abbreviation));
        fields.insert("utc_offset_seconds".into(), json!(lp.utc_offset_seconds));
        fields.insert("generationtime_ms".into(), json!(lp.generationtime_ms));
        fields.insert("generated_at".into(), json!(self.generated_at.to_rfc3339()));
        fields.insert("forecast_days".into(), json!(cfg.forecast_days));
        fields.insert("past_days".into(), json!(cfg.past_days));
        fields.insert("hourly_variables".into(), json!(cfg.hourly_variables.join(",")));
        fields.insert("daily_variables".into(), json!(cfg.daily_variables.join(",")));

        NormalizedRecord {
            stream: self.stream,
            location: frame.location.name.clone(),
            timestamp: None,
            fields,
        }
    }
}

fn mismatch(stream: StreamKind, location: &Location, detail: impl Into<String>) -> SyncError {
    SyncError::PayloadShapeMismatch {
        stream,
        location: location.name.clone(),
        detail: detail.into(),
    }
}

fn series_body<'a>(
    request: &'a RequestSpec,
    location: &Location,
    lp: &'a LocationPayload,
    floor: Option<NaiveDateTime>,
) -> Result<FrameBody<'a>, SyncError> {
    let stream = request.stream;
    let key = stream.block_key();

    let block = lp
        .block(key)
        .and_then(Value::as_object)
        .ok_or_else(|| mismatch(stream, location, format!("missing '{key}' block")))?;

    let raw_times = block
        .get("time")
        .and_then(Value::as_array)
        .ok_or_else(|| mismatch(stream, location, format!("'{key}.time' is not an array")))?;

    let times = raw_times
        .iter()
        .map(|v| parse_step(v, lp.utc_offset_seconds))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| mismatch(stream, location, format!("unparseable timestamp in '{key}.time'")))?;

    let columns = request
        .variables
        .iter()
        .map(|var| match block.get(var) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Array(values)) if values.len() == times.len() => Ok(Some(values)),
            Some(Value::Array(values)) => Err(mismatch(
                stream,
                location,
                format!(
                    "'{key}.{var}' has {} values for {} timestamps",
                    values.len(),
                    times.len()
                ),
            )),
            Some(_) => Err(mismatch(
                stream,
                location,
                format!("'{key}.{var}' is not an array"),
            )),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(FrameBody::Series {
        times,
        raw_times: raw_times.as_slice(),
        columns,
        floor,
    })
}

fn instant_body<'a>(
    stream: StreamKind,
    location: &Location,
    lp: &'a LocationPayload,
) -> Result<FrameBody<'a>, SyncError> {
    let key = stream.block_key();
    let current = lp
        .block(key)
        .and_then(Value::as_object)
        .ok_or_else(|| mismatch(stream, location, format!("missing '{key}' object")))?;

    let time = current
        .get("time")
        .and_then(|v| parse_step(v, lp.utc_offset_seconds));

    Ok(FrameBody::Instant { current, time })
}

/// Parse a step timestamp into provider-local wall-clock time. Unix
/// timestamps are shifted by the location's UTC offset.
///
/// The provider reports one `utc_offset_seconds` per location, valid at the
/// start of the window. Local times of steps after a DST change in the same
/// window are therefore off by the DST delta.
fn parse_step(value: &Value, utc_offset_seconds: i64) -> Option<NaiveDateTime> {
    match value {
        Value::String(s) => parse_timestamp(s),
        Value::Number(n) => {
            let utc = DateTime::from_timestamp(n.as_i64()?, 0)?;
            Some(utc.naive_utc() + Duration::seconds(utc_offset_seconds))
        }
        _ => None,
    }
}

/// Epoch seconds of a step. Exact when the provider sent unix time; derived
/// from local time and the single reported offset otherwise.
fn unix_time(local: NaiveDateTime, raw: &Value, utc_offset_seconds: i64) -> i64 {
    raw.as_i64().unwrap_or_else(|| {
        (local - Duration::seconds(utc_offset_seconds))
            .and_utc()
            .timestamp()
    })
}

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use openmeteo_core::{
    Config, CursorStore, Location, MemorySink, Orchestrator, RawConfig, RawPayload, RequestSpec,
    StateSnapshot, StreamKind, SyncError, WeatherApi, model::format_timestamp,
    sync::FailureKind,
};
use serde_json::json;
use std::{
    fmt,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration as StdDuration,
};

type Handler = Box<dyn Fn(&RequestSpec) -> Result<String, SyncError> + Send + Sync>;
type Latency = Box<dyn Fn(&RequestSpec) -> StdDuration + Send + Sync>;

/// Answers every request through a closure and remembers what it was asked.
struct ScriptedApi {
    handler: Handler,
    latency: Option<Latency>,
    requests: Mutex<Vec<RequestSpec>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedApi {
    fn new(handler: impl Fn(&RequestSpec) -> Result<String, SyncError> + Send + Sync + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            latency: None,
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Delay each answer by a per-request amount.
    fn with_latency(mut self, latency: impl Fn(&RequestSpec) -> StdDuration + Send + Sync + 'static) -> Self {
        self.latency = Some(Box::new(latency));
        self
    }

    fn requests(&self) -> Vec<RequestSpec> {
        self.requests.lock().unwrap().clone()
    }

    fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for ScriptedApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedApi").finish_non_exhaustive()
    }
}

#[async_trait]
impl WeatherApi for ScriptedApi {
    async fn fetch(&self, request: &RequestSpec) -> Result<RawPayload, SyncError> {
        self.requests.lock().unwrap().push(request.clone());
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);

        if let Some(latency) = &self.latency {
            tokio::time::sleep(latency(request)).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let body = (self.handler)(request)?;
        RawPayload::decode(request, &body)
    }
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 10).unwrap()
}

fn now() -> DateTime<Utc> {
    today().and_hms_opt(9, 15, 0).unwrap().and_utc()
}

fn berlin() -> Location {
    Location {
        name: "Berlin".into(),
        latitude: 52.52,
        longitude: 13.41,
        elevation: None,
        timezone: None,
    }
}

fn paris() -> Location {
    Location {
        name: "Paris".into(),
        latitude: 48.85,
        longitude: 2.35,
        elevation: None,
        timezone: None,
    }
}

/// Hourly steps covering the request window, optionally starting `widen`
/// days early to mimic a provider returning more than was asked for.
fn hourly_steps(request: &RequestSpec, widen: i64) -> Vec<NaiveDateTime> {
    let window = request.window.expect("hourly requests carry a window");
    let start = (window.start - Duration::days(widen)).and_hms_opt(0, 0, 0).unwrap();
    let end = window.end.and_hms_opt(23, 0, 0).unwrap();

    let mut steps = Vec::new();
    let mut ts = start;
    while ts <= end {
        steps.push(ts);
        ts += Duration::hours(1);
    }
    steps
}

fn hourly_body(request: &RequestSpec, widen: i64) -> String {
    let steps = hourly_steps(request, widen);
    let times: Vec<_> = steps.iter().map(|ts| format_timestamp(*ts)).collect();
    let temps: Vec<_> = (0..steps.len()).map(|i| i as f64 / 10.0).collect();

    let per_location: Vec<_> = request
        .locations
        .iter()
        .map(|l| {
            json!({
                "latitude": l.latitude,
                "longitude": l.longitude,
                "utc_offset_seconds": 3600,
                "timezone": "Europe/Berlin",
                "hourly": {"time": times, "temperature_2m": temps},
            })
        })
        .collect();

    if per_location.len() == 1 {
        per_location[0].to_string()
    } else {
        json!(per_location).to_string()
    }
}

/// Hourly payload starting at today's midnight with a per-location number
/// of steps.
fn stepped_body(request: &RequestSpec, steps_for: impl Fn(&Location) -> usize) -> String {
    let midnight = today().and_hms_opt(0, 0, 0).unwrap();

    let per_location: Vec<_> = request
        .locations
        .iter()
        .map(|l| {
            let steps = steps_for(l);
            let times: Vec<_> = (0..steps)
                .map(|h| format_timestamp(midnight + Duration::hours(h as i64)))
                .collect();
            let temps: Vec<_> = (0..steps).map(|h| h as f64).collect();
            json!({
                "latitude": l.latitude,
                "longitude": l.longitude,
                "hourly": {"time": times, "temperature_2m": temps},
            })
        })
        .collect();

    json!(per_location).to_string()
}

fn numbered_locations(count: usize) -> Vec<Location> {
    (0..count)
        .map(|i| Location {
            name: format!("L{i}"),
            latitude: 40.0 + i as f64,
            longitude: 5.0,
            elevation: None,
            timezone: None,
        })
        .collect()
}

fn hourly_config(locations: Vec<Location>, tweak: impl FnOnce(&mut RawConfig)) -> Config {
    let mut raw = RawConfig {
        locations,
        hourly_variables: Some(vec!["temperature_2m".into()]),
        streams_to_sync: vec!["weather_hourly".into()],
        ..RawConfig::default()
    };
    tweak(&mut raw);
    Config::validate(raw).unwrap()
}

#[tokio::test]
async fn single_location_hourly_run() {
    let config = hourly_config(vec![berlin()], |raw| raw.forecast_days = 1);
    let api = ScriptedApi::new(|req| Ok(hourly_body(req, 0)));
    let mut cursors = CursorStore::new();
    let mut sink = MemorySink::new();

    let report = Orchestrator::new(&config, &api, &mut cursors)
        .with_now(now())
        .run(&mut sink)
        .await
        .unwrap();

    let requests = api.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].param("start_date"), Some("2026-03-10"));
    assert_eq!(requests[0].param("end_date"), Some("2026-03-11"));
    assert_eq!(requests[0].param("hourly"), Some("temperature_2m"));

    let records: Vec<_> = sink.records_for(StreamKind::Hourly).collect();
    assert!((24..=48).contains(&records.len()));
    for record in &records {
        assert_eq!(record.get("location_name"), Some(&json!("Berlin")));
        assert!(record.get("time").is_some());
        assert!(record.get("temperature_2m").is_some());
    }

    let last = records.last().unwrap().timestamp.unwrap();
    assert_eq!(cursors.get(StreamKind::Hourly, "Berlin"), Some(last));
    assert_eq!(
        report.state.cursor(StreamKind::Hourly, "Berlin"),
        Some("2026-03-11T23:00")
    );
    assert!(report.is_clean());
    assert_eq!(sink.states.last(), Some(&report.state));
}

#[tokio::test]
async fn failed_batch_advances_no_cursor() {
    let config = hourly_config(vec![berlin(), paris()], |_| {});
    let api = ScriptedApi::new(|req| {
        Err(SyncError::RequestFailed {
            locations: req.location_names(),
            status: Some(500),
            detail: "connection reset after 3 attempts".into(),
        })
    });
    let mut cursors = CursorStore::new();
    let mut sink = MemorySink::new();

    let report = Orchestrator::new(&config, &api, &mut cursors)
        .with_now(now())
        .run(&mut sink)
        .await
        .unwrap();

    let requests = api.requests();
    assert_eq!(requests.len(), 1, "both locations share one batch");
    assert_eq!(requests[0].param("latitude"), Some("52.52,48.85"));

    let failed: Vec<_> = report
        .failures_for(StreamKind::Hourly)
        .map(|f| (f.location.as_str(), f.kind))
        .collect();
    assert_eq!(
        failed,
        [
            ("Berlin", FailureKind::RequestFailed),
            ("Paris", FailureKind::RequestFailed)
        ]
    );
    assert!(sink.records.is_empty());
    assert_eq!(cursors.get(StreamKind::Hourly, "Berlin"), None);
    assert_eq!(cursors.get(StreamKind::Hourly, "Paris"), None);
    assert!(report.state.bookmarks.is_empty());
}

#[tokio::test]
async fn minutely_stream_without_variables_is_skipped() {
    let config = hourly_config(vec![berlin()], |raw| {
        raw.streams_to_sync = vec!["weather_minutely_15".into(), "weather_hourly".into()];
    });
    let api = ScriptedApi::new(|req| Ok(hourly_body(req, 0)));
    let mut cursors = CursorStore::new();
    let mut sink = MemorySink::new();

    let report = Orchestrator::new(&config, &api, &mut cursors)
        .with_now(now())
        .run(&mut sink)
        .await
        .unwrap();

    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].stream, StreamKind::Minutely15);
    assert!(report.skipped[0].reason.contains("no applicable variables"));
    assert!(api.requests().iter().all(|r| r.stream == StreamKind::Hourly));
    assert!(report.records_for(StreamKind::Hourly) > 0);
    assert!(report.is_clean());
}

#[tokio::test]
async fn rerun_resumes_after_cursor_without_duplicates() {
    let config = hourly_config(vec![berlin()], |raw| {
        raw.past_days = 2;
        raw.forecast_days = 1;
    });
    let yesterday_last_hour = (today() - Duration::days(1)).and_hms_opt(23, 0, 0).unwrap();
    let prior: StateSnapshot = serde_json::from_value(json!({
        "bookmarks": {"weather_hourly": {"Berlin": format_timestamp(yesterday_last_hour)}}
    }))
    .unwrap();
    let mut cursors = CursorStore::from_snapshot(&prior).unwrap();

    // The provider hands back a day more than requested.
    let api = ScriptedApi::new(|req| Ok(hourly_body(req, 1)));
    let mut sink = MemorySink::new();

    Orchestrator::new(&config, &api, &mut cursors)
        .with_now(now())
        .run(&mut sink)
        .await
        .unwrap();

    let requests = api.requests();
    assert_eq!(requests[0].param("start_date"), Some("2026-03-10"));
    assert_eq!(requests[0].param("end_date"), Some("2026-03-11"));

    let times: Vec<_> = sink.records.iter().filter_map(|r| r.timestamp).collect();
    assert_eq!(times.len(), 48);
    assert!(times.iter().all(|ts| *ts > yesterday_last_hour));
    assert_eq!(times.first(), today().and_hms_opt(0, 0, 0).as_ref());
}

#[tokio::test]
async fn second_run_with_exported_state_fetches_nothing_new() {
    let config = hourly_config(vec![berlin()], |raw| raw.forecast_days = 1);
    let api = ScriptedApi::new(|req| Ok(hourly_body(req, 0)));

    let mut cursors = CursorStore::new();
    let first = Orchestrator::new(&config, &api, &mut cursors)
        .with_now(now())
        .run(&mut MemorySink::new())
        .await
        .unwrap();

    let mut cursors = CursorStore::from_snapshot(&first.state).unwrap();
    let mut sink = MemorySink::new();
    let second = Orchestrator::new(&config, &api, &mut cursors)
        .with_now(now())
        .run(&mut sink)
        .await
        .unwrap();

    assert_eq!(api.requests().len(), 1);
    assert!(sink.records.is_empty());
    assert_eq!(second.up_to_date, vec![(StreamKind::Hourly, "Berlin".to_string())]);
    assert_eq!(second.state, first.state);
}

#[tokio::test]
async fn shape_mismatch_emits_nothing_for_the_batch() {
    let config = hourly_config(vec![berlin()], |raw| raw.forecast_days = 1);
    let api = ScriptedApi::new(|_| {
        Ok(r#"{"hourly": {"time": ["2026-03-10T00:00", "2026-03-10T01:00"], "temperature_2m": [1.0]}}"#.into())
    });
    let mut cursors = CursorStore::new();
    let mut sink = MemorySink::new();

    let report = Orchestrator::new(&config, &api, &mut cursors)
        .with_now(now())
        .run(&mut sink)
        .await
        .unwrap();

    assert!(sink.records.is_empty());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].kind, FailureKind::PayloadShapeMismatch);
    assert!(report.failures[0].detail.contains("1 values for 2 timestamps"));
    assert_eq!(cursors.get(StreamKind::Hourly, "Berlin"), None);
}

#[tokio::test]
async fn provider_nulls_pass_through() {
    let config = hourly_config(vec![berlin()], |raw| {
        raw.hourly_variables = Some(vec!["temperature_2m".into(), "rain".into()]);
    });
    let api = ScriptedApi::new(|_| {
        Ok(r#"{"hourly": {"time": ["2026-03-10T00:00"], "temperature_2m": [null]}}"#.into())
    });
    let mut cursors = CursorStore::new();
    let mut sink = MemorySink::new();

    Orchestrator::new(&config, &api, &mut cursors)
        .with_now(now())
        .run(&mut sink)
        .await
        .unwrap();

    assert_eq!(sink.records.len(), 1);
    assert_eq!(sink.records[0].get("temperature_2m"), Some(&json!(null)));
    assert_eq!(sink.records[0].get("rain"), Some(&json!(null)));
}

#[tokio::test]
async fn successful_batch_advances_each_member_to_its_own_latest_step() {
    let config = hourly_config(vec![berlin(), paris()], |raw| raw.forecast_days = 1);
    let prior: StateSnapshot = serde_json::from_value(json!({
        "bookmarks": {"weather_hourly": {"Paris": "2026-03-10T01:00"}}
    }))
    .unwrap();
    let mut cursors = CursorStore::from_snapshot(&prior).unwrap();
    let api = ScriptedApi::new(|req| {
        Ok(stepped_body(req, |l| if l.name == "Berlin" { 3 } else { 4 }))
    });
    let mut sink = MemorySink::new();

    let report = Orchestrator::new(&config, &api, &mut cursors)
        .with_now(now())
        .run(&mut sink)
        .await
        .unwrap();

    assert_eq!(api.requests().len(), 1, "both locations share one batch");
    assert_eq!(
        report.state.cursor(StreamKind::Hourly, "Berlin"),
        Some("2026-03-10T02:00")
    );
    assert_eq!(
        report.state.cursor(StreamKind::Hourly, "Paris"),
        Some("2026-03-10T03:00")
    );

    let paris_times: Vec<_> = sink
        .records
        .iter()
        .filter(|r| r.location == "Paris")
        .map(|r| r.get("time").cloned().unwrap())
        .collect();
    assert_eq!(paris_times, [json!("2026-03-10T02:00"), json!("2026-03-10T03:00")]);
    assert_eq!(sink.records.iter().filter(|r| r.location == "Berlin").count(), 3);
}

#[tokio::test]
async fn concurrent_fetches_respect_the_cap_and_keep_plan_order() {
    let config = hourly_config(numbered_locations(3), |raw| {
        raw.max_batch_size = 1;
        raw.max_concurrent_requests = 2;
    });
    // The first batch answers last.
    let api = ScriptedApi::new(|req| Ok(stepped_body(req, |_| 2))).with_latency(|req| {
        if req.locations[0].name == "L0" {
            StdDuration::from_millis(60)
        } else {
            StdDuration::from_millis(20)
        }
    });
    let mut cursors = CursorStore::new();
    let mut sink = MemorySink::new();

    let report = Orchestrator::new(&config, &api, &mut cursors)
        .with_now(now())
        .run(&mut sink)
        .await
        .unwrap();

    assert_eq!(api.requests().len(), 3);
    assert_eq!(api.peak_in_flight(), 2);

    let order: Vec<_> = sink.records.iter().map(|r| r.location.as_str()).collect();
    assert_eq!(order, ["L0", "L0", "L1", "L1", "L2", "L2"]);
    assert_eq!(report.records_for(StreamKind::Hourly), 6);
}

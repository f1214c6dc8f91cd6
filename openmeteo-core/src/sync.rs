//! Run driver: plan every stream, fetch batches with bounded parallelism,
//! then normalize, emit and advance cursors one batch at a time.

use chrono::{DateTime, NaiveDateTime, Utc};
use futures::{StreamExt, stream};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

use crate::{
    config::{Config, RawConfig},
    error::SyncError,
    normalize::Normalizer,
    planner::{Plan, RequestPlanner, RequestSpec},
    provider::{RawPayload, WeatherApi},
    schema::StreamSchema,
    sink::RecordSink,
    state::{CursorStore, StateSnapshot},
    stream::StreamKind,
};

/// Lifecycle of one request batch. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchPhase {
    Planned,
    Fetching,
    Normalizing,
    Flushed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    RequestFailed,
    PayloadShapeMismatch,
}

/// A (stream, location) pair that produced nothing this run. Its cursor is
/// left where it was.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncFailure {
    pub stream: StreamKind,
    pub location: String,
    pub kind: FailureKind,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedStream {
    pub stream: StreamKind,
    pub reason: String,
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    pub state: StateSnapshot,
    pub records: BTreeMap<StreamKind, usize>,
    pub skipped: Vec<SkippedStream>,
    pub up_to_date: Vec<(StreamKind, String)>,
    pub failures: Vec<SyncFailure>,
}

impl SyncReport {
    pub fn records_for(&self, stream: StreamKind) -> usize {
        self.records.get(&stream).copied().unwrap_or(0)
    }

    pub fn total_records(&self) -> usize {
        self.records.values().sum()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failures_for(&self, stream: StreamKind) -> impl Iterator<Item = &SyncFailure> {
        self.failures.iter().filter(move |f| f.stream == stream)
    }
}

/// Drives one sync run over a validated config.
///
/// Fetches run concurrently up to `max_concurrent_requests`; everything that
/// touches the sink or the cursor store happens on the calling task, in plan
/// order.
#[derive(Debug)]
pub struct Orchestrator<'a, A: WeatherApi + ?Sized> {
    config: &'a Config,
    api: &'a A,
    cursors: &'a mut CursorStore,
    now: DateTime<Utc>,
}

impl<'a, A: WeatherApi + ?Sized> Orchestrator<'a, A> {
    pub fn new(config: &'a Config, api: &'a A, cursors: &'a mut CursorStore) -> Self {
        Self {
            config,
            api,
            cursors,
            now: Utc::now(),
        }
    }

    /// Pin the clock. "Today" is the UTC date of `now`.
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub async fn run<S: RecordSink + ?Sized>(
        &mut self,
        sink: &mut S,
    ) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::default();
        let plans = self.plan_streams(&mut report);

        for plan in &plans {
            sink.write_schema(&StreamSchema::for_stream(plan.stream, self.config))?;
            report.records.insert(plan.stream, 0);
            for request in &plan.requests {
                debug!(
                    stream = %request.stream,
                    locations = ?request.location_names(),
                    phase = ?BatchPhase::Planned,
                    "Batch planned"
                );
            }
        }

        let api = self.api;
        let mut fetches = stream::iter(plans.iter().flat_map(|plan| &plan.requests))
            .map(|request| async move {
                debug!(
                    stream = %request.stream,
                    locations = request.locations.len(),
                    phase = ?BatchPhase::Fetching,
                    "Fetching batch"
                );
                (request, api.fetch(request).await)
            })
            .buffered(self.config.max_concurrent_requests);

        while let Some((request, result)) = fetches.next().await {
            match result {
                Ok(payload) => self.consume(request, &payload, sink, &mut report)?,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => record_failure(request, e, &mut report),
            }
        }

        let state = self.cursors.export();
        sink.write_state(&state)?;
        sink.flush()?;

        info!(
            records = report.total_records(),
            failures = report.failures.len(),
            skipped = report.skipped.len(),
            "Sync completed"
        );

        report.state = state;
        Ok(report)
    }

    fn plan_streams(&self, report: &mut SyncReport) -> Vec<Plan> {
        let planner = RequestPlanner::new(self.config, self.now.date_naive());
        let mut plans = Vec::with_capacity(self.config.streams.len());

        for &stream in &self.config.streams {
            match planner.plan(stream, &*self.cursors) {
                Ok(plan) => {
                    report
                        .up_to_date
                        .extend(plan.up_to_date.iter().map(|name| (stream, name.clone())));
                    plans.push(plan);
                }
                Err(e) => {
                    warn!(%stream, "Skipping stream: {e}");
                    report.skipped.push(SkippedStream {
                        stream,
                        reason: e.to_string(),
                    });
                }
            }
        }

        plans
    }

    /// Normalize, emit and then advance. A shape error leaves the sink and
    /// cursors untouched; a sink error aborts the run.
    fn consume<S: RecordSink + ?Sized>(
        &mut self,
        request: &RequestSpec,
        payload: &RawPayload,
        sink: &mut S,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let stream = request.stream;
        debug!(%stream, phase = ?BatchPhase::Normalizing, "Normalizing batch");

        let records = match Normalizer::new(self.config, self.now).normalize(
            request,
            payload,
            &*self.cursors,
        ) {
            Ok(records) => records,
            Err(e) => {
                record_failure(request, e, report);
                return Ok(());
            }
        };

        let mut emitted = 0;
        let mut latest: BTreeMap<String, NaiveDateTime> = BTreeMap::new();
        for record in records {
            sink.write_record(&record)?;
            emitted += 1;
            if let (true, Some(ts)) = (stream.is_incremental(), record.timestamp) {
                latest
                    .entry(record.location)
                    .and_modify(|cur| *cur = (*cur).max(ts))
                    .or_insert(ts);
            }
        }

        for (location, ts) in &latest {
            self.cursors.advance(stream, location, *ts);
        }

        *report.records.entry(stream).or_default() += emitted;
        debug!(
            %stream,
            records = emitted,
            advanced = latest.len(),
            phase = ?BatchPhase::Flushed,
            "Batch flushed"
        );
        Ok(())
    }
}

fn record_failure(request: &RequestSpec, err: SyncError, report: &mut SyncReport) {
    let stream = request.stream;
    let locations = request.location_names();

    let (kind, detail) = match err {
        SyncError::PayloadShapeMismatch { detail, location, .. } => {
            error!(
                %stream,
                location,
                phase = ?BatchPhase::Failed,
                "Provider payload does not match the requested shape: {detail}"
            );
            (FailureKind::PayloadShapeMismatch, detail)
        }
        other => {
            warn!(
                %stream,
                locations = ?locations,
                phase = ?BatchPhase::Failed,
                "Batch failed: {other}"
            );
            (FailureKind::RequestFailed, other.to_string())
        }
    };

    report
        .failures
        .extend(locations.into_iter().map(|location| SyncFailure {
            stream,
            location,
            kind,
            detail: detail.clone(),
        }));
}

/// Validate `raw`, load `prior` and run one sync against `api`.
///
/// Configuration and prior-state errors are returned before any request is
/// sent.
pub async fn sync<A, S>(
    raw: RawConfig,
    prior: &StateSnapshot,
    api: &A,
    sink: &mut S,
) -> Result<SyncReport, SyncError>
where
    A: WeatherApi + ?Sized,
    S: RecordSink + ?Sized,
{
    let config = Config::validate(raw)?;
    let mut cursors = CursorStore::from_snapshot(prior)?;
    Orchestrator::new(&config, api, &mut cursors)
        .run(sink)
        .await
}

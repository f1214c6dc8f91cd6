use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::{
    error::SyncError,
    model::{format_timestamp, parse_timestamp},
    stream::StreamKind,
};

/// Replication state exchanged with the caller.
///
/// ```json
/// {"bookmarks": {"weather_hourly": {"Berlin": "2026-02-20T10:00"}}}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    #[serde(default)]
    pub bookmarks: BTreeMap<String, BTreeMap<String, String>>,
}

impl StateSnapshot {
    pub fn cursor(&self, stream: StreamKind, location: &str) -> Option<&str> {
        self.bookmarks
            .get(stream.as_str())
            .and_then(|by_location| by_location.get(location))
            .map(String::as_str)
    }
}

/// Per-(stream, location) replication cursors held in memory for one run.
///
/// Entries for streams this engine does not know are kept as raw strings and
/// carried through to the exported snapshot untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CursorStore {
    cursors: BTreeMap<String, BTreeMap<String, NaiveDateTime>>,
    foreign: BTreeMap<String, BTreeMap<String, String>>,
}

impl CursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the store from caller-supplied prior state. Only cursors of known
    /// streams are parsed.
    pub fn from_snapshot(snapshot: &StateSnapshot) -> Result<Self, SyncError> {
        let mut store = Self::new();

        for (stream, by_location) in &snapshot.bookmarks {
            if StreamKind::try_from(stream.as_str()).is_err() {
                debug!(stream = %stream, "Carrying cursors of unknown stream through unchanged");
                store.foreign.insert(stream.clone(), by_location.clone());
                continue;
            }

            let mut parsed = BTreeMap::new();
            for (location, value) in by_location {
                let ts = parse_timestamp(value).ok_or_else(|| SyncError::InvalidState {
                    stream: stream.clone(),
                    location: location.clone(),
                    value: value.clone(),
                })?;
                parsed.insert(location.clone(), ts);
            }
            store.cursors.insert(stream.clone(), parsed);
        }

        Ok(store)
    }

    pub fn get(&self, stream: StreamKind, location: &str) -> Option<NaiveDateTime> {
        self.cursors
            .get(stream.as_str())
            .and_then(|by_location| by_location.get(location))
            .copied()
    }

    /// Move a cursor forward. Values not strictly greater than the current
    /// cursor are ignored. Returns whether the cursor moved.
    pub fn advance(&mut self, stream: StreamKind, location: &str, ts: NaiveDateTime) -> bool {
        let by_location = self.cursors.entry(stream.as_str().to_string()).or_default();

        match by_location.get(location) {
            Some(current) if *current >= ts => {
                debug!(
                    %stream,
                    location,
                    current = %format_timestamp(*current),
                    offered = %format_timestamp(ts),
                    "Ignoring non-advancing cursor update"
                );
                false
            }
            _ => {
                by_location.insert(location.to_string(), ts);
                true
            }
        }
    }

    pub fn export(&self) -> StateSnapshot {
        let mut bookmarks = self.foreign.clone();

        for (stream, by_location) in &self.cursors {
            if by_location.is_empty() {
                continue;
            }
            let values = by_location
                .iter()
                .map(|(location, ts)| (location.clone(), format_timestamp(*ts)))
                .collect();
            bookmarks.insert(stream.clone(), values);
        }

        StateSnapshot { bookmarks }
    }
}

//! Core library for the `tap-openmeteo` extractor.
//!
//! This crate defines:
//! - Configuration loading & validation
//! - Request planning with per-location incremental cursors
//! - The Open-Meteo HTTP client behind the `WeatherApi` seam
//! - Normalization of columnar payloads into flat records
//! - The sync orchestrator and its output sink
//!
//! It is used by `openmeteo-cli`, but can also be embedded by other binaries or services.

pub mod config;
pub mod error;
pub mod model;
pub mod normalize;
pub mod planner;
pub mod provider;
pub mod schema;
pub mod sink;
pub mod state;
pub mod stream;
pub mod sync;

pub use config::{Config, RawConfig};
pub use error::{ConfigError, SinkError, SyncError};
pub use model::{DateWindow, Location, NormalizedRecord};
pub use planner::{RequestPlanner, RequestSpec};
pub use provider::{OpenMeteoClient, RawPayload, WeatherApi};
pub use schema::StreamSchema;
pub use sink::{JsonLinesSink, MemorySink, RecordSink};
pub use state::{CursorStore, StateSnapshot};
pub use stream::StreamKind;
pub use sync::{Orchestrator, SyncFailure, SyncReport, sync};

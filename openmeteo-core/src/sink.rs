//! Output boundary for schema declarations, records and state.

use serde::Serialize;
use serde_json::{Map, Value};
use std::io::Write;

use crate::{
    error::SinkError,
    model::NormalizedRecord,
    schema::StreamSchema,
    state::StateSnapshot,
    stream::StreamKind,
};

pub type SinkResult<T> = Result<T, SinkError>;

/// Consumer of everything a sync run emits.
///
/// A record counts as handed off once `write_record` returns `Ok`; cursors
/// are only advanced after that.
pub trait RecordSink {
    fn write_schema(&mut self, schema: &StreamSchema) -> SinkResult<()>;

    fn write_record(&mut self, record: &NormalizedRecord) -> SinkResult<()>;

    fn write_state(&mut self, state: &StateSnapshot) -> SinkResult<()>;

    fn flush(&mut self) -> SinkResult<()> {
        Ok(())
    }
}

impl<S: RecordSink + ?Sized> RecordSink for &mut S {
    fn write_schema(&mut self, schema: &StreamSchema) -> SinkResult<()> {
        (**self).write_schema(schema)
    }

    fn write_record(&mut self, record: &NormalizedRecord) -> SinkResult<()> {
        (**self).write_record(record)
    }

    fn write_state(&mut self, state: &StateSnapshot) -> SinkResult<()> {
        (**self).write_state(state)
    }

    fn flush(&mut self) -> SinkResult<()> {
        (**self).flush()
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
enum Message<'a> {
    Schema {
        stream: StreamKind,
        schema: Value,
        key_properties: &'a [&'static str],
        #[serde(skip_serializing_if = "Option::is_none")]
        bookmark_properties: Option<[&'static str; 1]>,
    },
    Record {
        stream: StreamKind,
        record: &'a Map<String, Value>,
    },
    State {
        value: &'a StateSnapshot,
    },
}

/// Writes one JSON message per line.
#[derive(Debug)]
pub struct JsonLinesSink<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, message: &Message<'_>) -> SinkResult<()> {
        serde_json::to_writer(&mut self.out, message)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }
}

impl<W: Write> RecordSink for JsonLinesSink<W> {
    fn write_schema(&mut self, schema: &StreamSchema) -> SinkResult<()> {
        self.emit(&Message::Schema {
            stream: schema.stream,
            schema: schema.to_json_schema(),
            key_properties: &schema.key_properties,
            bookmark_properties: schema.replication_key.map(|key| [key]),
        })
    }

    fn write_record(&mut self, record: &NormalizedRecord) -> SinkResult<()> {
        self.emit(&Message::Record {
            stream: record.stream,
            record: &record.fields,
        })
    }

    fn write_state(&mut self, state: &StateSnapshot) -> SinkResult<()> {
        self.emit(&Message::State { value: state })
    }

    fn flush(&mut self) -> SinkResult<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Collects everything in memory. Useful for embedding and tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub schemas: Vec<StreamSchema>,
    pub records: Vec<NormalizedRecord>,
    pub states: Vec<StateSnapshot>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records_for(&self, stream: StreamKind) -> impl Iterator<Item = &NormalizedRecord> {
        self.records.iter().filter(move |r| r.stream == stream)
    }
}

impl RecordSink for MemorySink {
    fn write_schema(&mut self, schema: &StreamSchema) -> SinkResult<()> {
        self.schemas.push(schema.clone());
        Ok(())
    }

    fn write_record(&mut self, record: &NormalizedRecord) -> SinkResult<()> {
        self.records.push(record.clone());
        Ok(())
    }

    fn write_state(&mut self, state: &StateSnapshot) -> SinkResult<()> {
        self.states.push(state.clone());
        Ok(())
    }
}

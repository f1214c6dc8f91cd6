//! Outbound schema declarations, one per active stream.

use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::{
    config::{Config, PrecipitationUnit, TemperatureUnit, Units, WindSpeedUnit},
    stream::StreamKind,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    /// Provider-local wall-clock time, `YYYY-MM-DDTHH:MM`.
    Timestamp,
    Date,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<&'static str>,
}

impl FieldSpec {
    fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            unit: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamSchema {
    pub stream: StreamKind,
    pub fields: Vec<FieldSpec>,
    pub key_properties: Vec<&'static str>,
    pub replication_key: Option<&'static str>,
}

impl StreamSchema {
    /// Declare the fields a stream's records carry under `config`.
    pub fn for_stream(stream: StreamKind, config: &Config) -> Self {
        use FieldType::*;

        let mut fields = vec![
            FieldSpec::new("location_name", String),
            FieldSpec::new("latitude", Number),
            FieldSpec::new("longitude", Number),
        ];

        let fixed: &[(&str, FieldType)] = match stream {
            StreamKind::Forecast => &[
                ("elevation", Number),
                ("timezone", String),
                ("timezone_abbreviation", String),
                ("utc_offset_seconds", Integer),
                ("generationtime_ms", Number),
                ("generated_at", Timestamp),
                ("forecast_days", Integer),
                ("past_days", Integer),
                ("hourly_variables", String),
                ("daily_variables", String),
            ],
            StreamKind::Hourly => &[("time", Timestamp), ("time_unix", Integer)],
            StreamKind::Daily => &[("date", Date)],
            StreamKind::Current => &[("time", Timestamp), ("interval", Integer)],
            StreamKind::Minutely15 => &[("time", Timestamp)],
            StreamKind::Historical => &[("time", Timestamp), ("date", Date)],
        };
        fields.extend(fixed.iter().map(|(name, ty)| FieldSpec::new(name, *ty)));

        // The metadata stream requests a variable but never emits it.
        if stream != StreamKind::Forecast {
            fields.extend(config.variables(stream).iter().map(|var| FieldSpec {
                name: var.clone(),
                field_type: variable_type(var),
                unit: variable_unit(var, &config.units),
            }));
        }

        let replication_key = stream.is_incremental().then(|| stream.timestamp_field());

        Self {
            stream,
            fields,
            key_properties: vec!["location_name", stream.timestamp_field()],
            replication_key,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Render as a JSON-schema object. Every property is nullable.
    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .fields
            .iter()
            .map(|field| {
                let mut prop = match field.field_type {
                    FieldType::String => json!({"type": ["string", "null"]}),
                    FieldType::Number => json!({"type": ["number", "null"]}),
                    FieldType::Integer => json!({"type": ["integer", "null"]}),
                    FieldType::Boolean => json!({"type": ["boolean", "null"]}),
                    FieldType::Timestamp => {
                        json!({"type": ["string", "null"], "format": "date-time"})
                    }
                    FieldType::Date => json!({"type": ["string", "null"], "format": "date"}),
                };
                if let (Some(unit), Some(obj)) = (field.unit, prop.as_object_mut()) {
                    obj.insert("unit".into(), json!(unit));
                }
                (field.name.clone(), prop)
            })
            .collect();

        json!({
            "type": "object",
            "properties": properties,
        })
    }
}

fn variable_type(var: &str) -> FieldType {
    match var {
        "weather_code" | "is_day" => FieldType::Integer,
        "sunrise" | "sunset" => FieldType::Timestamp,
        _ => FieldType::Number,
    }
}

fn variable_unit(var: &str, units: &Units) -> Option<&'static str> {
    if var.contains("temperature") || var.starts_with("dew_point") {
        return Some(match units.temperature {
            TemperatureUnit::Celsius => "°C",
            TemperatureUnit::Fahrenheit => "°F",
        });
    }
    if var.starts_with("wind_speed") || var.starts_with("wind_gusts") {
        return Some(match units.wind_speed {
            WindSpeedUnit::Kmh => "km/h",
            WindSpeedUnit::Ms => "m/s",
            WindSpeedUnit::Mph => "mph",
            WindSpeedUnit::Kn => "kn",
        });
    }
    if var.starts_with("snowfall") {
        return Some(match units.precipitation {
            PrecipitationUnit::Mm => "cm",
            PrecipitationUnit::Inch => "inch",
        });
    }
    let precipitation_amount = var.starts_with("precipitation")
        && !var.contains("probability")
        && !var.contains("hours");
    if precipitation_amount
        || var.starts_with("rain")
        || var.starts_with("showers")
    {
        return Some(units.precipitation.as_str());
    }
    None
}

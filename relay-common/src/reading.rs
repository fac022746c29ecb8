use serde_json::{Map, Value};
use thiserror::Error;

/// Stands in for a measurement the device did not report.
pub const NOT_AVAILABLE: &str = "NA";

/// Errors that make an inbound telemetry message unusable.
/// Missing or mistyped fields are never errors, they decode as absent.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("telemetry payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("telemetry payload is a JSON {0}, expected an object")]
    NotAnObject(&'static str),
    #[error("cannot resolve a display topic for message on {0}")]
    UnroutableTopic(String),
}

/// A single telemetry sample, normalized from whatever shape the device sent.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// Empty when the device did not report one; callers substitute the configured site.
    pub site: String,
    pub device_id: String,
    /// Epoch milliseconds, UTC.
    pub timestamp_millis: i64,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
}

impl Reading {
    /// Decode a raw bus payload into a `Reading`.
    ///
    /// Decoding happens in two stages: the bytes are parsed into an untyped JSON document, and
    /// then each field of the `Reading` is pulled out by its own extractor. An extractor that
    /// finds nothing usable yields `None` and the field takes its default.
    ///
    /// # Arguments
    ///
    /// * `payload`: The message body as delivered by the bus.
    /// * `received_at_millis`: Wall-clock epoch milliseconds, used when `ts` is missing or not a number.
    pub fn from_payload(payload: &[u8], received_at_millis: i64) -> Result<Self, ParseError> {
        let document: Value = serde_json::from_slice(payload)?;

        let fields = match document {
            Value::Object(fields) => fields,
            other => return Err(ParseError::NotAnObject(json_kind(&other))),
        };

        Ok(Self::from_fields(&fields, received_at_millis))
    }

    fn from_fields(fields: &Map<String, Value>, received_at_millis: i64) -> Self {
        Reading {
            site: string_field(fields, "site").unwrap_or_default(),
            device_id: string_field(fields, "deviceId").unwrap_or_default(),
            timestamp_millis: millis_field(fields, "ts").unwrap_or(received_at_millis),
            temperature: number_field(fields, "temp").or_else(|| number_field(fields, "temperature")),
            humidity: number_field(fields, "hum").or_else(|| number_field(fields, "humidity")),
        }
    }

    /// The site this reading belongs to, or `fallback` if the device did not say.
    pub fn site_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        if self.site.is_empty() {
            fallback
        } else {
            &self.site
        }
    }

    /// Temperature with two decimals, or `NA`.
    pub fn temperature_label(&self) -> String {
        self.temperature
            .map(|celsius| format!("{:.2}", celsius))
            .unwrap_or_else(|| NOT_AVAILABLE.to_owned())
    }

    /// Relative humidity with one decimal, or `NA`.
    pub fn humidity_label(&self) -> String {
        self.humidity
            .map(|percent| format!("{:.1}", percent))
            .unwrap_or_else(|| NOT_AVAILABLE.to_owned())
    }
}

fn string_field(fields: &Map<String, Value>, key: &str) -> Option<String> {
    fields.get(key)?.as_str().map(str::to_owned)
}

fn number_field(fields: &Map<String, Value>, key: &str) -> Option<f64> {
    fields.get(key)?.as_f64()
}

/// Fractional milliseconds are truncated.
fn millis_field(fields: &Map<String, Value>, key: &str) -> Option<i64> {
    let value = fields.get(key)?;
    value.as_i64().or_else(|| value.as_f64().map(|ms| ms as i64))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

use super::LocationRecord;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::fmt;

/// Validation errors for incoming record payloads
#[derive(Debug, Clone, PartialEq)]
pub enum RecordError {
    MissingId,
    PayloadNotObject,
    MissingCoordinate(&'static str),
    InvalidCoordinate { field: &'static str, raw: String },
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordError::MissingId => write!(f, "record id is required"),
            RecordError::PayloadNotObject => write!(f, "payload must be a JSON object"),
            RecordError::MissingCoordinate(field) => {
                write!(f, "coordinate '{}' is required", field)
            }
            RecordError::InvalidCoordinate { field, raw } => {
                write!(f, "coordinate '{}' is not a finite number: {}", field, raw)
            }
        }
    }
}

impl std::error::Error for RecordError {}

/// Parses a wire payload into a validated [`LocationRecord`].
///
/// Validation rules:
/// - Required: non-empty id, object payload, both coordinates
/// - Coordinates: JSON number or numeric string; must be finite
/// - Timestamp: RFC 3339 string; unparseable values are discarded, not
///   rejected (advisory field)
/// - displayName / routeLabel / contactIdentity: optional strings;
///   empty strings are treated as absent
pub fn parse_record(id: &str, payload: &Value) -> Result<LocationRecord, RecordError> {
    if id.is_empty() {
        return Err(RecordError::MissingId);
    }

    let fields = payload.as_object().ok_or(RecordError::PayloadNotObject)?;

    let latitude = parse_coordinate(fields, "latitude")?;
    let longitude = parse_coordinate(fields, "longitude")?;

    Ok(LocationRecord {
        id: id.to_string(),
        latitude,
        longitude,
        display_name: optional_string(fields, "displayName"),
        timestamp: parse_timestamp(fields),
        route_label: optional_string(fields, "routeLabel"),
        contact_identity: optional_string(fields, "contactIdentity"),
    })
}

/// Default display label: the first 8 characters of the id
pub fn short_label(id: &str) -> String {
    id.chars().take(8).collect()
}

/// Extracts one coordinate, accepting numbers and numeric strings.
///
/// Anything that does not parse to a finite f64 invalidates the record:
/// missing fields, non-numeric strings, booleans, and strings like
/// "NaN"/"inf" that parse but are not finite.
fn parse_coordinate(
    fields: &Map<String, Value>,
    field: &'static str,
) -> Result<f64, RecordError> {
    let raw = fields
        .get(field)
        .ok_or(RecordError::MissingCoordinate(field))?;

    let parsed = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match parsed {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(RecordError::InvalidCoordinate {
            field,
            raw: raw.to_string(),
        }),
    }
}

fn optional_string(fields: &Map<String, Value>, field: &str) -> Option<String> {
    fields
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn parse_timestamp(fields: &Map<String, Value>) -> Option<DateTime<Utc>> {
    fields
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

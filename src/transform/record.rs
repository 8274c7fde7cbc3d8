//! Raw source records, validated out of untyped JSON.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value;
use thiserror::Error;

use crate::domain::SourceCategory;

/// Household consumption or generation reading.
#[derive(Debug, Clone, PartialEq)]
pub struct EnergyRecord {
    pub index: usize,
    pub user_id: String,
    pub timestamp: NaiveDateTime,
    pub kwh: Option<f64>,
}

/// One weather station observation (`ta` in °C, `hr` in %).
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherRecord {
    pub index: usize,
    pub timestamp: NaiveDateTime,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub station: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawRecord {
    Consumption(EnergyRecord),
    Generation(EnergyRecord),
    Weather(WeatherRecord),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecordError {
    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("missing or empty '{0}'")]
    Missing(&'static str),

    #[error("unreadable timestamp in '{field}': {value}")]
    Timestamp { field: &'static str, value: String },
}

impl RawRecord {
    /// Validate one record from `category`. `index` is its position in the response.
    pub fn parse(category: SourceCategory, index: usize, value: &Value) -> Result<Self, RecordError> {
        if !value.is_object() {
            return Err(RecordError::NotAnObject);
        }

        match category {
            SourceCategory::Consumption => {
                EnergyRecord::parse(index, value, "energy_consumption_kwh").map(RawRecord::Consumption)
            }
            SourceCategory::Generation => {
                EnergyRecord::parse(index, value, "generation_kwh").map(RawRecord::Generation)
            }
            SourceCategory::Weather => WeatherRecord::parse(index, value).map(RawRecord::Weather),
        }
    }

    pub fn category(&self) -> SourceCategory {
        match self {
            RawRecord::Consumption(_) => SourceCategory::Consumption,
            RawRecord::Generation(_) => SourceCategory::Generation,
            RawRecord::Weather(_) => SourceCategory::Weather,
        }
    }

    pub fn index(&self) -> usize {
        match self {
            RawRecord::Consumption(r) | RawRecord::Generation(r) => r.index,
            RawRecord::Weather(r) => r.index,
        }
    }
}

impl EnergyRecord {
    fn parse(index: usize, value: &Value, value_key: &str) -> Result<Self, RecordError> {
        let user_id = value
            .get("user_id")
            .and_then(id_string)
            .ok_or(RecordError::Missing("user_id"))?;
        let timestamp = timestamp_field(value, "datetime")?;
        let kwh = value.get("data").and_then(|d| d.get(value_key)).and_then(number);

        Ok(Self {
            index,
            user_id,
            timestamp,
            kwh,
        })
    }
}

impl WeatherRecord {
    fn parse(index: usize, value: &Value) -> Result<Self, RecordError> {
        Ok(Self {
            index,
            timestamp: timestamp_field(value, "datetime_utc")?,
            temperature: value.get("ta").and_then(number),
            humidity: value.get("hr").and_then(number),
            station: value.get("idema").and_then(id_string),
            latitude: value.get("lat").and_then(number),
            longitude: value.get("lon").and_then(number),
        })
    }

    /// Synthesized entity key: station code, else coordinates, else a shared fallback.
    pub fn entity_id(&self) -> String {
        if let Some(code) = &self.station {
            return format!("weather-{code}");
        }
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => format!("weather-{lat:.4}_{lon:.4}"),
            _ => "weather-station".to_string(),
        }
    }
}

fn timestamp_field(value: &Value, field: &'static str) -> Result<NaiveDateTime, RecordError> {
    let raw = value.get(field).filter(|v| !v.is_null()).ok_or(RecordError::Missing(field))?;
    parse_timestamp(raw).ok_or_else(|| RecordError::Timestamp {
        field,
        value: raw.to_string(),
    })
}

/// Accepts RFC 3339 (converted to UTC), naive ISO 8601 (taken as UTC),
/// a bare date, or an extended-JSON `{"$date": ...}` wrapper.
pub fn parse_timestamp(raw: &Value) -> Option<NaiveDateTime> {
    match raw {
        Value::String(s) => parse_timestamp_str(s.trim()),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis).map(|dt| dt.naive_utc()),
        Value::Object(map) => map.get("$date").and_then(parse_timestamp),
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(NaiveTime::MIN))
}

/// Numbers and numeric strings. Anything else (or NaN/inf) is a gap.
fn number(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn id_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

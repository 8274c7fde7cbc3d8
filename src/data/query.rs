//! Structured (MongoDB-style) date-range filters understood by the FAEN API.

use serde_json::{Map, Value, json};

use crate::domain::{DateRange, SourceCategory};

const QUERY_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Filter selecting records with `start <= date_field < end`.
///
/// ```text
/// { "datetime": { "$gte": { "$date": "2022-01-01T00:00:00" },
///                 "$lt":  { "$date": "2022-04-01T00:00:00" } } }
/// ```
pub fn date_range_query(category: SourceCategory, range: &DateRange) -> Value {
    let bounds = json!({
        "$gte": { "$date": range.start_datetime().format(QUERY_DATETIME_FORMAT).to_string() },
        "$lt": { "$date": range.end_datetime().format(QUERY_DATETIME_FORMAT).to_string() },
    });

    let mut filter = Map::new();
    filter.insert(category.date_field().to_string(), bounds);
    Value::Object(filter)
}

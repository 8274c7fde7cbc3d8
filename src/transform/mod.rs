//! Source records → normalized field samples.
//!
//! Raw JSON is validated once, at the boundary, into [`RawRecord`]. From there
//! the mapping to samples is a pure function of the record:
//!
//! - consumption: one `consumedEnergy` sample per record, entity = user id
//! - generation: one `generatedEnergy` sample per record, entity = user id
//! - weather: `outdoorTemperature` + `humidityLevel` for one synthesized
//!   station entity; coordinates travel as entity metadata

use serde_json::Value;

use crate::domain::{DatasetType, EntityMetadata, FieldName, FieldSample, SourceCategory};

pub mod record;

pub use record::{EnergyRecord, RawRecord, RecordError, WeatherRecord};

/// A raw record that could not become a sample.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedRecord {
    pub category: SourceCategory,
    pub index: usize,
    pub reason: RecordError,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedRecords {
    pub records: Vec<RawRecord>,
    pub skipped: Vec<SkippedRecord>,
}

impl ParsedRecords {
    pub fn extend(&mut self, other: ParsedRecords) {
        self.records.extend(other.records);
        self.skipped.extend(other.skipped);
    }
}

/// Validate one endpoint's response. Order is preserved.
pub fn parse_records(category: SourceCategory, raw: &[Value]) -> ParsedRecords {
    let mut out = ParsedRecords::default();
    for (index, value) in raw.iter().enumerate() {
        match RawRecord::parse(category, index, value) {
            Ok(record) => out.records.push(record),
            Err(reason) => out.skipped.push(SkippedRecord {
                category,
                index,
                reason,
            }),
        }
    }
    out
}

/// Samples for `dataset_type`, in record order.
///
/// Lazy and restartable: clone the iterator to walk the samples again.
/// Records of categories the dataset type does not use are ignored.
pub fn to_field_samples(
    records: &[RawRecord],
    dataset_type: DatasetType,
) -> impl Iterator<Item = FieldSample> + Clone + '_ {
    records
        .iter()
        .filter(move |r| dataset_type.accepts(r.category()))
        .flat_map(samples_of)
}

fn samples_of(record: &RawRecord) -> Vec<FieldSample> {
    match record {
        RawRecord::Consumption(r) => vec![energy_sample(r, FieldName::ConsumedEnergy)],
        RawRecord::Generation(r) => vec![energy_sample(r, FieldName::GeneratedEnergy)],
        RawRecord::Weather(w) => {
            let entity_id = w.entity_id();
            let metadata = EntityMetadata::WeatherStation {
                device_id: entity_id.clone(),
                latitude: w.latitude,
                longitude: w.longitude,
            };
            [
                (FieldName::OutdoorTemperature, w.temperature),
                (FieldName::HumidityLevel, w.humidity),
            ]
            .into_iter()
            .map(|(field, value)| FieldSample {
                record_index: w.index,
                entity_id: entity_id.clone(),
                timestamp: w.timestamp,
                field,
                value,
                metadata: Some(metadata.clone()),
            })
            .collect()
        }
    }
}

fn energy_sample(r: &EnergyRecord, field: FieldName) -> FieldSample {
    FieldSample {
        record_index: r.index,
        entity_id: r.user_id.clone(),
        timestamp: r.timestamp,
        field,
        value: r.kwh,
        metadata: Some(EntityMetadata::EnergyMeter {
            device_id: r.user_id.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn consumption(n: usize) -> Vec<Value> {
        (0..n)
            .map(|i| {
                json!({
                    "user_id": format!("u{}", i % 2),
                    "datetime": format!("2022-01-01T{:02}:00:00", i),
                    "data": { "energy_consumption_kwh": i as f64 * 0.1 }
                })
            })
            .collect()
    }

    #[test]
    fn one_sample_per_energy_record_in_order() {
        let parsed = parse_records(SourceCategory::Consumption, &consumption(4));
        assert!(parsed.skipped.is_empty());

        let samples: Vec<_> = to_field_samples(&parsed.records, DatasetType::Consumption).collect();
        assert_eq!(samples.len(), 4);
        assert!(samples.iter().all(|s| s.field == FieldName::ConsumedEnergy));
        assert_eq!(
            samples.iter().map(|s| s.entity_id.as_str()).collect::<Vec<_>>(),
            ["u0", "u1", "u0", "u1"]
        );
        assert_eq!(samples.iter().map(|s| s.record_index).collect::<Vec<_>>(), [0, 1, 2, 3]);
    }

    #[test]
    fn weather_record_yields_two_samples_for_one_entity() {
        let parsed = parse_records(
            SourceCategory::Weather,
            &[json!({ "datetime_utc": "2022-01-01T10:00:00", "ta": 18.2, "hr": null, "idema": "C447A", "lat": 28.4, "lon": -16.3 })],
        );
        let samples: Vec<_> = to_field_samples(&parsed.records, DatasetType::GenerationWeather).collect();

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].field, FieldName::OutdoorTemperature);
        assert_eq!(samples[0].value, Some(18.2));
        assert_eq!(samples[1].field, FieldName::HumidityLevel);
        assert_eq!(samples[1].value, None);
        assert_eq!(samples[0].entity_id, samples[1].entity_id);
        assert_eq!(
            samples[0].metadata,
            Some(EntityMetadata::WeatherStation {
                device_id: "weather-C447A".into(),
                latitude: Some(28.4),
                longitude: Some(-16.3),
            })
        );
    }

    #[test]
    fn unusable_records_are_skipped_and_counted() {
        let raw = vec![
            json!({ "user_id": "u1", "datetime": "2022-01-01T00:00:00", "data": { "energy_consumption_kwh": 1.0 } }),
            json!({ "datetime": "2022-01-01T01:00:00", "data": { "energy_consumption_kwh": 1.0 } }),
            json!({ "user_id": "u1", "datetime": "2022-01-01T02:00:00" }),
        ];
        let parsed = parse_records(SourceCategory::Consumption, &raw);
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.skipped.len(), 1);
        assert_eq!(parsed.skipped[0].index, 1);
        assert_eq!(parsed.skipped[0].reason, RecordError::Missing("user_id"));
    }

    #[test]
    fn samples_can_be_walked_twice() {
        let parsed = parse_records(SourceCategory::Consumption, &consumption(3));
        let samples = to_field_samples(&parsed.records, DatasetType::Consumption);
        let first: Vec<_> = samples.clone().collect();
        let second: Vec<_> = samples.collect();
        assert_eq!(first, second);
    }

    #[test]
    fn records_outside_the_dataset_type_are_ignored() {
        let parsed = parse_records(SourceCategory::Consumption, &consumption(2));
        assert_eq!(to_field_samples(&parsed.records, DatasetType::GenerationWeather).count(), 0);
    }
}

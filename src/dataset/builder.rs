//! Field samples → `DatasetDescription`.

use std::collections::BTreeMap;

use chrono::Datelike;
use thiserror::Error;
use tracing::debug;

use crate::domain::{
    DatasetDescription, DatasetType, DateRange, EntityMetadata, FieldDescriptor, FieldName, FieldSample,
    METADATA_WEATHER_STATION, TimeseriesDescriptor,
};

/// Entity used for energy fields when no samples name one.
pub const PLACEHOLDER_METER: &str = "generic_user";
/// Entity used for weather fields when no samples name one.
pub const PLACEHOLDER_STATION: &str = "weather-station";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("{field} is not a field of the {dataset_type} dataset (sample for '{entity_id}')")]
    UndeclaredField {
        dataset_type: DatasetType,
        field: FieldName,
        entity_id: String,
    },
}

#[derive(Default)]
struct EntityAcc {
    fields: Vec<FieldName>,
    metadata: Option<EntityMetadata>,
}

/// Build the description for `dataset_type` over `range`.
///
/// Fields are always the dataset type's full declaration list. Timeseries
/// come out sorted by entity id, each listing its fields in declaration
/// order. A declared field no entity covers gets a placeholder entity so the
/// sink still creates a timeseries (and an id) for it.
pub fn build(
    samples: impl IntoIterator<Item = FieldSample>,
    dataset_type: DatasetType,
    range: DateRange,
    name: Option<String>,
) -> Result<DatasetDescription, BuildError> {
    let declared = dataset_type.fields();
    let mut entities: BTreeMap<String, EntityAcc> = BTreeMap::new();

    for sample in samples {
        if !declared.contains(&sample.field) {
            debug_assert!(false, "sample field {} not declared for {dataset_type}", sample.field);
            return Err(BuildError::UndeclaredField {
                dataset_type,
                field: sample.field,
                entity_id: sample.entity_id,
            });
        }

        let acc = entities.entry(sample.entity_id).or_default();
        if !acc.fields.contains(&sample.field) {
            acc.fields.push(sample.field);
        }
        if acc.metadata.is_none() {
            acc.metadata = sample.metadata;
        }
    }

    for field in declared {
        let covered = entities.values().any(|e| e.fields.contains(field));
        if !covered {
            let entity_id = if field.spec().metadata_type == METADATA_WEATHER_STATION {
                PLACEHOLDER_STATION
            } else {
                PLACEHOLDER_METER
            };
            entities.entry(entity_id.to_string()).or_default().fields.push(*field);
        }
    }

    let timeseries: Vec<TimeseriesDescriptor> = entities
        .into_iter()
        .map(|(entity_id, mut acc)| {
            acc.fields.sort_by_key(|f| declared.iter().position(|d| d == f));
            let metadata = acc
                .metadata
                .unwrap_or_else(|| EntityMetadata::placeholder(&entity_id, acc.fields[0]));
            TimeseriesDescriptor {
                entity_id,
                fields: acc.fields,
                metadata,
            }
        })
        .collect();

    let fields: Vec<FieldDescriptor> = declared
        .iter()
        .zip(1u32..)
        .map(|(field, ordinal)| FieldDescriptor {
            ordinal,
            field: *field,
            spec: field.spec(),
        })
        .collect();

    let description = DatasetDescription {
        dataset_type,
        name: name.unwrap_or_else(|| default_name(dataset_type, &range)),
        description: describe(dataset_type, &range),
        range,
        fields,
        timeseries,
    };
    debug!(
        name = %description.name,
        entities = description.timeseries.len(),
        timeseries = description.timeseries_count(),
        "built dataset description"
    );
    Ok(description)
}

/// Title derived from the months the range covers.
///
/// ```text
/// FAEN Consumption March 2022
/// FAEN Consumption January-March 2022
/// FAEN Consumption December 2021 - January 2022
/// ```
pub fn default_name(dataset_type: DatasetType, range: &DateRange) -> String {
    let (first, last) = (range.start(), range.last_day());
    let prefix = dataset_type.title_prefix();
    if first.year() != last.year() {
        format!(
            "{prefix} {} {} - {} {}",
            first.format("%B"),
            first.year(),
            last.format("%B"),
            last.year()
        )
    } else if first.month() != last.month() {
        format!("{prefix} {}-{} {}", first.format("%B"), last.format("%B"), first.year())
    } else {
        format!("{prefix} {} {}", first.format("%B"), first.year())
    }
}

fn describe(dataset_type: DatasetType, range: &DateRange) -> String {
    let what = match dataset_type {
        DatasetType::Consumption => "the consumption of FAEN users",
        DatasetType::GenerationWeather => "the generation of FAEN users together with weather station readings",
    };
    format!("Dataset covering {what} from {} to {}", range.start(), range.last_day())
}

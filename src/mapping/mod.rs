//! Sink-assigned identifiers → field names and entities.
//!
//! The sink echoes back field and timeseries identifiers in no guaranteed
//! order. Everything here is keyed by value, never by position in the
//! response, so shuffling the response never changes the result.

use std::collections::{BTreeMap, BTreeSet};

use crate::data::RemoteTimeseries;
use crate::domain::FieldName;
use crate::error::MappingError;

/// A field descriptor as echoed by the sink. Either part may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReturnedField {
    pub field_id: Option<u32>,
    pub name: Option<String>,
}

impl From<&RemoteTimeseries> for ReturnedField {
    fn from(ts: &RemoteTimeseries) -> Self {
        Self {
            field_id: ts.field_id,
            name: ts.field_name.clone(),
        }
    }
}

/// Resolve each expected field name to its sink field id.
///
/// The name at declaration position `i` takes id `i + 1` when the sink
/// returned that id with no name or with the same name. Otherwise the sink
/// descriptor carrying the exact name decides: its id, or the provisional
/// ordinal when it has none. Several matches resolve to the smallest id.
pub fn resolve(returned: &[ReturnedField], expected: &[FieldName]) -> Result<BTreeMap<FieldName, u32>, MappingError> {
    let mut resolved = BTreeMap::new();
    let mut unresolved = Vec::new();

    for (field, ordinal) in expected.iter().zip(1u32..) {
        let name = field.as_str();

        let by_position = returned
            .iter()
            .any(|r| r.field_id == Some(ordinal) && r.name.as_deref().is_none_or(|n| n == name));

        let id = if by_position {
            Some(ordinal)
        } else {
            returned
                .iter()
                .filter(|r| r.name.as_deref() == Some(name))
                .map(|r| r.field_id.unwrap_or(ordinal))
                .min()
        };

        match id {
            Some(id) => {
                resolved.insert(*field, id);
            }
            None => unresolved.push(*field),
        }
    }

    if unresolved.is_empty() {
        Ok(resolved)
    } else {
        Err(MappingError { unresolved })
    }
}

/// `(entity, field) → timeseries id` lookup over the sink's timeseries listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeseriesIndex {
    by_field: BTreeMap<(String, FieldName), String>,
    /// Timeseries whose field could not be told, per device.
    unassigned: BTreeMap<String, BTreeSet<String>>,
    ignored: usize,
}

impl TimeseriesIndex {
    pub fn build(remote: &[RemoteTimeseries], field_ids: &BTreeMap<FieldName, u32>) -> Self {
        let mut index = Self::default();

        for ts in remote {
            let (Some(id), Some(device)) = (&ts.id, &ts.device_id) else {
                index.ignored += 1;
                continue;
            };

            let field = ts
                .field_name
                .as_deref()
                .and_then(FieldName::from_name)
                .filter(|f| field_ids.contains_key(f))
                .or_else(|| {
                    let wanted = ts.field_id?;
                    field_ids.iter().find(|(_, v)| **v == wanted).map(|(f, _)| *f)
                });

            match field {
                Some(field) => {
                    let slot = index
                        .by_field
                        .entry((device.clone(), field))
                        .or_insert_with(|| id.clone());
                    if *id < *slot {
                        *slot = id.clone();
                    }
                }
                None => {
                    index.unassigned.entry(device.clone()).or_default().insert(id.clone());
                }
            }
        }
        index
    }

    /// Timeseries id for one sample's entity and field.
    ///
    /// Falls back to the entity's only field-less timeseries when the sink
    /// did not say which field it belongs to.
    pub fn lookup(&self, entity_id: &str, field: FieldName) -> Option<&str> {
        if let Some(id) = self.by_field.get(&(entity_id.to_string(), field)) {
            return Some(id.as_str());
        }
        match self.unassigned.get(entity_id) {
            Some(ids) if ids.len() == 1 => ids.iter().next().map(String::as_str),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.by_field.len() + self.unassigned.values().map(BTreeSet::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Listed timeseries without an id or device.
    pub fn ignored(&self) -> usize {
        self.ignored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GW: [FieldName; 3] = [
        FieldName::GeneratedEnergy,
        FieldName::OutdoorTemperature,
        FieldName::HumidityLevel,
    ];

    fn returned(id: Option<u32>, name: Option<&str>) -> ReturnedField {
        ReturnedField {
            field_id: id,
            name: name.map(str::to_string),
        }
    }

    fn remote(id: &str, device: &str, field_id: Option<u32>, name: Option<&str>) -> RemoteTimeseries {
        RemoteTimeseries {
            id: Some(id.to_string()),
            field_id,
            field_name: name.map(str::to_string),
            device_id: Some(device.to_string()),
        }
    }

    /// Every ordering of `items` (small inputs only).
    fn permutations<T: Clone>(items: &[T]) -> Vec<Vec<T>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut out = Vec::new();
        for i in 0..items.len() {
            let mut rest = items.to_vec();
            let head = rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, head.clone());
                out.push(tail);
            }
        }
        out
    }

    #[test]
    fn positional_ids_resolve_in_declaration_order() {
        let r = vec![
            returned(Some(1), Some("generatedEnergy")),
            returned(Some(2), None),
            returned(Some(3), Some("humidityLevel")),
        ];
        let ids = resolve(&r, &GW).unwrap();
        assert_eq!(ids[&FieldName::GeneratedEnergy], 1);
        assert_eq!(ids[&FieldName::OutdoorTemperature], 2);
        assert_eq!(ids[&FieldName::HumidityLevel], 3);
    }

    #[test]
    fn resolution_is_independent_of_response_order() {
        let r = vec![
            returned(Some(11), Some("outdoorTemperature")),
            returned(Some(1), Some("generatedEnergy")),
            returned(Some(7), Some("humidityLevel")),
            returned(Some(9), Some("outdoorTemperature")),
        ];
        let expected = resolve(&r, &GW).unwrap();
        assert_eq!(expected[&FieldName::OutdoorTemperature], 9);
        for perm in permutations(&r) {
            assert_eq!(resolve(&perm, &GW).unwrap(), expected);
        }
    }

    #[test]
    fn name_fallback_uses_ordinal_when_sink_omits_ids() {
        let r = vec![returned(None, Some("humidityLevel")), returned(Some(1), None)];
        let ids = resolve(&r, &GW[..1]).unwrap();
        assert_eq!(ids[&FieldName::GeneratedEnergy], 1);

        let ids = resolve(&r, &[FieldName::GeneratedEnergy, FieldName::HumidityLevel]).unwrap();
        assert_eq!(ids[&FieldName::HumidityLevel], 2);
    }

    #[test]
    fn position_with_a_different_name_does_not_count() {
        let r = vec![returned(Some(1), Some("humidityLevel"))];
        let err = resolve(&r, &[FieldName::GeneratedEnergy]).unwrap_err();
        assert_eq!(err.unresolved, vec![FieldName::GeneratedEnergy]);
    }

    #[test]
    fn fails_iff_a_name_is_missing_from_both_lookups() {
        let r = vec![returned(Some(1), Some("generatedEnergy")), returned(Some(5), Some("humidityLevel"))];
        let err = resolve(&r, &GW).unwrap_err();
        assert_eq!(err.unresolved, vec![FieldName::OutdoorTemperature]);

        assert_eq!(resolve(&[], &GW).unwrap_err().unresolved, GW.to_vec());
        assert!(resolve(&[], &[]).unwrap().is_empty());
    }

    #[test]
    fn timeseries_index_keys_by_entity_and_field() {
        let ids = BTreeMap::from([(FieldName::OutdoorTemperature, 2), (FieldName::HumidityLevel, 3)]);
        let listing = vec![
            remote("ts-b", "weather-C447A", Some(3), None),
            remote("ts-a", "weather-C447A", None, Some("outdoorTemperature")),
            remote("ts-z", "weather-C447A", Some(2), None),
        ];

        for perm in permutations(&listing) {
            let index = TimeseriesIndex::build(&perm, &ids);
            assert_eq!(index.lookup("weather-C447A", FieldName::OutdoorTemperature), Some("ts-a"));
            assert_eq!(index.lookup("weather-C447A", FieldName::HumidityLevel), Some("ts-b"));
            assert_eq!(index.lookup("weather-OTHER", FieldName::HumidityLevel), None);
        }
    }

    #[test]
    fn field_less_timeseries_serves_its_only_entity() {
        let ids = BTreeMap::from([(FieldName::ConsumedEnergy, 1)]);
        let mut listing = vec![remote("ts-1", "u1", None, None)];
        listing.push(RemoteTimeseries {
            id: None,
            ..remote("ignored", "u2", Some(1), None)
        });

        let index = TimeseriesIndex::build(&listing, &ids);
        assert_eq!(index.lookup("u1", FieldName::ConsumedEnergy), Some("ts-1"));
        assert_eq!(index.lookup("u2", FieldName::ConsumedEnergy), None);
        assert_eq!(index.ignored(), 1);
        assert_eq!(index.len(), 1);
    }
}

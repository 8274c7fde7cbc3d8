//! JSON-LD rendering of a `DatasetDescription` (`datacellar:` vocabulary).

use serde_json::{Map, Value, json};

use crate::domain::{DatasetDescription, EntityMetadata, FieldDescriptor, FieldName, METADATA_ENERGY_METER};

const TIMESERIES_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
const GRANULARITY: &str = "Hourly";
const TIME_ZONE: &str = "0";

impl DatasetDescription {
    /// The document accepted by `POST /api/dataset`.
    ///
    /// Each timeseries descriptor expands to one `datacellar:TimeSeries` per
    /// field it owns, tagged with the field's provisional id.
    pub fn to_jsonld(&self) -> Value {
        let start = self.range.start_datetime().format(TIMESERIES_DATE_FORMAT).to_string();
        let end = self.range.last_second().format(TIMESERIES_DATE_FORMAT).to_string();

        let timeseries: Vec<Value> = self
            .timeseries
            .iter()
            .flat_map(|ts| {
                ts.fields.iter().map(|field| {
                    json!({
                        "@type": "datacellar:TimeSeries",
                        "datacellar:datasetFieldID": self.ordinal_of(*field),
                        "datacellar:startDate": start,
                        "datacellar:endDate": end,
                        "datacellar:timeZone": TIME_ZONE,
                        "datacellar:granularity": GRANULARITY,
                        "datacellar:dataPoints": [],
                        "datacellar:timeSeriesMetadata": metadata_node(&ts.metadata),
                    })
                })
            })
            .collect();

        json!({
            "@context": context(),
            "@type": "datacellar:Dataset",
            "datacellar:name": self.name,
            "datacellar:description": self.description,
            "datacellar:datasetDescription": {
                "@type": "datacellar:DatasetDescription",
                "datacellar:datasetDescriptionID": 1,
                "datacellar:datasetMetadataTypes": [
                    "datacellar:GeoLocalizedDataset",
                    "datacellar:Installation"
                ],
                "datacellar:datasetFields": self.fields.iter().map(field_node).collect::<Vec<_>>(),
            },
            "datacellar:timeSeries": timeseries,
            "datacellar:datasetMetadata": [{
                "@type": "datacellar:Installation",
                "datacellar:installationType": "localEnergyCommunity",
                "datacellar:capacity": 100.0,
                "datacellar:capacityUnit": "kW"
            }]
        })
    }

    /// `faen_<type>_dataset_definition_<first day>_to_<last day>.json`
    pub fn definition_file_name(&self) -> String {
        format!(
            "faen_{}_dataset_definition_{}_to_{}.json",
            self.dataset_type.slug(),
            self.range.start(),
            self.range.last_day()
        )
    }

    fn ordinal_of(&self, field: FieldName) -> Option<u32> {
        self.fields.iter().find(|f| f.field == field).map(|f| f.ordinal)
    }
}

fn field_node(f: &FieldDescriptor) -> Value {
    json!({
        "@type": "datacellar:DatasetField",
        "datacellar:datasetFieldID": f.ordinal,
        "datacellar:name": f.field.as_str(),
        "datacellar:description": f.spec.description,
        "datacellar:timeseriesMetadataType": f.spec.metadata_type,
        "datacellar:fieldType": {
            "@type": "datacellar:FieldType",
            "datacellar:unit": f.spec.unit,
            "datacellar:averagable": f.spec.averagable,
            "datacellar:summable": f.spec.summable,
            "datacellar:anonymizable": f.spec.anonymizable
        }
    })
}

fn metadata_node(metadata: &EntityMetadata) -> Value {
    match metadata {
        EntityMetadata::EnergyMeter { device_id } => json!({
            "@type": METADATA_ENERGY_METER,
            "datacellar:deviceID": device_id,
            "datacellar:loadType": "aggregate"
        }),
        EntityMetadata::WeatherStation {
            device_id,
            latitude,
            longitude,
        } => {
            let mut node = Map::new();
            node.insert("@type".into(), json!("datacellar:WeatherStation"));
            node.insert("datacellar:deviceID".into(), json!(device_id));
            if let Some(lat) = latitude {
                node.insert("datacellar:latitude".into(), json!(lat));
            }
            if let Some(lon) = longitude {
                node.insert("datacellar:longitude".into(), json!(lon));
            }
            Value::Object(node)
        }
    }
}

fn context() -> Value {
    let mut ctx = Map::new();
    for (k, v) in [
        ("id", "@id"),
        ("type", "@type"),
        ("graph", "@graph"),
        ("datacellar", "http://datacellar.org/schema#"),
        ("rdf", "http://www.w3.org/1999/02/22-rdf-syntax-ns#"),
        ("sh", "http://www.w3.org/ns/shacl#"),
        ("xsd", "http://www.w3.org/2001/XMLSchema#"),
    ] {
        ctx.insert(k.into(), json!(v));
    }

    let floats = [
        "capacity",
        "elevation",
        "floorArea",
        "insulationSurface",
        "latitude",
        "longitude",
        "openingsArea",
        "orientation",
        "tilt",
        "totalAnnualEnergyConsumption",
        "value",
    ];
    for term in floats {
        ctx.insert(format!("datacellar:{term}"), json!({ "@type": "xsd:float" }));
    }
    for term in ["startDate", "endDate", "timestamp"] {
        ctx.insert(format!("datacellar:{term}"), json!({ "@type": "xsd:dateTime" }));
    }
    Value::Object(ctx)
}

#[cfg(test)]
mod tests {
    use crate::dataset::build;
    use crate::domain::{DatasetType, DateRange, EntityMetadata, FieldName, FieldSample};
    use chrono::NaiveDate;

    fn march() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2022, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2022, 4, 1).unwrap(),
        )
        .unwrap()
    }

    fn weather(field: FieldName) -> FieldSample {
        FieldSample {
            record_index: 0,
            entity_id: "weather-C447A".into(),
            timestamp: NaiveDate::from_ymd_opt(2022, 3, 1).unwrap().and_hms_opt(0, 0, 0).unwrap(),
            field,
            value: Some(1.0),
            metadata: Some(EntityMetadata::WeatherStation {
                device_id: "weather-C447A".into(),
                latitude: Some(28.4),
                longitude: None,
            }),
        }
    }

    #[test]
    fn consumption_document_matches_the_sink_template() {
        let doc = build(std::iter::empty(), DatasetType::Consumption, march(), None)
            .unwrap()
            .to_jsonld();

        assert_eq!(doc["@type"], "datacellar:Dataset");
        assert_eq!(doc["datacellar:name"], "FAEN Consumption March 2022");

        let fields = doc["datacellar:datasetDescription"]["datacellar:datasetFields"].as_array().unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0]["datacellar:name"], "consumedEnergy");
        assert_eq!(fields[0]["datacellar:fieldType"]["datacellar:unit"], "kWh");
        assert_eq!(fields[0]["datacellar:fieldType"]["datacellar:summable"], false);

        let ts = &doc["datacellar:timeSeries"][0];
        assert_eq!(ts["datacellar:startDate"], "2022-03-01T00:00:00Z");
        assert_eq!(ts["datacellar:endDate"], "2022-03-31T23:59:59Z");
        assert_eq!(ts["datacellar:timeZone"], "0");
        assert_eq!(ts["datacellar:granularity"], "Hourly");
        assert_eq!(ts["datacellar:timeSeriesMetadata"]["datacellar:deviceID"], "generic_user");
        assert_eq!(doc["@context"]["datacellar:latitude"]["@type"], "xsd:float");
    }

    #[test]
    fn weather_entity_expands_to_one_timeseries_per_field() {
        let samples = vec![weather(FieldName::OutdoorTemperature), weather(FieldName::HumidityLevel)];
        let description = build(samples, DatasetType::GenerationWeather, march(), None).unwrap();
        let doc = description.to_jsonld();

        let ts = doc["datacellar:timeSeries"].as_array().unwrap();
        // generic_user (generation placeholder) + two weather timeseries
        assert_eq!(ts.len(), 3);
        let weather: Vec<_> = ts
            .iter()
            .filter(|t| t["datacellar:timeSeriesMetadata"]["datacellar:deviceID"] == "weather-C447A")
            .collect();
        assert_eq!(weather.len(), 2);
        assert_eq!(weather[0]["datacellar:datasetFieldID"], 2);
        assert_eq!(weather[1]["datacellar:datasetFieldID"], 3);
        let meta = &weather[0]["datacellar:timeSeriesMetadata"];
        assert_eq!(meta["@type"], "datacellar:WeatherStation");
        assert_eq!(meta["datacellar:latitude"], 28.4);
        assert!(meta.get("datacellar:longitude").is_none());

        assert_eq!(
            description.definition_file_name(),
            "faen_generation_weather_dataset_definition_2022-03-01_to_2022-03-31.json"
        );
    }
}

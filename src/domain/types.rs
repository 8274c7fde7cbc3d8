//! Shared domain types.
//!
//! These types are intentionally small and serializable so they can be:
//!
//! - produced by the record transformer
//! - rendered into the JSON-LD dataset document
//! - echoed into terminal reports and failure listings

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// A dataset the pipeline knows how to build and upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DatasetType {
    /// Household consumption per FAEN user.
    Consumption,
    /// Household generation per FAEN user, combined with weather station readings.
    GenerationWeather,
}

impl DatasetType {
    pub const ALL: [DatasetType; 2] = [DatasetType::Consumption, DatasetType::GenerationWeather];

    pub fn label(self) -> &'static str {
        match self {
            DatasetType::Consumption => "consumption",
            DatasetType::GenerationWeather => "generation+weather",
        }
    }

    /// File-name friendly label.
    pub fn slug(self) -> &'static str {
        match self {
            DatasetType::Consumption => "consumption",
            DatasetType::GenerationWeather => "generation_weather",
        }
    }

    /// Declared fields, in the fixed order their provisional ids are assigned.
    pub fn fields(self) -> &'static [FieldName] {
        match self {
            DatasetType::Consumption => &[FieldName::ConsumedEnergy],
            DatasetType::GenerationWeather => &[
                FieldName::GeneratedEnergy,
                FieldName::OutdoorTemperature,
                FieldName::HumidityLevel,
            ],
        }
    }

    /// Source endpoints queried to populate this dataset type, in query order.
    pub fn categories(self) -> &'static [SourceCategory] {
        match self {
            DatasetType::Consumption => &[SourceCategory::Consumption],
            DatasetType::GenerationWeather => &[SourceCategory::Generation, SourceCategory::Weather],
        }
    }

    pub fn accepts(self, category: SourceCategory) -> bool {
        self.categories().contains(&category)
    }

    pub(crate) fn title_prefix(self) -> &'static str {
        match self {
            DatasetType::Consumption => "FAEN Consumption",
            DatasetType::GenerationWeather => "FAEN Generation & Weather",
        }
    }
}

impl std::fmt::Display for DatasetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Which dataset types a run covers (command-line selection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DatasetSelection {
    Consumption,
    GenerationWeather,
    Both,
}

impl DatasetSelection {
    pub fn dataset_types(self) -> Vec<DatasetType> {
        match self {
            DatasetSelection::Consumption => vec![DatasetType::Consumption],
            DatasetSelection::GenerationWeather => vec![DatasetType::GenerationWeather],
            DatasetSelection::Both => DatasetType::ALL.to_vec(),
        }
    }
}

/// A source API endpoint family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceCategory {
    Consumption,
    Generation,
    Weather,
}

impl SourceCategory {
    pub fn label(self) -> &'static str {
        match self {
            SourceCategory::Consumption => "consumption",
            SourceCategory::Generation => "generation",
            SourceCategory::Weather => "weather",
        }
    }

    /// Record key the date-range filter applies to.
    pub fn date_field(self) -> &'static str {
        match self {
            SourceCategory::Consumption | SourceCategory::Generation => "datetime",
            SourceCategory::Weather => "datetime_utc",
        }
    }

    /// Ascending sort on the date field.
    pub fn sort_key(self) -> &'static str {
        match self {
            SourceCategory::Consumption | SourceCategory::Generation => "+datetime",
            SourceCategory::Weather => "+datetime_utc",
        }
    }
}

/// A named measurement channel accepted by the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldName {
    ConsumedEnergy,
    GeneratedEnergy,
    OutdoorTemperature,
    HumidityLevel,
}

/// Static properties of a field (unit, aggregation flags, description).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub unit: &'static str,
    pub averagable: bool,
    pub summable: bool,
    pub anonymizable: bool,
    pub description: &'static str,
    /// `datacellar:` metadata type of the timeseries that carry this field.
    pub metadata_type: &'static str,
}

impl FieldName {
    pub const ALL: [FieldName; 4] = [
        FieldName::ConsumedEnergy,
        FieldName::GeneratedEnergy,
        FieldName::OutdoorTemperature,
        FieldName::HumidityLevel,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FieldName::ConsumedEnergy => "consumedEnergy",
            FieldName::GeneratedEnergy => "generatedEnergy",
            FieldName::OutdoorTemperature => "outdoorTemperature",
            FieldName::HumidityLevel => "humidityLevel",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == name)
    }

    pub fn spec(self) -> FieldSpec {
        match self {
            FieldName::ConsumedEnergy => FieldSpec {
                unit: "kWh",
                averagable: true,
                summable: false,
                anonymizable: false,
                description: "The consumption of a household in kWh",
                metadata_type: METADATA_ENERGY_METER,
            },
            FieldName::GeneratedEnergy => FieldSpec {
                unit: "kWh",
                averagable: true,
                summable: false,
                anonymizable: false,
                description: "The generation of a household installation in kWh",
                metadata_type: METADATA_ENERGY_METER,
            },
            FieldName::OutdoorTemperature => FieldSpec {
                unit: "°C",
                averagable: true,
                summable: false,
                anonymizable: false,
                description: "Outdoor air temperature measured by a weather station in °C",
                metadata_type: METADATA_WEATHER_STATION,
            },
            FieldName::HumidityLevel => FieldSpec {
                unit: "%",
                averagable: true,
                summable: false,
                anonymizable: false,
                description: "Relative humidity measured by a weather station in %",
                metadata_type: METADATA_WEATHER_STATION,
            },
        }
    }
}

impl std::fmt::Display for FieldName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const METADATA_ENERGY_METER: &str = "datacellar:EnergyMeter";
pub const METADATA_WEATHER_STATION: &str = "datacellar:WeatherStation";

/// Half-open date range `[start, end)` in UTC days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    /// Returns `None` unless `start < end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    /// First day *not* covered.
    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Last day covered.
    pub fn last_day(&self) -> NaiveDate {
        self.end - Duration::days(1)
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn start_datetime(&self) -> NaiveDateTime {
        self.start.and_time(NaiveTime::MIN)
    }

    pub fn end_datetime(&self) -> NaiveDateTime {
        self.end.and_time(NaiveTime::MIN)
    }

    /// Last whole second covered by the range.
    pub fn last_second(&self) -> NaiveDateTime {
        self.end_datetime() - Duration::seconds(1)
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Metadata attached to the entity (meter, station) owning a timeseries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum EntityMetadata {
    EnergyMeter {
        device_id: String,
    },
    WeatherStation {
        device_id: String,
        latitude: Option<f64>,
        longitude: Option<f64>,
    },
}

impl EntityMetadata {
    pub fn device_id(&self) -> &str {
        match self {
            EntityMetadata::EnergyMeter { device_id } => device_id,
            EntityMetadata::WeatherStation { device_id, .. } => device_id,
        }
    }

    /// Metadata used when no sample for an entity carried any.
    pub fn placeholder(entity_id: &str, field: FieldName) -> Self {
        if field.spec().metadata_type == METADATA_WEATHER_STATION {
            EntityMetadata::WeatherStation {
                device_id: entity_id.to_string(),
                latitude: None,
                longitude: None,
            }
        } else {
            EntityMetadata::EnergyMeter {
                device_id: entity_id.to_string(),
            }
        }
    }
}

/// One measurement for one field of one entity.
///
/// `value == None` is a sensor gap reported by the source; it is kept and
/// submitted as `null` rather than dropped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSample {
    /// Position of the raw record this sample came from.
    pub record_index: usize,
    pub entity_id: String,
    pub timestamp: NaiveDateTime,
    pub field: FieldName,
    pub value: Option<f64>,
    pub metadata: Option<EntityMetadata>,
}

impl FieldSample {
    /// UTC timestamp as sent to the sink (`2022-01-01T00:00:00Z`).
    pub fn timestamp_utc(&self) -> String {
        format!("{}Z", self.timestamp.format("%Y-%m-%dT%H:%M:%S"))
    }
}

/// A field declared in a dataset description.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    /// Provisional 1-based id (declaration order). The sink may assign others.
    pub ordinal: u32,
    pub field: FieldName,
    pub spec: FieldSpec,
}

/// One entity and the fields it has timeseries for.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeseriesDescriptor {
    pub entity_id: String,
    /// Declaration order.
    pub fields: Vec<FieldName>,
    pub metadata: EntityMetadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatasetDescription {
    pub dataset_type: DatasetType,
    pub name: String,
    pub description: String,
    pub range: DateRange,
    pub fields: Vec<FieldDescriptor>,
    pub timeseries: Vec<TimeseriesDescriptor>,
}

impl DatasetDescription {
    pub fn field_names(&self) -> Vec<FieldName> {
        self.fields.iter().map(|f| f.field).collect()
    }

    /// Number of sink timeseries the document declares (one per entity and field).
    pub fn timeseries_count(&self) -> usize {
        self.timeseries.iter().map(|t| t.fields.len()).sum()
    }
}

/// A sample the sink did not accept, with the reason.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleFailure {
    pub sample: FieldSample,
    pub reason: String,
}

/// Datapoint submission tally for one dataset type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunResult {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: Vec<SampleFailure>,
}

impl RunResult {
    pub fn record_success(&mut self) {
        self.attempted += 1;
        self.succeeded += 1;
    }

    pub fn record_failure(&mut self, sample: FieldSample, reason: impl Into<String>) {
        self.attempted += 1;
        self.failed.push(SampleFailure {
            sample,
            reason: reason.into(),
        });
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

//! CDE internal API integration.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, Response};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::data::SinkApi;
use crate::domain::{DatasetDescription, FieldName};
use crate::error::{AppError, EXIT_USAGE, SinkApiError};

const CSV_HEADER: [&str; 5] = ["measurement", "timestamp", "value", "unit", "timeseries"];

/// Result of `GET /api/health`.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthReport {
    pub status_code: u16,
    pub status: Option<String>,
    pub version: Option<String>,
    /// `(service, status)` pairs, sorted by service name.
    pub services: Vec<(String, String)>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status_code == 200
    }

    /// 503 means some backing services are down, but the API still answers.
    pub fn is_degraded(&self) -> bool {
        self.status_code == 503
    }

    pub fn is_usable(&self) -> bool {
        self.is_healthy() || self.is_degraded()
    }

    fn from_body(status_code: u16, body: &str) -> Self {
        let json: Value = serde_json::from_str(body).unwrap_or(Value::Null);
        let mut services: Vec<(String, String)> = json
            .get("services")
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .map(|(name, info)| {
                        let status = match info {
                            Value::String(s) => s.clone(),
                            other => other
                                .get("status")
                                .and_then(Value::as_str)
                                .unwrap_or("unknown")
                                .to_string(),
                        };
                        (name.clone(), status)
                    })
                    .collect()
            })
            .unwrap_or_default();
        services.sort();

        Self {
            status_code,
            status: json.get("status").and_then(Value::as_str).map(str::to_string),
            version: json.get("version").and_then(Value::as_str).map(str::to_string),
            services,
        }
    }
}

/// A timeseries as listed by `GET /api/timeseries`.
///
/// Every part is optional: the listing is parsed leniently and the mapping
/// step decides what is usable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteTimeseries {
    pub id: Option<String>,
    pub field_id: Option<u32>,
    pub field_name: Option<String>,
    pub device_id: Option<String>,
}

impl RemoteTimeseries {
    pub fn from_json(item: &Value) -> Self {
        let field = item
            .get("datasetField")
            .or_else(|| item.get("datacellar:datasetField"));
        let metadata = item
            .get("timeSeriesMetadata")
            .or_else(|| item.get("datacellar:timeSeriesMetadata"));

        let field_id = field
            .and_then(|f| f.get("datacellar:datasetFieldID").or_else(|| f.get("id")))
            .or_else(|| item.get("datacellar:datasetFieldID"))
            .and_then(as_id_number);
        let field_name = field
            .and_then(|f| f.get("datacellar:name").or_else(|| f.get("name")))
            .and_then(Value::as_str)
            .map(str::to_string);

        Self {
            id: item.get("id").and_then(as_id_string),
            field_id,
            field_name,
            device_id: metadata
                .and_then(|m| m.get("datacellar:deviceID"))
                .and_then(as_id_string),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreatedDataset {
    pub dataset_id: Option<String>,
    pub timeseries: Vec<RemoteTimeseries>,
}

/// One measurement as accepted by `POST /api/timeseries`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Datapoint {
    pub measurement: FieldName,
    pub unit: String,
    pub value: Option<f64>,
    pub timestamp: String,
    #[serde(rename = "timeseries")]
    pub timeseries_id: String,
}

pub struct CdeClient {
    client: Client,
    base_url: String,
}

impl CdeClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::new(EXIT_USAGE, format!("Failed to build CDE HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn health(&self) -> Result<HealthReport, SinkApiError> {
        let endpoint = "GET /api/health";
        let resp = self
            .client
            .get(self.url("api/health"))
            .send()
            .map_err(|e| SinkApiError::transport(endpoint, e))?;

        let status = resp.status().as_u16();
        let body = resp.text().unwrap_or_default();
        let report = HealthReport::from_body(status, &body);

        if report.is_healthy() {
            info!(version = report.version.as_deref().unwrap_or("unknown"), "CDE API is healthy");
        } else if report.is_degraded() {
            warn!("CDE API is running but some services are unhealthy");
        } else {
            return Err(SinkApiError::http(endpoint, status, &body));
        }
        Ok(report)
    }

    /// Upload the JSON-LD document as a multipart `file` part.
    pub fn upload_dataset(&self, description: &DatasetDescription) -> Result<Option<String>, SinkApiError> {
        let endpoint = "POST /api/dataset";
        let document = serde_json::to_vec_pretty(&description.to_jsonld())
            .map_err(|e| SinkApiError::transport(endpoint, e))?;
        let file_name = description.definition_file_name();
        info!(name = %description.name, file = %file_name, bytes = document.len(), "uploading dataset");

        let part = Part::bytes(document)
            .file_name(file_name)
            .mime_str("application/json")
            .map_err(|e| SinkApiError::transport(endpoint, e))?;
        let resp = self
            .client
            .post(self.url("api/dataset"))
            .multipart(Form::new().part("file", part))
            .send()
            .map_err(|e| SinkApiError::transport(endpoint, e))?;
        let resp = check_created(endpoint, resp)?;

        // The body is informative only; a non-JSON acknowledgement is fine.
        let body = resp.text().unwrap_or_default();
        let dataset_id = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("dataset_id").or_else(|| v.get("id")).and_then(as_id_string));
        match &dataset_id {
            Some(id) => info!(dataset_id = %id, "dataset uploaded"),
            None => warn!("dataset uploaded, but the response carried no dataset_id"),
        }
        Ok(dataset_id)
    }

    /// Timeseries of one dataset, filtered by id when known, else by name.
    pub fn list_timeseries(
        &self,
        dataset_id: Option<&str>,
        dataset_name: &str,
    ) -> Result<Vec<RemoteTimeseries>, SinkApiError> {
        let endpoint = "GET /api/timeseries";
        let filter = match dataset_id {
            Some(id) => ("dataset_id", id),
            None => ("dataset", dataset_name),
        };
        debug!(filter = filter.0, value = filter.1, "listing timeseries");

        let resp = self
            .client
            .get(self.url("api/timeseries"))
            .query(&[filter])
            .send()
            .map_err(|e| SinkApiError::transport(endpoint, e))?;
        let resp = check_created(endpoint, resp)?;
        let status = resp.status().as_u16();
        let body: Value = resp
            .json()
            .map_err(|e| SinkApiError::invalid_payload(endpoint, status, e))?;

        let items = match &body {
            Value::Array(items) => items.as_slice(),
            other => other
                .get("timeseries")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .ok_or_else(|| SinkApiError::invalid_payload(endpoint, status, "expected a list of timeseries"))?,
        };
        let timeseries: Vec<RemoteTimeseries> = items.iter().map(RemoteTimeseries::from_json).collect();
        info!(count = timeseries.len(), "retrieved timeseries from CDE");
        Ok(timeseries)
    }

    pub fn add_datapoint(&self, point: &Datapoint) -> Result<(), SinkApiError> {
        let endpoint = "POST /api/timeseries";
        let resp = self
            .client
            .post(self.url("api/timeseries"))
            .json(point)
            .send()
            .map_err(|e| SinkApiError::transport(endpoint, e))?;
        check_created(endpoint, resp)?;
        Ok(())
    }

    pub fn add_datapoints_csv(&self, points: &[Datapoint], batch_no: usize) -> Result<(), SinkApiError> {
        let endpoint = "POST /api/timeseries/csv";
        let csv = encode_csv(points).map_err(|e| SinkApiError::transport(endpoint, e))?;
        debug!(batch_no, rows = points.len(), "uploading CSV batch");

        let part = Part::bytes(csv)
            .file_name(format!("datapoints_batch_{batch_no}.csv"))
            .mime_str("text/csv")
            .map_err(|e| SinkApiError::transport(endpoint, e))?;
        let resp = self
            .client
            .post(self.url("api/timeseries/csv"))
            .multipart(Form::new().part("file", part))
            .send()
            .map_err(|e| SinkApiError::transport(endpoint, e))?;
        check_created(endpoint, resp)?;
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

impl SinkApi for CdeClient {
    fn health_check(&self) -> Result<HealthReport, SinkApiError> {
        self.health()
    }

    fn create_dataset(&self, description: &DatasetDescription) -> Result<CreatedDataset, SinkApiError> {
        let dataset_id = self.upload_dataset(description)?;
        let timeseries = self.list_timeseries(dataset_id.as_deref(), &description.name)?;
        Ok(CreatedDataset {
            dataset_id,
            timeseries,
        })
    }

    fn submit_datapoint(&self, point: &Datapoint) -> Result<(), SinkApiError> {
        self.add_datapoint(point)
    }

    fn submit_batch(&self, points: &[Datapoint], batch_no: usize) -> Result<(), SinkApiError> {
        self.add_datapoints_csv(points, batch_no)
    }
}

/// CSV body for `/api/timeseries/csv`. A missing value is an empty cell.
pub fn encode_csv(points: &[Datapoint]) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CSV_HEADER)?;
    for p in points {
        let value = p.value.map(|v| v.to_string()).unwrap_or_default();
        writer.write_record([
            p.measurement.as_str(),
            p.timestamp.as_str(),
            value.as_str(),
            p.unit.as_str(),
            p.timeseries_id.as_str(),
        ])?;
    }
    writer.into_inner().map_err(|e| e.into_error().into())
}

/// 200 OK and 201 Created are both acknowledgements.
fn check_created(endpoint: &str, resp: Response) -> Result<Response, SinkApiError> {
    let status = resp.status();
    if status == StatusCode::OK || status == StatusCode::CREATED {
        return Ok(resp);
    }
    let body = resp.text().unwrap_or_default();
    Err(SinkApiError::http(endpoint, status.as_u16(), &body))
}

fn as_id_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_id_number(v: &Value) -> Option<u32> {
    match v {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

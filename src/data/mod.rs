//! Remote API integrations.
//!
//! - `faen`: the source API (login + date-range queries)
//! - `cde`: the sink API (health, dataset upload, datapoints)
//! - `query`: structured filters sent to the source API
//!
//! The pipeline only talks to the two traits below so it can be driven by
//! in-memory fakes in tests.

use serde_json::Value;

use crate::domain::{DatasetDescription, DateRange, SourceCategory};
use crate::error::{AuthError, FetchError, SinkApiError};

pub mod cde;
pub mod faen;
pub mod query;

pub use cde::{CdeClient, CreatedDataset, Datapoint, HealthReport, RemoteTimeseries};
pub use faen::{Credentials, FaenClient, Session};

pub trait SourceApi {
    fn login(&mut self) -> Result<(), AuthError>;

    /// Raw records for one category over the half-open range, oldest first.
    ///
    /// `FetchError::Auth` means the source no longer accepts the credentials.
    fn fetch_records(
        &mut self,
        category: SourceCategory,
        range: &DateRange,
        limit: usize,
    ) -> Result<Vec<Value>, FetchError>;
}

pub trait SinkApi {
    fn health_check(&self) -> Result<HealthReport, SinkApiError>;

    /// Upload the dataset document and list the timeseries the sink created for it.
    fn create_dataset(&self, description: &DatasetDescription) -> Result<CreatedDataset, SinkApiError>;

    fn submit_datapoint(&self, point: &Datapoint) -> Result<(), SinkApiError>;

    /// All-or-nothing upload of several datapoints. `batch_no` is 1-based.
    fn submit_batch(&self, points: &[Datapoint], batch_no: usize) -> Result<(), SinkApiError>;
}

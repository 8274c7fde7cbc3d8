//! The upload workflow, one dataset type at a time.
//!
//! Per dataset type the run moves through
//!
//! ```text
//! Idle -> Authenticated -> Fetched -> Transformed -> DatasetCreated
//!      -> FieldsMapped -> Submitting -> Done | Aborted
//! ```
//!
//! The sink health check and the source login happen once, before any type
//! starts; either failing aborts every requested type. A re-login rejected
//! mid-run likewise aborts the remaining types. Any other failure only aborts
//! the type it happened in and the next type is still attempted.
//! Per-datapoint rejections never abort; they are tallied in `RunResult`.
//!
//! The CLI (`run`, `preview`) and the tests drive the same code through the
//! `SourceApi` / `SinkApi` traits.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, error, info, warn};

use crate::data::{Datapoint, SinkApi, SourceApi};
use crate::dataset::{self, BuildError};
use crate::domain::{DatasetDescription, DatasetType, DateRange, FieldSample, RunResult};
use crate::error::{EXIT_ABORTED, EXIT_DECLINED, EXIT_INTERRUPTED, EXIT_PARTIAL, FetchError};
use crate::mapping::{self, ReturnedField, TimeseriesIndex};
use crate::transform::{self, ParsedRecords};

/// Log a progress line every this many single datapoints.
const PROGRESS_EVERY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RunState {
    Idle,
    Authenticated,
    Fetched,
    Transformed,
    DatasetCreated,
    FieldsMapped,
    Submitting,
    Done,
    Aborted,
}

/// Where the run can stop and ask before continuing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    PreFetch,
    PreCreate,
    PreSubmit,
}

impl Checkpoint {
    pub fn prompt(self, dataset_type: DatasetType, options: &RunOptions) -> String {
        match self {
            Checkpoint::PreFetch => format!(
                "Fetch {dataset_type} records for {} to {} (limit {})?",
                options.range.start(),
                options.range.last_day(),
                options.limit
            ),
            Checkpoint::PreCreate => format!("Create the {dataset_type} dataset in CDE?"),
            Checkpoint::PreSubmit => format!("Upload the {dataset_type} datapoints to CDE?"),
        }
    }
}

/// The operation a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Health,
    Login,
    Fetch,
    Build,
    CreateDataset,
    MapFields,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Stage::Health => "sink health check",
            Stage::Login => "source login",
            Stage::Fetch => "fetch",
            Stage::Build => "dataset description",
            Stage::CreateDataset => "dataset creation",
            Stage::MapFields => "field mapping",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortCause {
    Failed { stage: Stage, error: String },
    Declined(Checkpoint),
    Interrupted,
}

/// What happened to one dataset type.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeOutcome {
    pub dataset_type: DatasetType,
    /// `Done` or `Aborted`.
    pub state: RunState,
    /// Last non-terminal state reached.
    pub reached: RunState,
    pub abort: Option<AbortCause>,
    pub dataset_name: Option<String>,
    pub dataset_id: Option<String>,
    pub records_fetched: usize,
    pub records_skipped: usize,
    pub samples: usize,
    /// Present once submission started (also for an interrupted submission).
    pub result: Option<RunResult>,
}

impl TypeOutcome {
    fn new(dataset_type: DatasetType) -> Self {
        Self {
            dataset_type,
            state: RunState::Idle,
            reached: RunState::Idle,
            abort: None,
            dataset_name: None,
            dataset_id: None,
            records_fetched: 0,
            records_skipped: 0,
            samples: 0,
            result: None,
        }
    }

    fn advance(&mut self, state: RunState) {
        debug!(dataset = %self.dataset_type, ?state, "state");
        self.state = state;
        self.reached = state;
    }

    fn abort(mut self, cause: AbortCause) -> Self {
        match &cause {
            AbortCause::Failed { stage, error: err } => {
                error!(dataset = %self.dataset_type, stage = stage.label(), error = %err, "aborted")
            }
            AbortCause::Declined(cp) => warn!(dataset = %self.dataset_type, checkpoint = ?cp, "declined"),
            AbortCause::Interrupted => warn!(dataset = %self.dataset_type, "interrupted"),
        }
        self.state = RunState::Aborted;
        self.abort = Some(cause);
        self
    }

    pub fn is_done(&self) -> bool {
        self.state == RunState::Done
    }

    pub fn failed_samples(&self) -> usize {
        self.result.as_ref().map_or(0, |r| r.failed.len())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub outcomes: Vec<TypeOutcome>,
}

impl RunReport {
    /// 130 interrupted, 4 aborted by an error, 5 declined, 3 rejected datapoints, else 0.
    pub fn exit_code(&self) -> u8 {
        let any = |pred: fn(&TypeOutcome) -> bool| self.outcomes.iter().any(pred);

        if any(|o| o.abort == Some(AbortCause::Interrupted)) {
            EXIT_INTERRUPTED
        } else if any(|o| matches!(o.abort, Some(AbortCause::Failed { .. }))) {
            EXIT_ABORTED
        } else if any(|o| matches!(o.abort, Some(AbortCause::Declined(_)))) {
            EXIT_DECLINED
        } else if any(|o| o.failed_samples() > 0) {
            EXIT_PARTIAL
        } else {
            0
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code() == 0
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub range: DateRange,
    /// Records per source endpoint.
    pub limit: usize,
    pub name: Option<String>,
    /// 0 submits datapoints one by one; otherwise CSV batches of this size.
    pub batch_size: usize,
    pub save_definition: Option<PathBuf>,
    /// Raw records echoed at debug level after each fetch.
    pub preview_records: usize,
}

/// Fetch every category a dataset type needs and validate the records.
///
/// Returns the parsed records and the raw record count.
pub fn fetch_records<S: SourceApi>(
    source: &mut S,
    dataset_type: DatasetType,
    options: &RunOptions,
) -> Result<(ParsedRecords, usize), FetchError> {
    let mut parsed = ParsedRecords::default();
    let mut fetched = 0;

    for &category in dataset_type.categories() {
        info!(category = category.label(), range = %options.range, limit = options.limit, "fetching");
        let raw = source.fetch_records(category, &options.range, options.limit)?;
        fetched += raw.len();

        for (i, record) in raw.iter().take(options.preview_records).enumerate() {
            debug!(category = category.label(), index = i, record = %record, "sample record");
        }

        let batch = transform::parse_records(category, &raw);
        for skipped in &batch.skipped {
            warn!(category = skipped.category.label(), index = skipped.index, reason = %skipped.reason, "skipping record");
        }
        parsed.extend(batch);
    }
    Ok((parsed, fetched))
}

/// Build the dataset description from already parsed records.
pub fn describe(
    parsed: &ParsedRecords,
    dataset_type: DatasetType,
    options: &RunOptions,
) -> Result<DatasetDescription, BuildError> {
    let samples = transform::to_field_samples(&parsed.records, dataset_type);
    dataset::build(samples, dataset_type, options.range, options.name.clone())
}

pub struct Orchestrator<'a, S, K, C> {
    source: &'a mut S,
    sink: &'a K,
    confirm: C,
    options: RunOptions,
    interrupt: Arc<AtomicBool>,
}

impl<'a, S, K, C> Orchestrator<'a, S, K, C>
where
    S: SourceApi,
    K: SinkApi,
    C: FnMut(Checkpoint, DatasetType) -> bool,
{
    /// `confirm` answers each checkpoint; return `true` to continue.
    pub fn new(source: &'a mut S, sink: &'a K, confirm: C, options: RunOptions) -> Self {
        Self {
            source,
            sink,
            confirm,
            options,
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share a flag (set by the Ctrl-C handler) that stops the run between steps.
    pub fn with_interrupt(mut self, interrupt: Arc<AtomicBool>) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn run(&mut self, dataset_types: &[DatasetType]) -> RunReport {
        let abort_all = |stage: Stage, error: String| RunReport {
            outcomes: dataset_types
                .iter()
                .map(|&t| {
                    TypeOutcome::new(t).abort(AbortCause::Failed {
                        stage,
                        error: error.clone(),
                    })
                })
                .collect(),
        };

        match self.sink.health_check() {
            Ok(report) if report.is_usable() => {}
            Ok(report) => {
                return abort_all(Stage::Health, format!("sink API reported status {}", report.status_code));
            }
            Err(err) => return abort_all(Stage::Health, err.to_string()),
        }

        if let Err(err) = self.source.login() {
            return abort_all(Stage::Login, err.to_string());
        }

        let mut outcomes = Vec::with_capacity(dataset_types.len());
        // Set once the source rejects our credentials; later types are not attempted.
        let mut auth_failure: Option<AbortCause> = None;
        for &dataset_type in dataset_types {
            let outcome = if let Some(cause) = &auth_failure {
                TypeOutcome::new(dataset_type).abort(cause.clone())
            } else if self.interrupted() {
                TypeOutcome::new(dataset_type).abort(AbortCause::Interrupted)
            } else {
                info!(dataset = %dataset_type, "starting dataset");
                self.run_type(dataset_type)
            };
            if let Some(cause @ AbortCause::Failed { stage: Stage::Login, .. }) = &outcome.abort {
                auth_failure = Some(cause.clone());
            }
            outcomes.push(outcome);
        }
        RunReport { outcomes }
    }

    fn run_type(&mut self, dataset_type: DatasetType) -> TypeOutcome {
        let mut outcome = TypeOutcome::new(dataset_type);
        outcome.advance(RunState::Authenticated);

        if let Some(cause) = self.checkpoint(Checkpoint::PreFetch, dataset_type) {
            return outcome.abort(cause);
        }

        let parsed = match fetch_records(&mut *self.source, dataset_type, &self.options) {
            Ok((parsed, fetched)) => {
                outcome.records_fetched = fetched;
                outcome.records_skipped = parsed.skipped.len();
                parsed
            }
            Err(FetchError::Auth(err)) => {
                return outcome.abort(AbortCause::Failed {
                    stage: Stage::Login,
                    error: err.to_string(),
                });
            }
            Err(FetchError::Source(err)) => {
                return outcome.abort(AbortCause::Failed {
                    stage: Stage::Fetch,
                    error: err.to_string(),
                });
            }
        };
        outcome.advance(RunState::Fetched);

        let samples = transform::to_field_samples(&parsed.records, dataset_type);
        outcome.samples = samples.clone().count();
        info!(
            dataset = %dataset_type,
            records = parsed.records.len(),
            skipped = outcome.records_skipped,
            samples = outcome.samples,
            "transformed records"
        );

        let description = match dataset::build(samples.clone(), dataset_type, self.options.range, self.options.name.clone()) {
            Ok(d) => d,
            Err(err) => {
                return outcome.abort(AbortCause::Failed {
                    stage: Stage::Build,
                    error: err.to_string(),
                });
            }
        };
        outcome.dataset_name = Some(description.name.clone());
        outcome.advance(RunState::Transformed);

        if let Some(dir) = &self.options.save_definition {
            match crate::io::write_definition_json(dir, &description) {
                Ok(path) => info!(path = %path.display(), "saved dataset definition"),
                Err(err) => warn!(%err, "could not save dataset definition"),
            }
        }

        if let Some(cause) = self.checkpoint(Checkpoint::PreCreate, dataset_type) {
            return outcome.abort(cause);
        }

        let created = match self.sink.create_dataset(&description) {
            Ok(created) => created,
            Err(err) => {
                return outcome.abort(AbortCause::Failed {
                    stage: Stage::CreateDataset,
                    error: err.to_string(),
                });
            }
        };
        outcome.dataset_id = created.dataset_id.clone();
        outcome.advance(RunState::DatasetCreated);

        let returned: Vec<ReturnedField> = created.timeseries.iter().map(ReturnedField::from).collect();
        let field_ids = match mapping::resolve(&returned, &description.field_names()) {
            Ok(ids) => ids,
            Err(err) => {
                return outcome.abort(AbortCause::Failed {
                    stage: Stage::MapFields,
                    error: err.to_string(),
                });
            }
        };
        let index = TimeseriesIndex::build(&created.timeseries, &field_ids);
        if index.ignored() > 0 {
            warn!(ignored = index.ignored(), "timeseries without id or device were ignored");
        }
        info!(fields = field_ids.len(), timeseries = index.len(), "mapped sink identifiers");
        outcome.advance(RunState::FieldsMapped);

        if let Some(cause) = self.checkpoint(Checkpoint::PreSubmit, dataset_type) {
            return outcome.abort(cause);
        }

        outcome.advance(RunState::Submitting);
        let (result, interrupted) = self.submit(samples, &index);
        info!(
            dataset = %dataset_type,
            attempted = result.attempted,
            succeeded = result.succeeded,
            failed = result.failed.len(),
            "submission finished"
        );
        outcome.result = Some(result);

        if interrupted {
            return outcome.abort(AbortCause::Interrupted);
        }
        outcome.state = RunState::Done;
        outcome
    }

    /// `None` to continue, otherwise why not.
    fn checkpoint(&mut self, checkpoint: Checkpoint, dataset_type: DatasetType) -> Option<AbortCause> {
        if self.interrupted() {
            return Some(AbortCause::Interrupted);
        }
        let answer = (self.confirm)(checkpoint, dataset_type);
        // The prompt itself may have been interrupted; that is not a "no".
        if self.interrupted() {
            return Some(AbortCause::Interrupted);
        }
        if !answer {
            return Some(AbortCause::Declined(checkpoint));
        }
        None
    }

    fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    /// Submit every sample; returns the tally and whether an interrupt stopped it early.
    fn submit(&self, samples: impl Iterator<Item = FieldSample>, index: &TimeseriesIndex) -> (RunResult, bool) {
        let mut result = RunResult::default();
        let mut pending: Vec<(FieldSample, Datapoint)> = Vec::new();
        let mut batch_no = 0;
        let batch_size = self.options.batch_size;

        for sample in samples {
            if self.interrupted() {
                return (result, true);
            }

            let Some(timeseries_id) = index.lookup(&sample.entity_id, sample.field) else {
                let reason = format!("no timeseries for entity '{}' and field {}", sample.entity_id, sample.field);
                result.record_failure(sample, reason);
                continue;
            };
            let point = datapoint(&sample, timeseries_id);

            if batch_size == 0 {
                match self.sink.submit_datapoint(&point) {
                    Ok(()) => result.record_success(),
                    Err(err) => {
                        warn!(record = sample.record_index, entity = %sample.entity_id, field = %sample.field, %err, "datapoint rejected");
                        result.record_failure(sample, err.to_string());
                    }
                }
                if result.attempted % PROGRESS_EVERY == 0 {
                    info!(attempted = result.attempted, succeeded = result.succeeded, "submitting datapoints");
                }
                continue;
            }

            pending.push((sample, point));
            if pending.len() == batch_size {
                batch_no += 1;
                self.flush(&mut pending, batch_no, &mut result);
            }
        }

        if !pending.is_empty() {
            if self.interrupted() {
                return (result, true);
            }
            batch_no += 1;
            self.flush(&mut pending, batch_no, &mut result);
        }
        (result, false)
    }

    fn flush(&self, pending: &mut Vec<(FieldSample, Datapoint)>, batch_no: usize, result: &mut RunResult) {
        let points: Vec<Datapoint> = pending.iter().map(|(_, p)| p.clone()).collect();
        match self.sink.submit_batch(&points, batch_no) {
            Ok(()) => {
                info!(batch = batch_no, datapoints = points.len(), "uploaded batch");
                for _ in pending.drain(..) {
                    result.record_success();
                }
            }
            Err(err) => {
                warn!(batch = batch_no, datapoints = points.len(), %err, "batch rejected");
                let reason = format!("batch {batch_no}: {err}");
                for (sample, _) in pending.drain(..) {
                    result.record_failure(sample, reason.clone());
                }
            }
        }
    }
}

fn datapoint(sample: &FieldSample, timeseries_id: &str) -> Datapoint {
    Datapoint {
        measurement: sample.field,
        unit: sample.field.spec().unit.to_string(),
        value: sample.value,
        timestamp: sample.timestamp_utc(),
        timeseries_id: timeseries_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;

    use chrono::NaiveDate;
    use serde_json::{Value, json};

    use crate::data::{CreatedDataset, HealthReport, RemoteTimeseries};
    use crate::domain::{FieldName, SourceCategory};
    use crate::error::{AuthError, SinkApiError, SourceApiError};

    #[derive(Default)]
    struct FakeSource {
        records: HashMap<SourceCategory, Vec<Value>>,
        failing: Option<SourceCategory>,
        /// Fetching this category finds the credentials rejected.
        revoked: Option<SourceCategory>,
        reject_login: bool,
        fetched: Vec<SourceCategory>,
    }

    impl SourceApi for FakeSource {
        fn login(&mut self) -> Result<(), AuthError> {
            if self.reject_login {
                return Err(AuthError::Rejected {
                    status: 401,
                    body: "bad credentials".into(),
                });
            }
            Ok(())
        }

        fn fetch_records(
            &mut self,
            category: SourceCategory,
            _range: &DateRange,
            limit: usize,
        ) -> Result<Vec<Value>, FetchError> {
            self.fetched.push(category);
            if self.failing == Some(category) {
                return Err(SourceApiError::http("GET /x", 500, "boom").into());
            }
            if self.revoked == Some(category) {
                return Err(AuthError::Rejected {
                    status: 401,
                    body: "token revoked".into(),
                }
                .into());
            }
            let mut out = self.records.get(&category).cloned().unwrap_or_default();
            out.truncate(limit);
            Ok(out)
        }
    }

    struct FakeSink {
        health_status: u16,
        /// Zero-based datapoint submissions that fail.
        reject_points: Vec<usize>,
        reject_batches: bool,
        /// Leave out timeseries for this entity.
        omit_entity: Option<String>,
        /// Echo no timeseries for this field.
        omit_field: Option<FieldName>,
        /// Dataset creation fails for this type.
        failing_create: Option<DatasetType>,
        created: RefCell<Vec<String>>,
        points: RefCell<Vec<Datapoint>>,
        batches: RefCell<Vec<usize>>,
        calls: Cell<usize>,
    }

    impl Default for FakeSink {
        fn default() -> Self {
            Self {
                health_status: 200,
                reject_points: Vec::new(),
                reject_batches: false,
                omit_entity: None,
                omit_field: None,
                failing_create: None,
                created: RefCell::default(),
                points: RefCell::default(),
                batches: RefCell::default(),
                calls: Cell::new(0),
            }
        }
    }

    impl SinkApi for FakeSink {
        fn health_check(&self) -> Result<HealthReport, SinkApiError> {
            if self.health_status >= 500 && self.health_status != 503 {
                return Err(SinkApiError::http("GET /api/health", self.health_status, "down"));
            }
            Ok(HealthReport {
                status_code: self.health_status,
                status: None,
                version: None,
                services: Vec::new(),
            })
        }

        fn create_dataset(&self, description: &DatasetDescription) -> Result<CreatedDataset, SinkApiError> {
            self.calls.set(self.calls.get() + 1);
            if self.failing_create == Some(description.dataset_type) {
                return Err(SinkApiError::http("POST /api/dataset", 422, "invalid document"));
            }
            self.created.borrow_mut().push(description.name.clone());
            let mut timeseries = Vec::new();
            for ts in description.timeseries.iter().rev() {
                if self.omit_entity.as_deref() == Some(ts.entity_id.as_str()) {
                    continue;
                }
                for field in ts.fields.iter().filter(|f| Some(**f) != self.omit_field) {
                    let ordinal = description.fields.iter().find(|f| f.field == *field).map(|f| f.ordinal);
                    timeseries.push(RemoteTimeseries {
                        id: Some(format!("ts-{}-{}", ts.entity_id, field)),
                        field_id: ordinal,
                        field_name: Some(field.as_str().to_string()),
                        device_id: Some(ts.entity_id.clone()),
                    });
                }
            }
            Ok(CreatedDataset {
                dataset_id: Some(format!("ds-{}", self.created.borrow().len())),
                timeseries,
            })
        }

        fn submit_datapoint(&self, point: &Datapoint) -> Result<(), SinkApiError> {
            self.calls.set(self.calls.get() + 1);
            let n = self.points.borrow().len();
            self.points.borrow_mut().push(point.clone());
            if self.reject_points.contains(&n) {
                return Err(SinkApiError::http("POST /api/timeseries", 400, "rejected"));
            }
            Ok(())
        }

        fn submit_batch(&self, points: &[Datapoint], batch_no: usize) -> Result<(), SinkApiError> {
            self.calls.set(self.calls.get() + 1);
            self.batches.borrow_mut().push(points.len());
            self.points.borrow_mut().extend_from_slice(points);
            if self.reject_batches && batch_no == 2 {
                return Err(SinkApiError::http("POST /api/timeseries/csv", 500, "csv failed"));
            }
            Ok(())
        }
    }

    fn options() -> RunOptions {
        RunOptions {
            range: DateRange::new(
                NaiveDate::from_ymd_opt(2022, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2022, 4, 1).unwrap(),
            )
            .unwrap(),
            limit: 50,
            name: None,
            batch_size: 0,
            save_definition: None,
            preview_records: 2,
        }
    }

    fn consumption(n: usize) -> Vec<Value> {
        (0..n)
            .map(|i| {
                json!({
                    "user_id": format!("u{}", i % 2),
                    "datetime": format!("2022-01-01T{:02}:00:00", i),
                    "data": { "energy_consumption_kwh": i as f64 }
                })
            })
            .collect()
    }

    fn source_with_all() -> FakeSource {
        let mut source = FakeSource::default();
        source.records.insert(SourceCategory::Consumption, consumption(5));
        source.records.insert(
            SourceCategory::Generation,
            vec![json!({ "user_id": "u1", "datetime": "2022-01-01T10:00:00", "data": { "generation_kwh": 2.0 } })],
        );
        source.records.insert(
            SourceCategory::Weather,
            vec![json!({ "datetime_utc": "2022-01-01T10:00:00", "ta": 18.0, "hr": null, "idema": "C447A" })],
        );
        source
    }

    fn run(
        source: &mut FakeSource,
        sink: &FakeSink,
        options: RunOptions,
        types: &[DatasetType],
    ) -> RunReport {
        Orchestrator::new(source, sink, |_, _| true, options).run(types)
    }

    #[test]
    fn unattended_run_uploads_every_sample() {
        let mut source = source_with_all();
        let sink = FakeSink::default();
        let report = run(&mut source, &sink, options(), &DatasetType::ALL);

        assert_eq!(report.exit_code(), 0);
        let consumption = &report.outcomes[0];
        assert!(consumption.is_done());
        assert_eq!(consumption.samples, 5);
        assert_eq!(consumption.dataset_id.as_deref(), Some("ds-1"));
        assert_eq!(consumption.result.as_ref().unwrap().succeeded, 5);

        let gw = &report.outcomes[1];
        assert!(gw.is_done());
        assert_eq!(gw.samples, 3);
        assert_eq!(gw.dataset_name.as_deref(), Some("FAEN Generation & Weather January-March 2022"));

        let points = sink.points.borrow();
        let humidity = points.iter().find(|p| p.measurement.as_str() == "humidityLevel").unwrap();
        assert_eq!(humidity.value, None);
        assert_eq!(humidity.timeseries_id, "ts-weather-C447A-humidityLevel");
        assert_eq!(humidity.timestamp, "2022-01-01T10:00:00Z");
        assert_eq!(humidity.unit, "%");
    }

    #[test]
    fn failing_type_does_not_stop_the_next_one() {
        let mut source = source_with_all();
        source.failing = Some(SourceCategory::Consumption);
        let sink = FakeSink::default();
        let report = run(&mut source, &sink, options(), &DatasetType::ALL);

        let first = &report.outcomes[0];
        assert_eq!(first.state, RunState::Aborted);
        assert!(matches!(first.abort, Some(AbortCause::Failed { stage: Stage::Fetch, .. })));
        assert!(report.outcomes[1].is_done());
        assert_eq!(sink.created.borrow().len(), 1);
        assert_eq!(report.exit_code(), EXIT_ABORTED);
    }

    #[test]
    fn one_rejected_sample_is_recorded_and_the_rest_continue() {
        let mut source = source_with_all();
        let sink = FakeSink {
            reject_points: vec![2],
            ..FakeSink::default()
        };
        let report = run(&mut source, &sink, options(), &[DatasetType::Consumption]);

        let result = report.outcomes[0].result.as_ref().unwrap();
        assert_eq!(result.attempted, 5);
        assert_eq!(result.succeeded, 4);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].sample.record_index, 2);
        assert!(result.failed[0].reason.contains("400"));
        assert!(report.outcomes[0].is_done());
        assert_eq!(report.exit_code(), EXIT_PARTIAL);
    }

    #[test]
    fn missing_timeseries_fails_only_that_entity() {
        let mut source = source_with_all();
        let sink = FakeSink {
            omit_entity: Some("u1".into()),
            ..FakeSink::default()
        };
        let report = run(&mut source, &sink, options(), &[DatasetType::Consumption]);

        let result = report.outcomes[0].result.as_ref().unwrap();
        assert_eq!(result.succeeded, 3);
        assert_eq!(result.failed.len(), 2);
        assert!(result.failed.iter().all(|f| f.sample.entity_id == "u1"));
        assert!(result.failed[0].reason.contains("no timeseries"));
    }

    #[test]
    fn declining_stops_before_any_further_sink_call() {
        let mut source = source_with_all();
        let sink = FakeSink::default();
        let mut asked = Vec::new();
        let report = Orchestrator::new(
            &mut source,
            &sink,
            |cp, _| {
                asked.push(cp);
                cp != Checkpoint::PreCreate
            },
            options(),
        )
        .run(&[DatasetType::Consumption]);

        assert_eq!(asked, vec![Checkpoint::PreFetch, Checkpoint::PreCreate]);
        assert_eq!(report.outcomes[0].abort, Some(AbortCause::Declined(Checkpoint::PreCreate)));
        assert_eq!(report.outcomes[0].reached, RunState::Transformed);
        assert_eq!(sink.calls.get(), 0);
        assert_eq!(report.exit_code(), EXIT_DECLINED);
    }

    #[test]
    fn declining_upload_keeps_the_created_dataset() {
        let mut source = source_with_all();
        let sink = FakeSink::default();
        let report = Orchestrator::new(&mut source, &sink, |cp, _| cp != Checkpoint::PreSubmit, options())
            .run(&[DatasetType::Consumption]);

        assert_eq!(report.outcomes[0].dataset_id.as_deref(), Some("ds-1"));
        assert_eq!(report.outcomes[0].reached, RunState::FieldsMapped);
        assert!(sink.points.borrow().is_empty());
    }

    #[test]
    fn login_failure_aborts_every_type_without_fetching() {
        let mut source = source_with_all();
        source.reject_login = true;
        let sink = FakeSink::default();
        let report = run(&mut source, &sink, options(), &DatasetType::ALL);

        assert_eq!(report.outcomes.len(), 2);
        for o in &report.outcomes {
            assert!(matches!(o.abort, Some(AbortCause::Failed { stage: Stage::Login, .. })));
        }
        assert!(source.fetched.is_empty());
    }

    #[test]
    fn rejected_relogin_during_fetch_aborts_the_remaining_types() {
        let mut source = source_with_all();
        source.revoked = Some(SourceCategory::Consumption);
        let sink = FakeSink::default();
        let report = run(&mut source, &sink, options(), &DatasetType::ALL);

        assert_eq!(report.outcomes.len(), 2);
        for o in &report.outcomes {
            assert!(matches!(
                &o.abort,
                Some(AbortCause::Failed { stage: Stage::Login, error }) if error.contains("token revoked")
            ));
        }
        assert_eq!(source.fetched, vec![SourceCategory::Consumption]);
        assert_eq!(sink.calls.get(), 0);
        assert_eq!(report.exit_code(), EXIT_ABORTED);
    }

    #[test]
    fn unmapped_field_aborts_submission_for_that_type_only() {
        let mut source = source_with_all();
        let sink = FakeSink {
            omit_field: Some(FieldName::HumidityLevel),
            ..FakeSink::default()
        };
        let report = run(&mut source, &sink, options(), &[DatasetType::GenerationWeather, DatasetType::Consumption]);

        let gw = &report.outcomes[0];
        assert!(matches!(
            &gw.abort,
            Some(AbortCause::Failed { stage: Stage::MapFields, error }) if error.contains("humidityLevel")
        ));
        assert_eq!(gw.reached, RunState::DatasetCreated);
        assert!(gw.result.is_none());

        let consumption = &report.outcomes[1];
        assert!(consumption.is_done());
        // Only the consumption samples reached the sink.
        let points = sink.points.borrow();
        assert_eq!(points.len(), 5);
        assert!(points.iter().all(|p| p.measurement == FieldName::ConsumedEnergy));
        assert_eq!(report.exit_code(), EXIT_ABORTED);
    }

    #[test]
    fn failed_dataset_creation_aborts_that_type_only() {
        let mut source = source_with_all();
        let sink = FakeSink {
            failing_create: Some(DatasetType::Consumption),
            ..FakeSink::default()
        };
        let report = run(&mut source, &sink, options(), &DatasetType::ALL);

        let consumption = &report.outcomes[0];
        assert!(matches!(
            &consumption.abort,
            Some(AbortCause::Failed { stage: Stage::CreateDataset, error }) if error.contains("422")
        ));
        assert_eq!(consumption.reached, RunState::Transformed);
        assert!(consumption.dataset_id.is_none());

        assert!(report.outcomes[1].is_done());
        assert!(sink.points.borrow().iter().all(|p| p.measurement != FieldName::ConsumedEnergy));
        assert_eq!(report.exit_code(), EXIT_ABORTED);
    }

    #[test]
    fn unhealthy_sink_aborts_before_login() {
        let mut source = source_with_all();
        let sink = FakeSink {
            health_status: 500,
            ..FakeSink::default()
        };
        let report = run(&mut source, &sink, options(), &[DatasetType::Consumption]);
        assert!(matches!(
            report.outcomes[0].abort,
            Some(AbortCause::Failed { stage: Stage::Health, .. })
        ));
        assert!(source.fetched.is_empty());

        let degraded = FakeSink {
            health_status: 503,
            ..FakeSink::default()
        };
        let report = run(&mut source_with_all(), &degraded, options(), &[DatasetType::Consumption]);
        assert!(report.outcomes[0].is_done());
    }

    #[test]
    fn failed_batch_marks_each_of_its_samples() {
        let mut source = source_with_all();
        let sink = FakeSink {
            reject_batches: true,
            ..FakeSink::default()
        };
        let mut opts = options();
        opts.batch_size = 2;
        let report = run(&mut source, &sink, opts, &[DatasetType::Consumption]);

        assert_eq!(*sink.batches.borrow(), vec![2, 2, 1]);
        let result = report.outcomes[0].result.as_ref().unwrap();
        assert_eq!(result.succeeded, 3);
        let failed: Vec<_> = result.failed.iter().map(|f| f.sample.record_index).collect();
        assert_eq!(failed, vec![2, 3]);
        assert!(result.failed[0].reason.starts_with("batch 2:"));
    }

    #[test]
    fn interrupt_stops_current_and_remaining_types() {
        let mut source = source_with_all();
        let sink = FakeSink::default();
        let flag = Arc::new(AtomicBool::new(false));
        let setter = Arc::clone(&flag);
        let report = Orchestrator::new(
            &mut source,
            &sink,
            move |cp, _| {
                if cp == Checkpoint::PreSubmit {
                    setter.store(true, Ordering::SeqCst);
                }
                true
            },
            options(),
        )
        .with_interrupt(flag)
        .run(&DatasetType::ALL);

        assert_eq!(report.outcomes[0].abort, Some(AbortCause::Interrupted));
        assert_eq!(report.outcomes[0].reached, RunState::FieldsMapped);
        assert_eq!(report.outcomes[1].abort, Some(AbortCause::Interrupted));
        assert_eq!(report.outcomes[1].reached, RunState::Idle);
        assert_eq!(source.fetched, vec![SourceCategory::Consumption]);
        assert_eq!(report.exit_code(), EXIT_INTERRUPTED);
    }

    #[test]
    fn interrupt_during_a_prompt_is_not_a_decline() {
        let mut source = source_with_all();
        let sink = FakeSink::default();
        let flag = Arc::new(AtomicBool::new(false));
        let setter = Arc::clone(&flag);
        let report = Orchestrator::new(
            &mut source,
            &sink,
            move |_, _| {
                setter.store(true, Ordering::SeqCst);
                false
            },
            options(),
        )
        .with_interrupt(flag)
        .run(&[DatasetType::Consumption]);

        assert_eq!(report.outcomes[0].abort, Some(AbortCause::Interrupted));
        assert!(source.fetched.is_empty());
        assert_eq!(report.exit_code(), EXIT_INTERRUPTED);
    }

    #[test]
    fn empty_fetch_still_creates_a_placeholder_dataset() {
        let mut source = FakeSource::default();
        let sink = FakeSink::default();
        let report = run(&mut source, &sink, options(), &[DatasetType::Consumption]);

        let outcome = &report.outcomes[0];
        assert!(outcome.is_done());
        assert_eq!(outcome.samples, 0);
        assert_eq!(outcome.result.as_ref().unwrap().attempted, 0);
        assert_eq!(*sink.created.borrow(), vec!["FAEN Consumption January-March 2022".to_string()]);
    }
}

//! Formatted terminal output.

use crate::app::pipeline::{AbortCause, RunReport, RunState, TypeOutcome};
use crate::data::HealthReport;
use crate::domain::{DatasetDescription, SampleFailure};

/// Failures listed per dataset type before the rest are summarized.
const MAX_FAILURES_SHOWN: usize = 20;
/// Entities listed in a preview before the rest are summarized.
const MAX_ENTITIES_SHOWN: usize = 5;

/// Format the end-of-run summary (one block per dataset type).
pub fn format_run_report(report: &RunReport) -> String {
    let mut out = String::new();
    out.push_str("=== faen-cde - run summary ===\n");
    for outcome in &report.outcomes {
        out.push('\n');
        out.push_str(&format_outcome(outcome));
    }
    out.push_str(&format!("\nExit code: {}\n", report.exit_code()));
    out
}

fn format_outcome(o: &TypeOutcome) -> String {
    let mut out = String::new();
    let status = match &o.abort {
        None => "done".to_string(),
        Some(AbortCause::Failed { stage, error }) => format!("aborted during {}: {error}", stage.label()),
        Some(AbortCause::Declined(cp)) => format!("declined at {cp:?}"),
        Some(AbortCause::Interrupted) => "interrupted".to_string(),
    };
    out.push_str(&format!("[{}] {status}\n", o.dataset_type));
    out.push_str(&format!("  reached:  {:?}\n", o.reached));

    if let Some(name) = &o.dataset_name {
        out.push_str(&format!("  dataset:  {name}"));
        if let Some(id) = &o.dataset_id {
            out.push_str(&format!(" (id {id})"));
        }
        out.push('\n');
    }
    if o.records_fetched > 0 || o.reached > RunState::Authenticated {
        out.push_str(&format!(
            "  records:  fetched={} skipped={} samples={}\n",
            o.records_fetched, o.records_skipped, o.samples
        ));
    }
    if let Some(result) = &o.result {
        out.push_str(&format!(
            "  upload:   attempted={} succeeded={} failed={}\n",
            result.attempted,
            result.succeeded,
            result.failed.len()
        ));
        out.push_str(&format_failures(&result.failed));
    }
    out
}

fn format_failures(failed: &[SampleFailure]) -> String {
    let mut out = String::new();
    for f in failed.iter().take(MAX_FAILURES_SHOWN) {
        let s = &f.sample;
        out.push_str(&format!(
            "    - record {} {} {} @ {}: {}\n",
            s.record_index,
            s.entity_id,
            s.field,
            s.timestamp_utc(),
            f.reason
        ));
    }
    if failed.len() > MAX_FAILURES_SHOWN {
        out.push_str(&format!("    ... and {} more\n", failed.len() - MAX_FAILURES_SHOWN));
    }
    out
}

/// Format a CDE health report.
pub fn format_health(report: &HealthReport) -> String {
    let mut out = String::new();
    let verdict = if report.is_healthy() {
        "healthy"
    } else if report.is_degraded() {
        "degraded (some services unhealthy)"
    } else {
        "unhealthy"
    };
    out.push_str(&format!("CDE API: {verdict} (HTTP {})\n", report.status_code));
    out.push_str(&format!("  status:  {}\n", report.status.as_deref().unwrap_or("unknown")));
    out.push_str(&format!("  version: {}\n", report.version.as_deref().unwrap_or("unknown")));
    for (service, status) in &report.services {
        out.push_str(&format!("  - {service:<16} {status}\n"));
    }
    out
}

/// Short description of a dataset document, printed before it by `preview`.
pub fn format_description_summary(d: &DatasetDescription, records: usize, skipped: usize) -> String {
    let mut out = String::new();
    out.push_str(&format!("=== {} ===\n", d.name));
    out.push_str(&format!("{}\n", d.description));
    out.push_str(&format!(
        "Records: {records} ({skipped} skipped) | entities: {} | timeseries: {}\n",
        d.timeseries.len(),
        d.timeseries_count()
    ));
    out.push_str("Fields:\n");
    for f in &d.fields {
        out.push_str(&format!("  {} {:<20} [{}]\n", f.ordinal, f.field.as_str(), f.spec.unit));
    }

    let shown: Vec<&str> = d
        .timeseries
        .iter()
        .take(MAX_ENTITIES_SHOWN)
        .map(|t| t.entity_id.as_str())
        .collect();
    out.push_str(&format!("Entities: {}", shown.join(", ")));
    if d.timeseries.len() > MAX_ENTITIES_SHOWN {
        out.push_str(&format!(" ... and {} more", d.timeseries.len() - MAX_ENTITIES_SHOWN));
    }
    out.push('\n');
    out
}

//! Output formatters for command results.

use clap::ValueEnum;
use comfy_table::{Cell, Table};
use serde_json::json;

use varcat_core::migration::{MigrationRun, RunReport, RunStatus, StatusReport};
use varcat_core::BatchReport;

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Trait for formatting output.
pub trait Formatter: Send + Sync {
    /// Format the result of `migrate run`.
    fn format_run_report(&self, report: &RunReport) -> String;

    /// Format the run log and summary of `migrate status`.
    fn format_status(&self, status: &StatusReport) -> String;

    /// Format the result of `sync-storage`.
    fn format_batch(&self, report: &BatchReport) -> String;

    /// Format the result of `catalog import`.
    fn format_import(&self, studies: usize, entities: usize) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_run_report(&self, report: &RunReport) -> String {
        let mut output = format!("{}\n", runs_table(&report.runs));
        output.push_str(&format!(
            "{}: {} completed, {} skipped, {} failed, {} pending",
            report.domain,
            report.count(RunStatus::Completed),
            report.count(RunStatus::SkippedDeprecated) + report.count(RunStatus::SkippedOutdated),
            report.count(RunStatus::Failed),
            report.count(RunStatus::Pending),
        ));
        if let Some(reason) = &report.deferred {
            output.push_str(&format!("\ndeferred: {}", reason));
        }
        if let Some(failure) = &report.failure {
            output.push_str(&format!("\nhalted: {}", failure));
        }
        output
    }

    fn format_status(&self, status: &StatusReport) -> String {
        let mut output = format!("{}\n", runs_table(&status.runs));

        let mut counts = Table::new();
        counts.set_header(vec!["Status", "Count"]);
        for (run_status, count) in &status.summary.counts {
            counts.add_row(vec![run_status.to_string(), count.to_string()]);
        }
        output.push_str(&counts.to_string());

        output.push_str(&format!(
            "\n{} migration(s) to apply",
            status.summary.to_apply.len()
        ));
        if !status.summary.to_apply.is_empty() {
            output.push_str(&format!(": {}", status.summary.to_apply.join(", ")));
        }
        for drift in &status.summary.drifted {
            output.push_str(&format!(
                "\npatch drift: {} applied at patch {}, manifest has patch {}",
                drift.id, drift.applied_patch, drift.current_patch
            ));
        }
        output
    }

    fn format_batch(&self, report: &BatchReport) -> String {
        let mut table = Table::new();
        table.set_header(vec!["Study", "Status", "Writes", "Unresolved", "Error"]);
        for outcome in &report.outcomes {
            table.add_row(vec![
                Cell::new(&outcome.study),
                Cell::new(outcome.status),
                Cell::new(outcome.writes),
                Cell::new(outcome.unresolved.join(", ")),
                Cell::new(outcome.error.as_deref().unwrap_or("")),
            ]);
        }

        let mut output = format!(
            "{}\n{} stud(ies), {} write(s)",
            table,
            report.outcomes.len(),
            report.writes()
        );
        if !report.not_attempted.is_empty() {
            output.push_str(&format!(
                "\nnot attempted (cancelled): {}",
                report.not_attempted.join(", ")
            ));
        }
        output
    }

    fn format_import(&self, studies: usize, entities: usize) -> String {
        format!("imported {} stud(ies), {} entit(ies)", studies, entities)
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format_run_report(&self, report: &RunReport) -> String {
        let value = json!({
            "domain": report.domain,
            "runs": report.runs,
            "outdated": report.outdated,
            "deferred": report.deferred,
            "failure": report.failure.as_ref().map(|e| e.to_string()),
        });
        serde_json::to_string_pretty(&value).unwrap_or_else(|_| "{}".to_string())
    }

    fn format_status(&self, status: &StatusReport) -> String {
        serde_json::to_string_pretty(status).unwrap_or_else(|_| "{}".to_string())
    }

    fn format_batch(&self, report: &BatchReport) -> String {
        serde_json::to_string_pretty(report).unwrap_or_else(|_| "{}".to_string())
    }

    fn format_import(&self, studies: usize, entities: usize) -> String {
        json!({
            "studies": studies,
            "entities": entities
        })
        .to_string()
    }
}

/// Format migration runs as a table.
fn runs_table(runs: &[MigrationRun]) -> Table {
    let mut table = Table::new();
    table.set_header(vec![
        "Id", "Domain", "Version", "Status", "Patch", "Attempts", "Started", "Finished", "Error",
    ]);
    for run in runs {
        table.add_row(vec![
            Cell::new(&run.descriptor_id),
            Cell::new(run.domain),
            Cell::new(&run.target_version),
            Cell::new(run.status),
            Cell::new(run.patch),
            Cell::new(run.attempts),
            Cell::new(format_timestamp(run.started_at)),
            Cell::new(format_timestamp(run.finished_at)),
            Cell::new(run.error.as_deref().unwrap_or("")),
        ]);
    }
    table
}

/// Format microseconds since the Unix epoch as RFC 3339.
fn format_timestamp(micros: Option<u64>) -> String {
    micros
        .and_then(|m| i64::try_from(m).ok())
        .and_then(chrono::DateTime::from_timestamp_micros)
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
        .unwrap_or_default()
}

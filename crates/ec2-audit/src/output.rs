//! Report rendering
//!
//! Renders reports as one line per instance (`plain`), a summary table
//! (`table`) or a JSON document (`json`). Only rendering happens here; the
//! caller decides where the text goes.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use comfy_table::{Cell, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use ec2_audit_core::{AuditRun, Report, RunStatus, Summary};
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::Path;
use tracing::info;

/// Output format for the report sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// One line per instance followed by a summary line
    #[default]
    Plain,
    /// Table with one column per rule
    Table,
    /// Pretty-printed JSON document
    Json,
}

/// Context of a run, carried into the JSON document
#[derive(Debug, Clone, Serialize)]
pub struct RunMetadata {
    pub region: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    pub rules: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct AuditDocument<'a> {
    #[serde(flatten)]
    metadata: &'a RunMetadata,
    summary: Summary,
    status: RunStatus,
    reports: &'a [Report],
}

/// Render a run in the requested format
pub fn render(format: OutputFormat, metadata: &RunMetadata, run: &AuditRun) -> Result<String> {
    match format {
        OutputFormat::Plain => Ok(render_plain(run)),
        OutputFormat::Table => Ok(render_table(&metadata.rules, run)),
        OutputFormat::Json => render_json(metadata, run),
    }
}

/// One line per instance: the ID, then `rule=true|false` in rule order
pub fn render_plain(run: &AuditRun) -> String {
    let mut out = String::new();
    for report in run.reports() {
        out.push_str(report.instance_id());
        for verdict in report.verdicts() {
            out.push_str(&format!(" {}={}", verdict.rule(), verdict.passed()));
        }
        out.push('\n');
    }
    out.push_str(&run.summary().to_string());
    out.push('\n');
    out
}

/// Table with one row per instance and one column per rule
pub fn render_table(rules: &[String], run: &AuditRun) -> String {
    let mut header = vec![Cell::new("Instance"), Cell::new("Name")];
    header.extend(rules.iter().map(Cell::new));
    header.push(Cell::new("Compliant"));
    header.push(Cell::new("Errors"));

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);

    for report in run.reports() {
        let mut row = vec![
            Cell::new(report.instance_id()),
            Cell::new(report.instance_name().unwrap_or("-")),
        ];
        row.extend(rules.iter().map(|rule| {
            Cell::new(match report.verdict(rule) {
                Some(true) => "pass",
                Some(false) => "FAIL",
                None => "-",
            })
        }));
        row.push(Cell::new(if report.compliant() { "yes" } else { "NO" }));
        let errors: Vec<&str> = [report.volume_error(), report.image_error()]
            .into_iter()
            .flatten()
            .collect();
        row.push(Cell::new(errors.join("; ")));
        table.add_row(row);
    }

    format!("{table}\n{}\n", run.summary())
}

/// Pretty-printed JSON document with metadata, summary and reports
pub fn render_json(metadata: &RunMetadata, run: &AuditRun) -> Result<String> {
    let summary = run.summary();
    let document = AuditDocument {
        metadata,
        summary,
        status: summary.status(),
        reports: run.reports(),
    };
    serde_json::to_string_pretty(&document).context("Failed to serialize audit report")
}

/// Fail early if the report file cannot be created or opened for writing
pub fn check_writable(path: &Path) -> Result<()> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Cannot write report to {}", path.display()))?;
    Ok(())
}

/// Write the JSON document to `path`
pub fn write_json(path: &Path, metadata: &RunMetadata, run: &AuditRun) -> Result<()> {
    let json = render_json(metadata, run)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write report to {}", path.display()))?;
    info!(path = %path.display(), "Report written");
    Ok(())
}

//! Report pipeline: read a CUR stream, aggregate it, attach run metadata.

use std::io::Read;
use std::time::Instant;

use chrono::Utc;
use cur_core::error::Result;
use cur_core::models::AggregateOptions;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::aggregator::{aggregate, CostReport};
use crate::reader::CurReader;

// ── Public types ──────────────────────────────────────────────────────────────

/// Metadata produced alongside the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    /// RFC 3339 timestamp when this result was generated.
    pub generated_at: String,
    /// Header the service code was read from, or `None` if neither column
    /// was present.
    pub service_column: Option<String>,
    /// Number of services in the report.
    pub services_reported: usize,
    /// Wall-clock seconds spent reading and aggregating.
    pub elapsed_seconds: f64,
}

/// The complete output of [`analyze_report`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub report: CostReport,
    pub metadata: AnalysisMetadata,
}

impl AnalysisResult {
    /// Pretty-printed JSON of the whole result.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

// ── Public function ───────────────────────────────────────────────────────────

/// Run the full pipeline over one CUR export.
///
/// Stops at the first stream-level error. Per-row problems are counted in
/// [`CostReport::stats`] and never abort the run.
pub fn analyze_report<R: Read>(input: R, options: &AggregateOptions) -> Result<AnalysisResult> {
    let started = Instant::now();

    let mut reader = CurReader::new(input)?;
    let service_column = reader.layout().service_column.map(str::to_string);
    let report = aggregate(&mut reader, options)?;
    debug!("Reader yielded {} data rows", reader.rows_seen());

    let metadata = AnalysisMetadata {
        generated_at: Utc::now().to_rfc3339(),
        service_column,
        services_reported: report.services.len(),
        elapsed_seconds: started.elapsed().as_secs_f64(),
    };
    log_summary(&report, &metadata);

    Ok(AnalysisResult { report, metadata })
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn log_summary(report: &CostReport, metadata: &AnalysisMetadata) {
    let stats = &report.stats;
    info!(
        "Processed {} rows into {} services in {:.3}s",
        stats.rows_read, metadata.services_reported, metadata.elapsed_seconds
    );
    if stats.malformed_rows > 0 {
        warn!("{} rows had unparseable amounts and were skipped", stats.malformed_rows);
    }
    if stats.skipped_no_service > 0 {
        info!("{} rows had no service code", stats.skipped_no_service);
    }
    if stats.filtered_out > 0 {
        info!("{} rows excluded by filters", stats.filtered_out);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

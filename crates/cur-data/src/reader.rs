//! Streaming CSV reader for Cost and Usage Report exports.
//!
//! Resolves the header once, then yields one [`CurRow`] per data row without
//! buffering the rest of the input. Tokenisation failures (invalid UTF-8,
//! I/O errors from the underlying stream) are fatal and surface as
//! [`CostError::MalformedStream`].

use std::io::Read;

use cur_core::error::{CostError, Result};
use cur_core::models::{
    CurRow, COL_PRODUCT_NAME, COL_RESOURCE_ID, COL_SERVICE_CODE, COL_UNBLENDED_COST,
    COL_USAGE_AMOUNT, COL_USAGE_START_DATE,
};
use tracing::{debug, warn};

// ── HeaderLayout ──────────────────────────────────────────────────────────────

/// Column positions of the fields the engine reads.
///
/// A `None` position means the column is absent; every row then reports that
/// field as missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderLayout {
    /// Header name the service code is read from.
    pub service_column: Option<&'static str>,
    pub service: Option<usize>,
    pub resource_id: Option<usize>,
    pub usage_amount: Option<usize>,
    pub unblended_cost: Option<usize>,
    pub usage_start_date: Option<usize>,
}

impl HeaderLayout {
    /// Locate the known columns in `headers`.
    ///
    /// `product/servicecode` wins over `product/ProductName` when both exist.
    /// Names match exactly first, then ASCII case-insensitively.
    pub fn from_headers(headers: &csv::StringRecord) -> Self {
        let find = |name: &str| -> Option<usize> {
            headers
                .iter()
                .position(|h| h == name)
                .or_else(|| headers.iter().position(|h| h.eq_ignore_ascii_case(name)))
        };

        let (service_column, service) = match find(COL_SERVICE_CODE) {
            Some(idx) => (Some(COL_SERVICE_CODE), Some(idx)),
            None => match find(COL_PRODUCT_NAME) {
                Some(idx) => (Some(COL_PRODUCT_NAME), Some(idx)),
                None => (None, None),
            },
        };

        let layout = Self {
            service_column,
            service,
            resource_id: find(COL_RESOURCE_ID),
            usage_amount: find(COL_USAGE_AMOUNT),
            unblended_cost: find(COL_UNBLENDED_COST),
            usage_start_date: find(COL_USAGE_START_DATE),
        };
        layout.warn_missing();
        layout
    }

    fn warn_missing(&self) {
        if self.service.is_none() {
            warn!(
                "Neither {} nor {} present; every row will be skipped",
                COL_SERVICE_CODE, COL_PRODUCT_NAME
            );
        }
        for (name, idx) in [
            (COL_USAGE_AMOUNT, self.usage_amount),
            (COL_UNBLENDED_COST, self.unblended_cost),
        ] {
            if idx.is_none() {
                warn!("Column {} missing; rows will be reported as malformed", name);
            }
        }
        if self.resource_id.is_none() {
            debug!("Column {} missing; resources will be unclassified", COL_RESOURCE_ID);
        }
    }

    /// Project `record` onto a [`CurRow`]. Empty cells become `None`.
    pub fn row(&self, line: u64, record: &csv::StringRecord) -> CurRow {
        let field = |idx: Option<usize>| -> Option<String> {
            idx.and_then(|i| record.get(i))
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        CurRow {
            line,
            service_code: field(self.service),
            resource_id: field(self.resource_id),
            usage_amount: field(self.usage_amount),
            unblended_cost: field(self.unblended_cost),
            usage_start_date: field(self.usage_start_date),
        }
    }
}

// ── CurReader ─────────────────────────────────────────────────────────────────

/// Lazy iterator of [`CurRow`]s over any byte stream.
pub struct CurReader<R: Read> {
    records: csv::StringRecordsIntoIter<R>,
    layout: HeaderLayout,
    rows_seen: u64,
    failed: bool,
}

impl<R: Read> CurReader<R> {
    /// Read the header line of `input` and prepare to stream rows.
    ///
    /// Rows with more or fewer fields than the header are accepted; cells
    /// are trimmed of surrounding whitespace.
    pub fn new(input: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(input);

        let headers = reader.headers().map_err(stream_error)?.clone();
        debug!("CUR header has {} columns", headers.len());
        let layout = HeaderLayout::from_headers(&headers);

        Ok(Self {
            records: reader.into_records(),
            layout,
            rows_seen: 0,
            failed: false,
        })
    }

    pub fn layout(&self) -> &HeaderLayout {
        &self.layout
    }

    /// Number of data rows yielded so far.
    pub fn rows_seen(&self) -> u64 {
        self.rows_seen
    }
}

impl<R: Read> Iterator for CurReader<R> {
    type Item = Result<CurRow>;

    /// Yields `Err` at most once; the iterator is exhausted afterwards.
    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let next = self.records.next()?;
        match next {
            Ok(record) => {
                self.rows_seen += 1;
                // The header occupies line 1.
                let line = record
                    .position()
                    .map(|p| p.line())
                    .unwrap_or(self.rows_seen + 1);
                Some(Ok(self.layout.row(line, &record)))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(stream_error(e)))
            }
        }
    }
}

/// Every CSV-level failure aborts the run.
fn stream_error(err: csv::Error) -> CostError {
    CostError::MalformedStream(err.to_string())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! Per-service cost aggregation and top-K ranking.
//!
//! A single forward pass over the billing rows keeps, for every service code,
//! a running cost total and the K most expensive line items seen so far.
//! Memory is bounded by `services × K` regardless of input size.

use std::collections::BTreeMap;

use cur_core::classifier::{default_registry, ClassifierRegistry};
use cur_core::error::{CostError, Result};
use cur_core::models::{
    AggregateOptions, BillingRecord, CurRow, RankedResource, ResourceAttributes,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

// ── IngestStats ───────────────────────────────────────────────────────────────

/// Row accounting for one aggregation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStats {
    /// Rows (or records) offered to the aggregator.
    pub rows_read: u64,
    /// Rows that contributed to a service aggregate.
    pub records_aggregated: u64,
    /// Rows without a service code (account-level line items).
    pub skipped_no_service: u64,
    /// Rows whose usage amount or unblended cost did not parse.
    pub malformed_rows: u64,
    /// Valid rows excluded by the date-range or service filter.
    pub filtered_out: u64,
}

impl IngestStats {
    /// Rows that did not contribute to any aggregate.
    pub fn skipped(&self) -> u64 {
        self.skipped_no_service + self.malformed_rows + self.filtered_out
    }

    fn add(&mut self, other: &IngestStats) {
        self.rows_read += other.rows_read;
        self.records_aggregated += other.records_aggregated;
        self.skipped_no_service += other.skipped_no_service;
        self.malformed_rows += other.malformed_rows;
        self.filtered_out += other.filtered_out;
    }
}

// ── Ranking ───────────────────────────────────────────────────────────────────

/// Insert `entry` into the descending list `ranked`, keeping at most `top_k`.
///
/// An entry goes after every existing entry of equal cost, so the first one
/// seen wins a tie.
fn insert_ranked(ranked: &mut Vec<RankedResource>, entry: RankedResource, top_k: usize) {
    let pos = rank_position(ranked, entry.unblended_cost);
    if pos >= top_k {
        return;
    }
    ranked.insert(pos, entry);
    ranked.truncate(top_k);
}

fn rank_position(ranked: &[RankedResource], cost: f64) -> usize {
    ranked
        .iter()
        .position(|e| e.unblended_cost < cost)
        .unwrap_or(ranked.len())
}

// ── ServiceAggregate ──────────────────────────────────────────────────────────

/// Running state for one service code.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceAggregate {
    top_k: usize,
    cumulative_cost: f64,
    record_count: u64,
    top_resources: Vec<RankedResource>,
}

impl ServiceAggregate {
    pub fn new(top_k: usize) -> Self {
        Self {
            top_k,
            cumulative_cost: 0.0,
            record_count: 0,
            top_resources: Vec::with_capacity(top_k),
        }
    }

    /// Accumulate `record` and offer it as a top-K candidate.
    ///
    /// The identifier is only classified when the record makes the ranking.
    pub fn add_record(&mut self, record: &BillingRecord, registry: &ClassifierRegistry) {
        self.cumulative_cost += record.unblended_cost;
        self.record_count += 1;

        if rank_position(&self.top_resources, record.unblended_cost) >= self.top_k {
            return;
        }
        let attributes = record
            .resource_id
            .as_deref()
            .map_or(ResourceAttributes::Unknown, |id| registry.classify(id));
        insert_ranked(
            &mut self.top_resources,
            RankedResource {
                unblended_cost: record.unblended_cost,
                usage_amount: record.usage_amount,
                resource_id: record.resource_id.clone(),
                attributes,
            },
            self.top_k,
        );
    }

    /// Fold a later partition of the same service into `self`.
    ///
    /// Sums add; `other`'s ranked entries are re-offered in order, so merging
    /// partitions in input order preserves first-seen tie-breaking.
    pub fn merge(&mut self, other: ServiceAggregate) {
        self.cumulative_cost += other.cumulative_cost;
        self.record_count += other.record_count;
        for entry in other.top_resources {
            insert_ranked(&mut self.top_resources, entry, self.top_k);
        }
    }

    pub fn cumulative_cost(&self) -> f64 {
        self.cumulative_cost
    }

    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    pub fn top_resources(&self) -> &[RankedResource] {
        &self.top_resources
    }

    pub fn into_summary(self) -> ServiceSummary {
        ServiceSummary {
            top_resources: self.top_resources,
            cumulative_cost: self.cumulative_cost,
            record_count: self.record_count,
        }
    }
}

// ── CostReport ────────────────────────────────────────────────────────────────

/// Final ranking and total for one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSummary {
    /// Most expensive line items, cost descending.
    pub top_resources: Vec<RankedResource>,
    pub cumulative_cost: f64,
    pub record_count: u64,
}

/// Result of one aggregation run, keyed by service code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostReport {
    pub top_k: usize,
    pub services: BTreeMap<String, ServiceSummary>,
    pub stats: IngestStats,
}

impl CostReport {
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn service(&self, service_code: &str) -> Option<&ServiceSummary> {
        self.services.get(service_code)
    }

    /// Sum of every service's cumulative cost.
    pub fn total_cost(&self) -> f64 {
        self.services.values().map(|s| s.cumulative_cost).sum()
    }

    /// Combine with the report of a later input partition.
    ///
    /// Uses `self.top_k` for the merged rankings.
    pub fn merge(mut self, other: CostReport) -> CostReport {
        let top_k = self.top_k;
        for (service, theirs) in other.services {
            let ours = self.services.remove(&service);
            let mut aggregate = match ours {
                Some(summary) => ServiceAggregate::from_summary(summary, top_k),
                None => ServiceAggregate::new(top_k),
            };
            aggregate.merge(ServiceAggregate::from_summary(theirs, top_k));
            self.services.insert(service, aggregate.into_summary());
        }
        self.stats.add(&other.stats);
        self
    }
}

impl ServiceAggregate {
    fn from_summary(summary: ServiceSummary, top_k: usize) -> Self {
        let mut top_resources = summary.top_resources;
        top_resources.truncate(top_k);
        Self {
            top_k,
            cumulative_cost: summary.cumulative_cost,
            record_count: summary.record_count,
            top_resources,
        }
    }
}

// ── CostAggregator ────────────────────────────────────────────────────────────

/// Incremental, single-shot aggregator.
///
/// Feed rows with [`CostAggregator::push_row`] (or already-parsed records with
/// [`CostAggregator::push_record`]) and call [`CostAggregator::finish`] once
/// the input is exhausted.
pub struct CostAggregator<'r> {
    options: AggregateOptions,
    registry: &'r ClassifierRegistry,
    services: BTreeMap<String, ServiceAggregate>,
    stats: IngestStats,
}

impl CostAggregator<'static> {
    /// Aggregator using the built-in classifier registry.
    pub fn new(options: AggregateOptions) -> Result<Self> {
        Self::with_registry(options, default_registry())
    }
}

impl<'r> CostAggregator<'r> {
    /// Aggregator classifying identifiers with `registry`.
    pub fn with_registry(options: AggregateOptions, registry: &'r ClassifierRegistry) -> Result<Self> {
        if options.top_k == 0 {
            return Err(CostError::InvalidTopK(options.top_k));
        }
        Ok(Self {
            options,
            registry,
            services: BTreeMap::new(),
            stats: IngestStats::default(),
        })
    }

    /// Offer one raw CSV row.
    ///
    /// Rows without a service code are skipped silently; rows with an
    /// unparseable amount are logged, counted and skipped. Only errors that
    /// are not row-local are returned.
    pub fn push_row(&mut self, row: CurRow) -> Result<()> {
        self.stats.rows_read += 1;
        if row.service_code.as_deref().map_or(true, str::is_empty) {
            self.stats.skipped_no_service += 1;
            return Ok(());
        }
        match BillingRecord::try_from(row) {
            Ok(record) => self.accept(record),
            Err(e) if e.is_recoverable() => {
                warn!("Skipping row: {}", e);
                self.stats.malformed_rows += 1;
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Offer one already-parsed record.
    pub fn push_record(&mut self, record: BillingRecord) {
        self.stats.rows_read += 1;
        self.accept(record);
    }

    fn accept(&mut self, record: BillingRecord) {
        let service = match record.service_code.as_deref() {
            Some(code) if !code.is_empty() => code,
            _ => {
                self.stats.skipped_no_service += 1;
                return;
            }
        };

        if !self.options.includes_service(service) {
            self.stats.filtered_out += 1;
            return;
        }
        if !self.options.date_range.is_unbounded()
            && !self.options.date_range.contains(record.usage_start_date)
        {
            self.stats.filtered_out += 1;
            return;
        }

        let top_k = self.options.top_k;
        match self.services.get_mut(service) {
            Some(aggregate) => aggregate.add_record(&record, self.registry),
            None => {
                let mut aggregate = ServiceAggregate::new(top_k);
                aggregate.add_record(&record, self.registry);
                self.services.insert(service.to_string(), aggregate);
            }
        }
        self.stats.records_aggregated += 1;
    }

    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    /// Consume the aggregator and build the report.
    pub fn finish(self) -> CostReport {
        debug!(
            "Aggregated {} of {} rows into {} services",
            self.stats.records_aggregated,
            self.stats.rows_read,
            self.services.len()
        );
        CostReport {
            top_k: self.options.top_k,
            services: self
                .services
                .into_iter()
                .map(|(service, aggregate)| (service, aggregate.into_summary()))
                .collect(),
            stats: self.stats,
        }
    }
}

// ── Entry points ──────────────────────────────────────────────────────────────

/// Aggregate a stream of rows in one pass.
///
/// The first `Err` from `rows` aborts the run and is returned unchanged; no
/// partial report is produced.
pub fn aggregate<I>(rows: I, options: &AggregateOptions) -> Result<CostReport>
where
    I: IntoIterator<Item = Result<CurRow>>,
{
    let mut aggregator = CostAggregator::new(options.clone())?;
    for row in rows {
        aggregator.push_row(row?)?;
    }
    Ok(aggregator.finish())
}

/// Aggregate already-parsed records in one pass.
pub fn aggregate_records<I>(records: I, options: &AggregateOptions) -> Result<CostReport>
where
    I: IntoIterator<Item = BillingRecord>,
{
    let mut aggregator = CostAggregator::new(options.clone())?;
    for record in records {
        aggregator.push_record(record);
    }
    Ok(aggregator.finish())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use cur_core::time_utils::DateRange;

    fn record(service: &str, id: &str, cost: f64) -> BillingRecord {
        BillingRecord {
            service_code: Some(service.to_string()),
            resource_id: Some(id.to_string()),
            usage_amount: 1.0,
            unblended_cost: cost,
            usage_start_date: None,
        }
    }

    fn row(line: u64, service: Option<&str>, id: &str, cost: &str) -> Result<CurRow> {
        Ok(CurRow {
            line,
            service_code: service.map(str::to_string),
            resource_id: Some(id.to_string()),
            usage_amount: Some("1".to_string()),
            unblended_cost: Some(cost.to_string()),
            usage_start_date: Some("2024-03-15T00:00:00Z".to_string()),
        })
    }

    fn options(top_k: usize) -> AggregateOptions {
        AggregateOptions::new(top_k).unwrap()
    }

    fn costs(summary: &ServiceSummary) -> Vec<f64> {
        summary.top_resources.iter().map(|r| r.unblended_cost).collect()
    }

    fn ids(summary: &ServiceSummary) -> Vec<&str> {
        summary
            .top_resources
            .iter()
            .map(|r| r.resource_id.as_deref().unwrap_or(""))
            .collect()
    }

    // ── end-to-end scenario ───────────────────────────────────────────────────

    #[test]
    fn test_three_s3_records_top_two() {
        let records = vec![
            record("AmazonS3", "arn:aws:s3:::a", 10.00),
            record("AmazonS3", "arn:aws:s3:::b", 25.50),
            record("AmazonS3", "arn:aws:s3:::c", 3.20),
        ];
        let report = aggregate_records(records, &options(2)).unwrap();
        let s3 = report.service("AmazonS3").unwrap();

        assert!((s3.cumulative_cost - 38.70).abs() < 1e-9);
        assert_eq!(costs(s3), vec![25.50, 10.00]);
        assert_eq!(s3.record_count, 3);
        assert_eq!(
            s3.top_resources[0].attributes,
            ResourceAttributes::S3 {
                bucket_name: "b".to_string(),
                object_key: None
            }
        );
    }

    // ── top-K ─────────────────────────────────────────────────────────────────

    #[test]
    fn test_top_k_is_highest_costs_descending() {
        let input = [4.0, 9.0, 1.0, 7.0, 3.0, 8.0, 2.0];
        let records: Vec<_> = input
            .iter()
            .enumerate()
            .map(|(i, c)| record("AmazonEC2", &format!("r{i}"), *c))
            .collect();

        for k in 1..=9 {
            let report = aggregate_records(records.clone(), &options(k)).unwrap();
            let mut expected = input.to_vec();
            expected.sort_by(|a, b| b.partial_cmp(a).unwrap());
            expected.truncate(k);
            assert_eq!(costs(report.service("AmazonEC2").unwrap()), expected, "k = {k}");
        }
    }

    #[test]
    fn test_ties_keep_encounter_order() {
        let records = vec![
            record("AWSLambda", "first", 5.0),
            record("AWSLambda", "second", 5.0),
            record("AWSLambda", "bigger", 6.0),
            record("AWSLambda", "third", 5.0),
        ];
        let report = aggregate_records(records, &options(3)).unwrap();
        assert_eq!(
            ids(report.service("AWSLambda").unwrap()),
            vec!["bigger", "first", "second"]
        );
    }

    #[test]
    fn test_services_are_independent() {
        let records = vec![
            record("AmazonS3", "s3-a", 1.0),
            record("AWSLambda", "fn-a", 2.0),
            record("AmazonS3", "s3-b", 3.0),
        ];
        let report = aggregate_records(records, &options(5)).unwrap();
        assert_eq!(report.services.len(), 2);
        assert_eq!(ids(report.service("AmazonS3").unwrap()), vec!["s3-b", "s3-a"]);
        assert_eq!(ids(report.service("AWSLambda").unwrap()), vec!["fn-a"]);
        assert!((report.total_cost() - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_credits_reduce_cumulative_cost() {
        let records = vec![
            record("AmazonEC2", "i-1", 10.0),
            record("AmazonEC2", "credit", -4.0),
        ];
        let report = aggregate_records(records, &options(5)).unwrap();
        let ec2 = report.service("AmazonEC2").unwrap();
        assert!((ec2.cumulative_cost - 6.0).abs() < 1e-9);
        assert_eq!(costs(ec2), vec![10.0, -4.0]);
    }

    #[test]
    fn test_zero_top_k_rejected() {
        let opts = AggregateOptions {
            top_k: 0,
            ..AggregateOptions::default()
        };
        assert!(matches!(
            aggregate_records(Vec::new(), &opts),
            Err(CostError::InvalidTopK(0))
        ));
    }

    // ── row handling ──────────────────────────────────────────────────────────

    #[test]
    fn test_malformed_cost_is_skipped() {
        let rows = vec![
            row(2, Some("AmazonS3"), "arn:aws:s3:::a", "10.0"),
            row(3, Some("AmazonS3"), "arn:aws:s3:::bad", "abc"),
            row(4, Some("AmazonS3"), "arn:aws:s3:::b", "2.5"),
        ];
        let report = aggregate(rows, &options(5)).unwrap();
        let s3 = report.service("AmazonS3").unwrap();

        assert!((s3.cumulative_cost - 12.5).abs() < 1e-9);
        assert_eq!(ids(s3), vec!["arn:aws:s3:::a", "arn:aws:s3:::b"]);
        assert_eq!(report.stats.malformed_rows, 1);
        assert_eq!(report.stats.records_aggregated, 2);
        assert_eq!(report.stats.rows_read, 3);
    }

    #[test]
    fn test_push_row_counts_malformed_without_failing() {
        let mut aggregator = CostAggregator::new(options(5)).unwrap();
        let bad = CurRow {
            line: 9,
            service_code: Some("AmazonS3".to_string()),
            unblended_cost: Some("NaN".to_string()),
            usage_amount: Some("1".to_string()),
            ..CurRow::default()
        };
        assert!(aggregator.push_row(bad).is_ok());
        assert!(aggregator.push_row(row(10, Some("AmazonS3"), "a", "2.0").unwrap()).is_ok());

        assert_eq!(aggregator.stats().malformed_rows, 1);
        assert_eq!(aggregator.stats().records_aggregated, 1);
    }

    #[test]
    fn test_missing_service_is_skipped_not_malformed() {
        let rows = vec![
            row(2, None, "", "abc"),
            row(3, Some(""), "", "1.0"),
            row(4, Some("AmazonS3"), "arn:aws:s3:::a", "1.0"),
        ];
        let report = aggregate(rows, &options(5)).unwrap();
        assert_eq!(report.stats.skipped_no_service, 2);
        assert_eq!(report.stats.malformed_rows, 0);
        assert_eq!(report.services.len(), 1);
    }

    #[test]
    fn test_stream_error_aborts() {
        let rows = vec![
            row(2, Some("AmazonS3"), "a", "1.0"),
            Err(CostError::MalformedStream("invalid utf-8".to_string())),
            row(4, Some("AmazonS3"), "b", "1.0"),
        ];
        assert!(matches!(
            aggregate(rows, &options(5)),
            Err(CostError::MalformedStream(_))
        ));
    }

    #[test]
    fn test_empty_input_yields_empty_report() {
        let report = aggregate(Vec::new(), &options(5)).unwrap();
        assert!(report.is_empty());
        assert_eq!(report.stats, IngestStats::default());
        assert_eq!(report.total_cost(), 0.0);
    }

    #[test]
    fn test_aggregation_is_repeatable() {
        let make = || {
            vec![
                row(2, Some("AmazonS3"), "arn:aws:s3:::a/k", "0.1"),
                row(3, Some("AWSLambda"), "arn:aws:lambda:r:1:function:f", "0.2"),
                row(4, Some("AmazonS3"), "arn:aws:s3:::b", "0.3"),
                row(5, Some("AmazonS3"), "arn:aws:s3:::c", "x"),
            ]
        };
        let first = aggregate(make(), &options(2)).unwrap();
        let second = aggregate(make(), &options(2)).unwrap();
        assert_eq!(first, second);
        for (a, b) in first.services.values().zip(second.services.values()) {
            assert_eq!(a.cumulative_cost.to_bits(), b.cumulative_cost.to_bits());
        }
    }

    // ── filters ───────────────────────────────────────────────────────────────

    #[test]
    fn test_service_filter() {
        let records = vec![
            record("AmazonCloudWatch", "log-a", 1.0),
            record("AmazonS3", "bucket", 9.0),
        ];
        let opts = options(5).with_services(["AmazonCloudWatch"]);
        let report = aggregate_records(records, &opts).unwrap();
        assert_eq!(report.services.keys().collect::<Vec<_>>(), vec!["AmazonCloudWatch"]);
        assert_eq!(report.stats.filtered_out, 1);
    }

    #[test]
    fn test_date_range_filter() {
        let at = |d: u32| Some(Utc.with_ymd_and_hms(2024, 3, d, 0, 0, 0).unwrap());
        let mut records = vec![
            record("AmazonS3", "before", 1.0),
            record("AmazonS3", "start", 2.0),
            record("AmazonS3", "end", 4.0),
            record("AmazonS3", "undated", 8.0),
        ];
        records[0].usage_start_date = at(1);
        records[1].usage_start_date = at(2);
        records[2].usage_start_date = at(10);

        let range = DateRange::new(at(2), at(10)).unwrap();
        let report = aggregate_records(records, &options(5).with_date_range(range)).unwrap();
        let s3 = report.service("AmazonS3").unwrap();

        assert_eq!(ids(s3), vec!["start"]);
        assert_eq!(report.stats.filtered_out, 3);
    }

    // ── classification ────────────────────────────────────────────────────────

    #[test]
    fn test_custom_registry_is_used() {
        let registry = ClassifierRegistry::empty();
        let mut aggregator = CostAggregator::with_registry(options(5), &registry).unwrap();
        aggregator.push_record(record(
            "AWSLambda",
            "arn:aws:lambda:us-east-1:1:function:f",
            1.0,
        ));
        let report = aggregator.finish();
        assert!(report.service("AWSLambda").unwrap().top_resources[0]
            .attributes
            .is_unknown());
    }

    #[test]
    fn test_missing_resource_id_is_unknown() {
        let mut r = record("AWSSupportBusiness", "", 100.0);
        r.resource_id = None;
        let report = aggregate_records(vec![r], &options(5)).unwrap();
        let entry = &report.service("AWSSupportBusiness").unwrap().top_resources[0];
        assert!(entry.resource_id.is_none());
        assert!(entry.attributes.is_unknown());
    }

    // ── merge ─────────────────────────────────────────────────────────────────

    #[test]
    fn test_merge_matches_single_pass() {
        let all: Vec<BillingRecord> = [
            ("AmazonS3", "a", 3.0),
            ("AmazonS3", "b", 7.0),
            ("AWSLambda", "f", 1.0),
            ("AmazonS3", "c", 7.0),
            ("AmazonS3", "d", 5.0),
            ("AWSLambda", "g", 4.0),
            ("AmazonS3", "e", 7.0),
        ]
        .iter()
        .map(|(s, id, c)| record(s, id, *c))
        .collect();

        let single = aggregate_records(all.clone(), &options(3)).unwrap();
        let left = aggregate_records(all[..3].to_vec(), &options(3)).unwrap();
        let right = aggregate_records(all[3..].to_vec(), &options(3)).unwrap();
        let merged = left.merge(right);

        for (service, summary) in &single.services {
            let other = merged.service(service).unwrap();
            assert_eq!(ids(summary), ids(other), "{service}");
            assert!((summary.cumulative_cost - other.cumulative_cost).abs() < 1e-9);
            assert_eq!(summary.record_count, other.record_count);
        }
        assert_eq!(merged.services.len(), single.services.len());
        assert_eq!(merged.stats, single.stats);
        assert_eq!(ids(merged.service("AmazonS3").unwrap()), vec!["b", "c", "e"]);
    }

    #[test]
    fn test_service_aggregate_merge_adds_totals() {
        let registry = ClassifierRegistry::default();
        let mut left = ServiceAggregate::new(2);
        left.add_record(&record("AmazonS3", "a", 1.0), &registry);
        let mut right = ServiceAggregate::new(2);
        right.add_record(&record("AmazonS3", "b", 2.0), &registry);
        right.add_record(&record("AmazonS3", "c", 0.5), &registry);

        left.merge(right);
        assert_eq!(left.record_count(), 3);
        assert!((left.cumulative_cost() - 3.5).abs() < 1e-9);
        let top: Vec<f64> = left.top_resources().iter().map(|r| r.unblended_cost).collect();
        assert_eq!(top, vec![2.0, 1.0]);
    }
}

use std::fmt;

use cur_core::error::Result;
use cur_core::formatting::{format_cost, format_currency};
use cur_data::aggregator::{CostReport, ServiceSummary};
use cur_data::analysis::AnalysisResult;

/// Plain-text rendering of a [`CostReport`], one block per service.
pub struct TextReport<'a>(pub &'a CostReport);

impl fmt::Display for TextReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.0;
        if report.is_empty() {
            return writeln!(f, "No billable records found.");
        }
        for (service, summary) in &report.services {
            write_service(f, report.top_k, service, summary)?;
            writeln!(f)?;
        }
        writeln!(f, "Total Cost: {}", format_currency(report.total_cost()))
    }
}

fn write_service(
    f: &mut fmt::Formatter<'_>,
    top_k: usize,
    service: &str,
    summary: &ServiceSummary,
) -> fmt::Result {
    writeln!(f, "Top {} Expensive Resources for {}:", top_k, service)?;
    for (rank, entry) in summary.top_resources.iter().enumerate() {
        writeln!(
            f,
            "{}. ARN: {}, Usage Amount: {}, Unblended Cost: {}",
            rank + 1,
            entry.resource_id.as_deref().unwrap_or("N/A"),
            entry.usage_amount,
            format_cost(entry.unblended_cost)
        )?;
        if !entry.attributes.is_unknown() {
            writeln!(f, "   {}", entry.attributes)?;
        }
    }
    writeln!(
        f,
        "Cumulative Cost for {}: {}",
        service,
        format_cost(summary.cumulative_cost)
    )
}

pub fn render_text(report: &CostReport) -> String {
    TextReport(report).to_string()
}

pub fn render_json(result: &AnalysisResult) -> Result<String> {
    result.to_json()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cur_core::models::{AggregateOptions, BillingRecord};
    use cur_data::aggregator::aggregate_records;

    fn record(service: &str, id: Option<&str>, usage: f64, cost: f64) -> BillingRecord {
        BillingRecord {
            service_code: Some(service.to_string()),
            resource_id: id.map(str::to_string),
            usage_amount: usage,
            unblended_cost: cost,
            usage_start_date: None,
        }
    }

    fn report(records: Vec<BillingRecord>, top_k: usize) -> CostReport {
        aggregate_records(records, &AggregateOptions::new(top_k).unwrap()).unwrap()
    }

    #[test]
    fn test_render_text_service_block() {
        let report = report(
            vec![
                record("AmazonS3", Some("arn:aws:s3:::a"), 1.0, 10.0),
                record("AmazonS3", Some("arn:aws:s3:::b/k.txt"), 2.5, 25.5),
                record("AmazonS3", Some("arn:aws:s3:::c"), 1.0, 3.2),
            ],
            2,
        );
        let expected = "\
Top 2 Expensive Resources for AmazonS3:
1. ARN: arn:aws:s3:::b/k.txt, Usage Amount: 2.5, Unblended Cost: 25.50
   Bucket Name: b, Object Key: k.txt
2. ARN: arn:aws:s3:::a, Usage Amount: 1, Unblended Cost: 10.00
   Bucket Name: a
Cumulative Cost for AmazonS3: 38.70

Total Cost: $38.70
";
        assert_eq!(render_text(&report), expected);
    }

    #[test]
    fn test_render_text_unknown_has_no_attribute_line() {
        let report = report(vec![record("AWSSupportBusiness", None, 1.0, 100.0)], 5);
        let text = render_text(&report);
        assert!(text.contains("1. ARN: N/A, Usage Amount: 1, Unblended Cost: 100.00\n"));
        assert!(text.contains("Unblended Cost: 100.00\nCumulative Cost for AWSSupportBusiness: 100.00\n"));
    }

    #[test]
    fn test_render_text_services_sorted() {
        let report = report(
            vec![
                record("AmazonS3", Some("arn:aws:s3:::a"), 1.0, 1.0),
                record("AWSLambda", Some("arn:aws:lambda:us-east-1:1:function:f"), 1.0, 1.0),
            ],
            5,
        );
        let text = render_text(&report);
        let lambda = text.find("for AWSLambda").unwrap();
        let s3 = text.find("for AmazonS3").unwrap();
        assert!(lambda < s3);
        assert!(text.contains("   Function Name: f\n"));
    }

    #[test]
    fn test_render_text_empty_report() {
        let report = report(Vec::new(), 5);
        assert_eq!(render_text(&report), "No billable records found.\n");
    }
}

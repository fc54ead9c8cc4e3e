use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::{CostError, Result};
use crate::time_utils::{parse_usage_timestamp, DateRange};

/// Number of ranked resources kept per service unless configured otherwise.
pub const DEFAULT_TOP_K: usize = 5;

// ── Column names ──────────────────────────────────────────────────────────────

/// Service code column of the standard CUR layout.
pub const COL_SERVICE_CODE: &str = "product/servicecode";
/// Service column used by the alternate (product-name) report variant.
pub const COL_PRODUCT_NAME: &str = "product/ProductName";
pub const COL_RESOURCE_ID: &str = "lineItem/ResourceId";
pub const COL_USAGE_AMOUNT: &str = "lineItem/UsageAmount";
pub const COL_UNBLENDED_COST: &str = "lineItem/UnblendedCost";
pub const COL_USAGE_START_DATE: &str = "lineItem/UsageStartDate";

// ── CurRow ────────────────────────────────────────────────────────────────────

/// The raw string view of one CSV data row.
///
/// Every field is `None` when the column is missing from the header, the row
/// is short, or the cell is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CurRow {
    /// Line number in the input; the header is line 1.
    pub line: u64,
    pub service_code: Option<String>,
    pub resource_id: Option<String>,
    pub usage_amount: Option<String>,
    pub unblended_cost: Option<String>,
    pub usage_start_date: Option<String>,
}

// ── BillingRecord ─────────────────────────────────────────────────────────────

/// One billing line item with its numeric fields parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingRecord {
    /// Grouping key. `None` for account-level rows without a service.
    pub service_code: Option<String>,
    /// Raw resource identifier (usually an ARN).
    #[serde(default)]
    pub resource_id: Option<String>,
    pub usage_amount: f64,
    /// Negative for credits and refunds.
    pub unblended_cost: f64,
    #[serde(default)]
    pub usage_start_date: Option<DateTime<Utc>>,
}

impl TryFrom<CurRow> for BillingRecord {
    type Error = CostError;

    /// Parse the numeric and timestamp fields of `row`.
    ///
    /// Fails with [`CostError::MalformedRecord`] when either amount is
    /// missing, non-numeric or non-finite. An unparseable start date is not
    /// an error; it simply leaves `usage_start_date` empty.
    fn try_from(row: CurRow) -> Result<Self> {
        let usage_amount = parse_amount(row.line, COL_USAGE_AMOUNT, row.usage_amount)?;
        let unblended_cost = parse_amount(row.line, COL_UNBLENDED_COST, row.unblended_cost)?;
        let usage_start_date = row
            .usage_start_date
            .as_deref()
            .and_then(parse_usage_timestamp);

        Ok(BillingRecord {
            service_code: row.service_code,
            resource_id: row.resource_id,
            usage_amount,
            unblended_cost,
            usage_start_date,
        })
    }
}

fn parse_amount(line: u64, field: &'static str, value: Option<String>) -> Result<f64> {
    let parsed = value
        .as_deref()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite());

    parsed.ok_or(CostError::MalformedRecord { line, field, value })
}

// ── ResourceAttributes ────────────────────────────────────────────────────────

/// Service-specific attributes extracted from a resource identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ResourceAttributes {
    Lambda {
        function_name: String,
    },
    S3 {
        bucket_name: String,
        object_key: Option<String>,
    },
    Sns {
        topic_name: String,
    },
    Sqs {
        queue_name: String,
    },
    Ec2 {
        resource_type: String,
        resource_id: String,
    },
    Wafv2 {
        resource_type: String,
        resource_id: String,
    },
    Dynamodb {
        table_name: Option<String>,
    },
    /// CloudWatch Logs log group; `function_name` is set for `/aws/lambda/` groups.
    Logs {
        log_group: String,
        function_name: Option<String>,
    },
    Unknown,
}

impl ResourceAttributes {
    /// Service token this variant was classified under.
    pub fn kind(&self) -> &'static str {
        match self {
            ResourceAttributes::Lambda { .. } => "lambda",
            ResourceAttributes::S3 { .. } => "s3",
            ResourceAttributes::Sns { .. } => "sns",
            ResourceAttributes::Sqs { .. } => "sqs",
            ResourceAttributes::Ec2 { .. } => "ec2",
            ResourceAttributes::Wafv2 { .. } => "wafv2",
            ResourceAttributes::Dynamodb { .. } => "dynamodb",
            ResourceAttributes::Logs { .. } => "logs",
            ResourceAttributes::Unknown => "unknown",
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, ResourceAttributes::Unknown)
    }
}

impl fmt::Display for ResourceAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceAttributes::Lambda { function_name } => {
                write!(f, "Function Name: {}", function_name)
            }
            ResourceAttributes::S3 {
                bucket_name,
                object_key: Some(key),
            } => write!(f, "Bucket Name: {}, Object Key: {}", bucket_name, key),
            ResourceAttributes::S3 { bucket_name, .. } => {
                write!(f, "Bucket Name: {}", bucket_name)
            }
            ResourceAttributes::Sns { topic_name } => write!(f, "Topic Name: {}", topic_name),
            ResourceAttributes::Sqs { queue_name } => write!(f, "Queue Name: {}", queue_name),
            ResourceAttributes::Ec2 {
                resource_type,
                resource_id,
            }
            | ResourceAttributes::Wafv2 {
                resource_type,
                resource_id,
            } => write!(
                f,
                "Resource Type: {}, Resource Id: {}",
                resource_type, resource_id
            ),
            ResourceAttributes::Dynamodb { table_name } => write!(
                f,
                "Table Name: {}",
                table_name.as_deref().unwrap_or("unknown")
            ),
            ResourceAttributes::Logs {
                log_group,
                function_name: Some(function),
            } => write!(f, "Log Group: {}, Function Name: {}", log_group, function),
            ResourceAttributes::Logs { log_group, .. } => write!(f, "Log Group: {}", log_group),
            ResourceAttributes::Unknown => write!(f, "unknown"),
        }
    }
}

// ── RankedResource ────────────────────────────────────────────────────────────

/// One entry of a per-service top-K list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResource {
    pub unblended_cost: f64,
    pub usage_amount: f64,
    pub resource_id: Option<String>,
    pub attributes: ResourceAttributes,
}

// ── AggregateOptions ──────────────────────────────────────────────────────────

/// Caller-supplied knobs for a single aggregation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateOptions {
    /// Maximum ranked resources per service, at least 1.
    pub top_k: usize,
    /// Only records whose usage start date falls inside are aggregated.
    #[serde(default)]
    pub date_range: DateRange,
    /// When non-empty, only these service codes are aggregated.
    #[serde(default)]
    pub services: BTreeSet<String>,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            date_range: DateRange::default(),
            services: BTreeSet::new(),
        }
    }
}

impl AggregateOptions {
    pub fn new(top_k: usize) -> Result<Self> {
        if top_k == 0 {
            return Err(CostError::InvalidTopK(top_k));
        }
        Ok(Self {
            top_k,
            ..Self::default()
        })
    }

    pub fn with_date_range(mut self, date_range: DateRange) -> Self {
        self.date_range = date_range;
        self
    }

    pub fn with_services<I, S>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.services = services.into_iter().map(Into::into).collect();
        self
    }

    /// `true` when `service_code` passes the service filter.
    pub fn includes_service(&self, service_code: &str) -> bool {
        self.services.is_empty() || self.services.contains(service_code)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! Resource-identifier classification.
//!
//! Splits an ARN-like identifier into its colon-delimited segments and hands
//! it to the parser registered for its service token. Classification never
//! fails: anything that cannot be interpreted becomes
//! [`ResourceAttributes::Unknown`].

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use tracing::trace;

use crate::models::ResourceAttributes;

/// Minimum number of colon-delimited segments in a usable identifier.
pub const MIN_SEGMENTS: usize = 6;

const LAMBDA_LOG_GROUP_PREFIX: &str = "/aws/lambda/";

// ── Arn ───────────────────────────────────────────────────────────────────────

/// A borrowed, pre-split view of a resource identifier.
///
/// Layout: `prefix:partition:service:region:account:resource[:...]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arn<'a> {
    raw: &'a str,
    segments: Vec<&'a str>,
    resource: &'a str,
}

impl<'a> Arn<'a> {
    /// Split `raw`, returning `None` when it is empty or has fewer than
    /// [`MIN_SEGMENTS`] segments.
    pub fn parse(raw: &'a str) -> Option<Self> {
        if raw.is_empty() {
            return None;
        }
        let segments: Vec<&str> = raw.split(':').collect();
        if segments.len() < MIN_SEGMENTS {
            return None;
        }
        let resource = raw.splitn(MIN_SEGMENTS, ':').nth(MIN_SEGMENTS - 1)?;
        Some(Self {
            raw,
            segments,
            resource,
        })
    }

    pub fn raw(&self) -> &'a str {
        self.raw
    }

    /// Dispatch token, e.g. `lambda` or `s3`.
    pub fn service(&self) -> &'a str {
        self.segments[2]
    }

    /// Segment 5 alone, cut at the next colon.
    pub fn resource_segment(&self) -> &'a str {
        self.segments[MIN_SEGMENTS - 1]
    }

    /// Everything after the fifth colon, qualifiers included.
    pub fn resource(&self) -> &'a str {
        self.resource
    }

    pub fn segments(&self) -> &[&'a str] {
        &self.segments
    }

    pub fn last_segment(&self) -> &'a str {
        self.segments[self.segments.len() - 1]
    }
}

// ── Built-in parsers ──────────────────────────────────────────────────────────

/// Signature of a per-service parser.
pub type ResourceParser = fn(&Arn<'_>) -> ResourceAttributes;

fn after_last_slash(s: &str) -> &str {
    s.rsplit_once('/').map_or(s, |(_, tail)| tail)
}

fn before_first_slash(s: &str) -> &str {
    s.split_once('/').map_or(s, |(head, _)| head)
}

/// `function:name` or `function:name:qualifier`.
fn parse_lambda(arn: &Arn<'_>) -> ResourceAttributes {
    let segments = arn.segments();
    let function_name = if segments.len() > MIN_SEGMENTS + 1 {
        segments[segments.len() - 2]
    } else {
        after_last_slash(arn.last_segment())
    };
    ResourceAttributes::Lambda {
        function_name: function_name.to_string(),
    }
}

fn parse_s3(arn: &Arn<'_>) -> ResourceAttributes {
    match arn.resource_segment().split_once('/') {
        None => ResourceAttributes::S3 {
            bucket_name: arn.last_segment().to_string(),
            object_key: None,
        },
        Some((bucket, key)) => ResourceAttributes::S3 {
            bucket_name: bucket.to_string(),
            object_key: (!key.is_empty()).then(|| key.to_string()),
        },
    }
}

fn parse_sns(arn: &Arn<'_>) -> ResourceAttributes {
    ResourceAttributes::Sns {
        topic_name: arn.last_segment().to_string(),
    }
}

fn parse_sqs(arn: &Arn<'_>) -> ResourceAttributes {
    ResourceAttributes::Sqs {
        queue_name: arn.last_segment().to_string(),
    }
}

fn type_and_id(arn: &Arn<'_>) -> (String, String) {
    let resource = arn.resource_segment();
    (
        before_first_slash(resource).to_string(),
        after_last_slash(resource).to_string(),
    )
}

fn parse_ec2(arn: &Arn<'_>) -> ResourceAttributes {
    let (resource_type, resource_id) = type_and_id(arn);
    ResourceAttributes::Ec2 {
        resource_type,
        resource_id,
    }
}

fn parse_wafv2(arn: &Arn<'_>) -> ResourceAttributes {
    let (resource_type, resource_id) = type_and_id(arn);
    ResourceAttributes::Wafv2 {
        resource_type,
        resource_id,
    }
}

/// `table/Name[/stream/...]`; no second component leaves the name empty.
fn parse_dynamodb(arn: &Arn<'_>) -> ResourceAttributes {
    let table_name = arn
        .resource()
        .split('/')
        .nth(1)
        .filter(|name| !name.is_empty())
        .map(str::to_string);
    ResourceAttributes::Dynamodb { table_name }
}

/// `log-group:NAME[:*]`, falling back to the final segment.
fn parse_logs(arn: &Arn<'_>) -> ResourceAttributes {
    let log_group = match arn.resource().strip_prefix("log-group:") {
        Some(rest) => rest.strip_suffix(":*").unwrap_or(rest),
        None => arn.last_segment(),
    };
    let function_name = log_group
        .strip_prefix(LAMBDA_LOG_GROUP_PREFIX)
        .filter(|name| !name.is_empty())
        .map(str::to_string);
    ResourceAttributes::Logs {
        log_group: log_group.to_string(),
        function_name,
    }
}

// ── ClassifierRegistry ────────────────────────────────────────────────────────

/// Maps a service token to the parser that understands its identifiers.
#[derive(Clone)]
pub struct ClassifierRegistry {
    parsers: HashMap<String, ResourceParser>,
}

impl fmt::Debug for ClassifierRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassifierRegistry")
            .field("services", &self.services())
            .finish()
    }
}

impl Default for ClassifierRegistry {
    /// Registry with every built-in service parser.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("lambda", parse_lambda);
        registry.register("s3", parse_s3);
        registry.register("sns", parse_sns);
        registry.register("sqs", parse_sqs);
        registry.register("ec2", parse_ec2);
        registry.register("wafv2", parse_wafv2);
        registry.register("dynamodb", parse_dynamodb);
        registry.register("logs", parse_logs);
        registry
    }
}

impl ClassifierRegistry {
    /// A registry that classifies everything as unknown.
    pub fn empty() -> Self {
        Self {
            parsers: HashMap::new(),
        }
    }

    /// Register `parser` for `service`, returning the parser it replaced.
    pub fn register(
        &mut self,
        service: impl Into<String>,
        parser: ResourceParser,
    ) -> Option<ResourceParser> {
        self.parsers.insert(service.into(), parser)
    }

    pub fn is_registered(&self, service: &str) -> bool {
        self.parsers.contains_key(service)
    }

    /// Registered service tokens, sorted.
    pub fn services(&self) -> Vec<&str> {
        let mut services: Vec<&str> = self.parsers.keys().map(String::as_str).collect();
        services.sort_unstable();
        services
    }

    /// Classify `identifier` with the parser registered for its service token.
    pub fn classify(&self, identifier: &str) -> ResourceAttributes {
        let Some(arn) = Arn::parse(identifier) else {
            trace!("unclassifiable identifier {:?}", identifier);
            return ResourceAttributes::Unknown;
        };
        match self.parsers.get(arn.service()) {
            Some(parser) => parser(&arn),
            None => {
                trace!("no parser for service {:?} in {:?}", arn.service(), arn.raw());
                ResourceAttributes::Unknown
            }
        }
    }
}

/// The process-wide registry of built-in parsers.
pub fn default_registry() -> &'static ClassifierRegistry {
    static REGISTRY: OnceLock<ClassifierRegistry> = OnceLock::new();
    REGISTRY.get_or_init(ClassifierRegistry::default)
}

/// Classify `identifier` with the built-in parsers.
pub fn classify(identifier: &str) -> ResourceAttributes {
    default_registry().classify(identifier)
}

/// [`classify`] for an identifier that may be absent.
pub fn classify_opt(identifier: Option<&str>) -> ResourceAttributes {
    identifier.map_or(ResourceAttributes::Unknown, classify)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

use chrono::{DateTime, Utc};
use clap::Parser;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::models::AggregateOptions;
use crate::time_utils::{parse_date_bound, DateRange};

/// Path that selects standard input instead of a file.
pub const STDIN_PATH: &str = "-";

// ── Settings (CLI) ─────────────────────────────────────────────────────────────

/// Rank the most expensive resources per service in an AWS Cost and Usage Report
#[derive(Parser, Debug, Clone)]
#[command(
    name = "cur-top",
    about = "Rank the most expensive resources per service in an AWS Cost and Usage Report",
    version
)]
pub struct Settings {
    /// CUR export to read (`.csv` or `.csv.gz`), or `-` for stdin
    pub report: PathBuf,

    /// Number of resources to list per service
    #[arg(
        long,
        short = 'k',
        env = "CUR_TOP_K",
        default_value = "5",
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub top_k: u32,

    /// Only include usage starting at or after this date (YYYY-MM-DD or RFC 3339)
    #[arg(long, value_parser = parse_date_arg)]
    pub start: Option<DateTime<Utc>>,

    /// Only include usage starting before this date (YYYY-MM-DD or RFC 3339)
    #[arg(long, value_parser = parse_date_arg)]
    pub end: Option<DateTime<Utc>>,

    /// Restrict the report to a service code (repeatable)
    #[arg(long = "service", value_name = "SERVICE_CODE")]
    pub services: Vec<String>,

    /// Output format
    #[arg(long, default_value = "text", value_parser = ["text", "json"])]
    pub format: String,

    /// Logging level
    #[arg(
        long,
        env = "CUR_LOG_LEVEL",
        default_value = "INFO",
        value_parser = ["DEBUG", "INFO", "WARNING", "ERROR"]
    )]
    pub log_level: String,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

// ── Settings impl ──────────────────────────────────────────────────────────────

impl Settings {
    /// Parse the process arguments and resolve derived values.
    pub fn load() -> Self {
        Self::parse().resolve()
    }

    /// Same as [`Settings::load`] but over an explicit argument list, returning
    /// clap's error instead of exiting.
    pub fn try_load_from<I, T>(args: I) -> std::result::Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Self::try_parse_from(args).map(Self::resolve)
    }

    /// `--debug` overrides the log level.
    fn resolve(mut self) -> Self {
        if self.debug {
            self.log_level = "DEBUG".to_string();
        }
        self
    }

    /// `true` when the report should be read from stdin.
    pub fn reads_stdin(&self) -> bool {
        self.report == Path::new(STDIN_PATH)
    }

    /// Build validated [`AggregateOptions`] from the CLI values.
    pub fn aggregate_options(&self) -> Result<AggregateOptions> {
        let date_range = DateRange::new(self.start, self.end)?;
        Ok(AggregateOptions::new(self.top_k as usize)?
            .with_date_range(date_range)
            .with_services(self.services.iter().cloned()))
    }
}

fn parse_date_arg(s: &str) -> std::result::Result<DateTime<Utc>, String> {
    parse_date_bound(s).map_err(|e| e.to_string())
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CostError;
    use chrono::TimeZone;

    fn load(args: &[&str]) -> Settings {
        let mut argv = vec!["cur-top"];
        argv.extend_from_slice(args);
        Settings::try_load_from(argv).expect("valid arguments")
    }

    #[test]
    fn test_defaults() {
        let settings = load(&["report.csv"]);
        assert_eq!(settings.report, PathBuf::from("report.csv"));
        assert_eq!(settings.top_k, 5);
        assert_eq!(settings.format, "text");
        assert_eq!(settings.log_level, "INFO");
        assert!(settings.start.is_none());
        assert!(settings.services.is_empty());
        assert!(!settings.reads_stdin());
    }

    #[test]
    fn test_top_k_and_services() {
        let settings = load(&[
            "-k",
            "2",
            "--service",
            "AmazonS3",
            "--service",
            "AWSLambda",
            "report.csv",
        ]);
        let options = settings.aggregate_options().unwrap();
        assert_eq!(options.top_k, 2);
        assert!(options.includes_service("AWSLambda"));
        assert!(!options.includes_service("AmazonEC2"));
    }

    #[test]
    fn test_top_k_zero_rejected() {
        assert!(Settings::try_load_from(["cur-top", "--top-k", "0", "r.csv"]).is_err());
    }

    #[test]
    fn test_report_is_required() {
        assert!(Settings::try_load_from(["cur-top"]).is_err());
    }

    #[test]
    fn test_stdin_path() {
        assert!(load(&["-"]).reads_stdin());
    }

    #[test]
    fn test_date_range_parsed() {
        let settings = load(&["--start", "2024-03-01", "--end", "2024-04-01", "r.csv"]);
        assert_eq!(
            settings.start,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap())
        );
        let options = settings.aggregate_options().unwrap();
        assert!(!options.date_range.is_unbounded());
    }

    #[test]
    fn test_invalid_date_rejected() {
        assert!(Settings::try_load_from(["cur-top", "--start", "March", "r.csv"]).is_err());
    }

    #[test]
    fn test_inverted_range_rejected_by_options() {
        let settings = load(&["--start", "2024-04-01", "--end", "2024-03-01", "r.csv"]);
        assert!(matches!(
            settings.aggregate_options(),
            Err(CostError::InvalidDateRange(_))
        ));
    }

    #[test]
    fn test_debug_overrides_log_level() {
        let settings = load(&["--log-level", "ERROR", "--debug", "r.csv"]);
        assert_eq!(settings.log_level, "DEBUG");
    }

    #[test]
    fn test_format_restricted() {
        assert_eq!(load(&["--format", "json", "r.csv"]).format, "json");
        assert!(Settings::try_load_from(["cur-top", "--format", "xml", "r.csv"]).is_err());
    }
}

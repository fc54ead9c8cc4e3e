//! Ingestion layer for AWS Cost and Usage Reports.
//!
//! Streams CUR CSV rows, folds them into per-service cost aggregates with a
//! bounded top-K ranking, and runs the top-level report pipeline.

pub mod aggregator;
pub mod analysis;
pub mod reader;

pub use cur_core as core;

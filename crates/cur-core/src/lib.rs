//! Domain layer for the CUR top-resources report.
//!
//! Billing record types, resource-identifier classification, the error
//! taxonomy, timestamp helpers and command-line settings.

pub mod classifier;
pub mod error;
pub mod formatting;
pub mod models;
pub mod settings;
pub mod time_utils;

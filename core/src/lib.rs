//! Batch ETL from bank sources and file drops into an SCD2 warehouse, with
//! rule-based fraud reporting over the loaded history.

pub mod bank;
pub mod config;
pub mod engine;
pub mod error;
pub mod fraud_detection;
pub mod ingest;
pub mod loader;
pub mod registry;
pub mod run_log;
pub mod store;
pub mod types;

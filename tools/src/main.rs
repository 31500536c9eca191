//! etl-runner: one batch run of the warehouse pipeline.
//!
//! Usage:
//!   etl-runner --config-dir ./configs --dwh-db dwh.db --bank-db bank.db
//!   etl-runner --dwh-db dwh.db --report-date 2021-03-01 --no-archive --json

use anyhow::{Context, Result};
use chrono::NaiveDate;
use dwh_core::{
    bank::BankStore,
    config::EtlConfig,
    engine::{EtlPipeline, RunSummary},
    ingest::Ingestor,
    run_log::RunLog,
    store::DwhStore,
};
use std::env;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();
    let config_dir = string_arg(&args, "--config-dir").unwrap_or_else(|| "./configs".into());
    let dwh_db = string_arg(&args, "--dwh-db")
        .or_else(|| env::var("DWH_DB").ok())
        .unwrap_or_else(|| "dwh.db".into());
    let bank_db = string_arg(&args, "--bank-db").or_else(|| env::var("BANK_DB").ok());
    let ddl_path = string_arg(&args, "--ddl");
    let report_date = match string_arg(&args, "--report-date") {
        Some(raw) => Some(
            NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
                .with_context(|| format!("--report-date expects YYYY-MM-DD, got {raw}"))?,
        ),
        None => None,
    };
    let archive = !args.iter().any(|a| a == "--no-archive");
    let json = args.iter().any(|a| a == "--json");

    let config = EtlConfig::load(&config_dir)
        .with_context(|| format!("loading configuration from {config_dir}"))?;

    if !json {
        println!("DWH ETL: etl-runner");
        println!("  config:    {config_dir}");
        println!("  dwh db:    {dwh_db}");
        println!("  bank db:   {}", bank_db.as_deref().unwrap_or("(none)"));
        println!("  data dir:  {}", config.files.data_dir);
        println!();
    }

    let log = RunLog::fresh();
    let store = DwhStore::open(&dwh_db, config.dwh.tables.clone())
        .with_context(|| format!("connecting to warehouse {dwh_db}"))?;
    let bank = match &bank_db {
        Some(path) => Some(
            BankStore::open(path, config.bank.tables.clone())
                .with_context(|| format!("connecting to bank database {path}"))?,
        ),
        None => None,
    };

    let pipeline = EtlPipeline::new(config.clone(), store).with_log(log.clone());
    let template = match &ddl_path {
        Some(path) => Some(
            std::fs::read_to_string(path).with_context(|| format!("reading DDL template {path}"))?,
        ),
        None => None,
    };
    pipeline.initialize(template.as_deref())?;

    let ingestor = Ingestor::new(&config.files, log.child("ingest"));
    let mut batches = ingestor.read_incoming()?;
    ingestor.prepare(&mut batches)?;

    let summary = pipeline.run(bank.as_ref(), &batches, report_date)?;

    if archive {
        let moved = ingestor.archive()?;
        log::info!("Archived {} files", moved.len());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("=== RUN SUMMARY ===");
    println!("  run_id:        {}", summary.run_id);
    println!("  bank fields:   {}", summary.bank_fields.join(", "));
    println!("  batches:       {}", summary.batches.len());
    for date in &summary.batches {
        println!("    {date}");
    }
    println!();
    println!("=== FRAUD EVENTS ===");
    if summary.fraud_events.is_empty() {
        println!("  (no detectors ran)");
    }
    for (fraud_type, n) in &summary.fraud_events {
        println!("  {:<34} {n}", fraud_type.label());
    }
    for failure in &summary.detector_failures {
        println!("  FAILED {failure}");
    }
}

fn string_arg(args: &[String], flag: &str) -> Option<String> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].clone())
}

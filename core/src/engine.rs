//! The ETL pipeline. Wires the store, loader and fraud reporter for one run.
//!
//! EXECUTION ORDER (fixed):
//!   1. Warehouse schema initialisation
//!   2. Bank dimensions: bank → staging → SCD2
//!   3. For each incoming batch, dates ascending:
//!        staging → watermark → SCD2 / fact → fraud report
//!   4. Archival of processed files (caller, after a successful run)
//!
//! There is no run-wide transaction: a failure leaves earlier steps committed.

use crate::{
    bank::BankStore,
    config::EtlConfig,
    error::DwhResult,
    fraud_detection::{FraudReport, FraudReporter, FraudType},
    ingest::IncomingBatches,
    loader::WarehouseLoader,
    run_log::RunLog,
    store::DwhStore,
    types::{RunId, TableData},
};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub run_id:            RunId,
    pub bank_fields:       Vec<String>,
    pub batches:           Vec<NaiveDate>,
    pub fraud_events:      BTreeMap<FraudType, usize>,
    pub detector_failures: Vec<String>,
}

impl RunSummary {
    fn absorb(&mut self, report: FraudReport) {
        for (fraud_type, n) in report.inserted {
            *self.fraud_events.entry(fraud_type).or_default() += n;
        }
        for (fraud_type, err) in report.failures {
            self.detector_failures.push(format!("{}: {err}", fraud_type.label()));
        }
    }
}

pub struct EtlPipeline {
    pub store:    DwhStore,
    config:       EtlConfig,
    log:          RunLog,
    generated_on: Option<NaiveDate>,
}

impl EtlPipeline {
    pub fn new(config: EtlConfig, store: DwhStore) -> Self {
        Self {
            store,
            config,
            log: RunLog::fresh(),
            generated_on: None,
        }
    }

    /// In-memory warehouse with test defaults and the bundled schema applied.
    pub fn build_test() -> DwhResult<Self> {
        let config = EtlConfig::default_test();
        let store = DwhStore::in_memory(config.dwh.tables.clone())?;
        let pipeline = Self::new(config, store);
        pipeline.initialize(None)?;
        Ok(pipeline)
    }

    pub fn with_log(mut self, log: RunLog) -> Self {
        self.log = log;
        self
    }

    /// Fix the `report_dt` stamped on fraud events (defaults to today).
    pub fn with_report_generation_date(mut self, date: NaiveDate) -> Self {
        self.generated_on = Some(date);
        self
    }

    pub fn config(&self) -> &EtlConfig {
        &self.config
    }

    pub fn run_id(&self) -> &str {
        self.log.run_id()
    }

    /// Create warehouse tables from `template`, or the bundled DDL.
    pub fn initialize(&self, template: Option<&str>) -> DwhResult<()> {
        match template {
            Some(sql) => self.store.create_schema(sql)?,
            None => self.store.migrate()?,
        }
        self.log.info("Warehouse schema ready");
        Ok(())
    }

    pub fn loader(&self) -> WarehouseLoader<'_> {
        WarehouseLoader::new(&self.store, &self.config.dwh, self.log.child("loader"))
    }

    pub fn reporter(&self) -> FraudReporter<'_> {
        let reporter = FraudReporter::new(&self.store, self.log.child("fraud"));
        match self.generated_on {
            Some(date) => reporter.with_generated_on(date),
            None => reporter,
        }
    }

    pub fn load_bank(&self, bank: &BankStore) -> DwhResult<Vec<String>> {
        self.loader().load_bank_tables(bank)
    }

    /// Load one dated batch, then run every fraud detector.
    pub fn process_batch(
        &self,
        date: NaiveDate,
        tables: &BTreeMap<String, TableData>,
        report_date: Option<NaiveDate>,
    ) -> DwhResult<FraudReport> {
        self.loader().load_incoming(date, tables)?;
        Ok(self.reporter().report_frauds(report_date))
    }

    /// Bank load (when given) followed by every batch in date order.
    pub fn run(
        &self,
        bank: Option<&BankStore>,
        batches: &IncomingBatches,
        report_date: Option<NaiveDate>,
    ) -> DwhResult<RunSummary> {
        let mut summary = RunSummary {
            run_id: self.run_id().to_string(),
            ..Default::default()
        };
        if let Some(bank) = bank {
            summary.bank_fields = self.load_bank(bank)?;
        }
        for (date, tables) in batches {
            let report = self.process_batch(*date, tables, report_date)?;
            summary.batches.push(*date);
            summary.absorb(report);
        }
        self.log.info(format!(
            "Run complete: {} batches, {} fraud events",
            summary.batches.len(),
            summary.fraud_events.values().sum::<usize>()
        ));
        Ok(summary)
    }
}

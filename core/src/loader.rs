//! Warehouse loader: staging loads, SCD2 reconciliation, fact propagation
//! and the metadata watermark.
//!
//! For each batch the order is fixed:
//!   1. replace the staging table content
//!   2. record the batch date as the staging watermark
//!   3. SCD2-merge staging into the dimension (fields with an SCD2 rule)
//!   4. copy missing rows into the fact table (fields with a fact mapping)
//!
//! Errors are not isolated per field: the first failure aborts the batch.

use crate::{
    bank::BankStore,
    config::DwhConfig,
    error::DwhResult,
    registry::TableGroup,
    run_log::RunLog,
    store::{DwhStore, Scd2Outcome},
    types::TableData,
};
use chrono::NaiveDate;
use std::collections::BTreeMap;

pub struct WarehouseLoader<'a> {
    store:  &'a DwhStore,
    config: &'a DwhConfig,
    log:    RunLog,
}

impl<'a> WarehouseLoader<'a> {
    pub fn new(store: &'a DwhStore, config: &'a DwhConfig, log: RunLog) -> Self {
        Self { store, config, log }
    }

    /// Clear the staging table of `field` and load `data` into it.
    /// An unregistered field is a hard error here.
    pub fn load_staging(&self, field: &str, data: &TableData) -> DwhResult<usize> {
        let stg_table = self.store.registry().require(TableGroup::Stg, field)?;
        self.store.clear(stg_table)?;
        let inserted = self.store.append(data, stg_table)?;
        self.log.info(format!("Staged {inserted} rows into {stg_table}"));
        Ok(inserted)
    }

    /// SCD2-merge the staging table of `field` into its dimension.
    /// `None` when the field has no rule or either table is unregistered.
    pub fn merge_dimension(&self, field: &str) -> DwhResult<Option<Scd2Outcome>> {
        let Some(rule) = self.config.scd2.get(field) else {
            return Ok(None);
        };
        let registry = self.store.registry();
        let (Some(stg_table), Some(dim_table)) = (
            registry.resolve(TableGroup::Stg, field),
            registry.resolve(TableGroup::Dim, field),
        ) else {
            self.log.debug(format!("No staging/dimension pair for '{field}', merge skipped"));
            return Ok(None);
        };
        let outcome = self.store.merge_scd2(stg_table, dim_table, rule)?;
        self.log.info(format!(
            "SCD2 {stg_table} -> {dim_table}: {} closed, {} inserted",
            outcome.closed, outcome.inserted
        ));
        Ok(Some(outcome))
    }

    /// Copy staging rows of `field` missing from its fact table.
    /// `None` when the field has no mapping or either table is unregistered.
    pub fn propagate_fact(&self, field: &str) -> DwhResult<Option<usize>> {
        let Some(mapping) = self.config.fact_mapping.get(field) else {
            return Ok(None);
        };
        let registry = self.store.registry();
        let (Some(stg_table), Some(fact_table)) = (
            registry.resolve(TableGroup::Stg, field),
            registry.resolve(TableGroup::Fact, field),
        ) else {
            self.log.debug(format!("No staging/fact pair for '{field}', propagation skipped"));
            return Ok(None);
        };
        let inserted = self.store.copy_missing(stg_table, fact_table, mapping)?;
        self.log.info(format!("Fact {stg_table} -> {fact_table}: {inserted} new rows"));
        Ok(Some(inserted))
    }

    /// Record `as_of` as the staging watermark of `field`.
    /// Returns false (no-op) when the field has no staging table.
    pub fn update_watermark(&self, field: &str, as_of: NaiveDate) -> DwhResult<bool> {
        match self.store.registry().resolve(TableGroup::Stg, field) {
            Some(stg_table) => {
                self.store.set_watermark(stg_table, as_of)?;
                self.log.debug(format!("Watermark {stg_table} = {as_of}"));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Load every dimension the bank carries: bank → staging → SCD2.
    /// Returns the fields that were loaded.
    pub fn load_bank_tables(&self, bank: &BankStore) -> DwhResult<Vec<String>> {
        let mut loaded = Vec::new();
        for (field, dim_table) in self.store.registry().fields(TableGroup::Dim) {
            let Some(bank_table) = bank.resolve(field) else {
                continue;
            };
            if self.config.skip_populated_dimensions && !self.store.is_empty(dim_table)? {
                self.log.info(format!("{dim_table} already populated, bank load skipped"));
                continue;
            }
            let data = bank.fetch_all(bank_table)?;
            self.log.info(format!("Fetched {} rows from bank table {bank_table}", data.len()));
            self.load_staging(field, &data)?;
            self.merge_dimension(field)?;
            loaded.push(field.to_string());
        }
        Ok(loaded)
    }

    /// Load one dated batch of incoming tables.
    pub fn load_incoming(&self, date: NaiveDate, tables: &BTreeMap<String, TableData>) -> DwhResult<()> {
        self.log.info(format!("Loading batch {date} ({} tables)", tables.len()));
        for (field, data) in tables {
            self.load_staging(field, data)?;
            self.update_watermark(field, date)?;
            self.merge_dimension(field)?;
            self.propagate_fact(field)?;
        }
        Ok(())
    }
}

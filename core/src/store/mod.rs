//! SQLite persistence layer for the warehouse.
//!
//! RULE: Only store/ talks to the database.
//! Loaders and detectors call store methods and never execute SQL directly.
//! Table names are checked against the registry before they reach SQL text;
//! data values are always bound parameters.

use crate::{
    error::{DwhError, DwhResult},
    registry::{validate_identifier, TableRegistry},
};
use regex::Regex;
use rusqlite::{Connection, Transaction};

mod bulk;
mod fraud;
mod meta;
mod scd2;

pub(crate) use bulk::fetch_all_from;
pub use fraud::{CardTransactionRow, ClientIdentity, FraudEventRow};
pub use scd2::Scd2Outcome;

pub struct DwhStore {
    conn:     Connection,
    registry: TableRegistry,
}

impl DwhStore {
    pub fn open(path: &str, registry: TableRegistry) -> DwhResult<Self> {
        registry.validate()?;
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        Ok(Self { conn, registry })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory(registry: TableRegistry) -> DwhResult<Self> {
        registry.validate()?;
        let conn = Connection::open(":memory:")?;
        Ok(Self { conn, registry })
    }

    pub fn registry(&self) -> &TableRegistry {
        &self.registry
    }

    /// Substitute registry names into a DDL template and run it in one batch.
    pub fn create_schema(&self, template: &str) -> DwhResult<()> {
        let script = render_ddl(template, &self.registry)?;
        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch(&script)?;
        tx.commit()?;
        Ok(())
    }

    /// Apply the bundled warehouse DDL.
    pub fn migrate(&self) -> DwhResult<()> {
        self.create_schema(include_str!("../../../migrations/001_warehouse.sql"))
    }

    /// Begin a transaction on the store connection. Store calls made through
    /// `&self` while the guard is alive run inside it.
    pub fn transaction(&self) -> DwhResult<Transaction<'_>> {
        Ok(self.conn.unchecked_transaction()?)
    }

    /// Gate for every table name that is about to be formatted into SQL.
    fn table<'a>(&self, name: &'a str) -> DwhResult<&'a str> {
        validate_identifier(name)?;
        if self.registry.is_registered(name) {
            Ok(name)
        } else {
            Err(DwhError::UnregisteredTable(name.to_string()))
        }
    }
}

/// Quote a validated identifier, part by part (`schema.table` → `"schema"."table"`).
pub(crate) fn quote_ident(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{part}\""))
        .collect::<Vec<_>>()
        .join(".")
}

/// Replace `{DIM_cards}`-style placeholders with physical names.
/// Any placeholder left over is an error rather than broken SQL.
pub fn render_ddl(template: &str, registry: &TableRegistry) -> DwhResult<String> {
    let mut script = template.to_string();
    for (key, table) in registry.placeholders() {
        script = script.replace(&format!("{{{key}}}"), table);
    }
    let leftover = Regex::new(r"\{[A-Za-z_]+\}").map_err(anyhow::Error::from)?;
    if let Some(m) = leftover.find(&script) {
        return Err(DwhError::Template(format!("unknown placeholder {}", m.as_str())));
    }
    Ok(script)
}

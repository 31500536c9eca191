//! Read-only view of the bank source database.

use crate::{
    error::{DwhError, DwhResult},
    registry::validate_identifier,
    store::fetch_all_from,
    types::TableData,
};
use rusqlite::Connection;
use std::collections::BTreeMap;

pub struct BankStore {
    conn:   Connection,
    tables: BTreeMap<String, String>,
}

impl BankStore {
    pub fn open(path: &str, tables: BTreeMap<String, String>) -> DwhResult<Self> {
        for table in tables.values() {
            validate_identifier(table)?;
        }
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        Ok(Self { conn, tables })
    }

    /// Open an in-memory bank (used in tests).
    pub fn in_memory(tables: BTreeMap<String, String>) -> DwhResult<Self> {
        for table in tables.values() {
            validate_identifier(table)?;
        }
        Ok(Self { conn: Connection::open_in_memory()?, tables })
    }

    /// Bank table for a logical field, if the bank carries it.
    pub fn resolve(&self, field: &str) -> Option<&str> {
        self.tables.get(field).map(String::as_str)
    }

    pub fn fetch_all(&self, table: &str) -> DwhResult<TableData> {
        if !self.tables.values().any(|t| t == table) {
            return Err(DwhError::UnregisteredTable(table.to_string()));
        }
        fetch_all_from(&self.conn, table)
    }

    /// Run a raw script against the bank. Fixture setup only; the pipeline
    /// itself never writes to the bank.
    pub fn execute_batch(&self, sql: &str) -> DwhResult<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }
}

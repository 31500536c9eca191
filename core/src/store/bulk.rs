use super::{quote_ident, DwhStore};
use crate::{
    config::ColumnMapping,
    error::{DwhError, DwhResult},
    registry::validate_identifier,
    types::TableData,
};
use rusqlite::{params_from_iter, types::Value, Connection};

/// Host-parameter budget per INSERT statement (SQLite's historical default limit).
const MAX_PARAMS_PER_STATEMENT: usize = 999;

impl DwhStore {
    // ── Bulk table operations ──────────────────────────────────

    /// True iff a single-row existence probe finds nothing.
    pub fn is_empty(&self, table: &str) -> DwhResult<bool> {
        let table = self.table(table)?;
        let exists: bool = self.conn.query_row(
            &format!("SELECT EXISTS (SELECT 1 FROM {} LIMIT 1)", quote_ident(table)),
            [],
            |row| row.get(0),
        )?;
        Ok(!exists)
    }

    pub fn fetch_all(&self, table: &str) -> DwhResult<TableData> {
        let table = self.table(table)?;
        fetch_all_from(&self.conn, table)
    }

    pub fn row_count(&self, table: &str) -> DwhResult<i64> {
        let table = self.table(table)?;
        let count = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Insert every row of `data` with multi-row INSERTs inside one transaction.
    /// Either all rows land or none do.
    pub fn append(&self, data: &TableData, table: &str) -> DwhResult<usize> {
        let table = self.table(table)?;
        if data.columns.is_empty() || data.rows.is_empty() {
            return Ok(0);
        }
        for col in &data.columns {
            validate_identifier(col)?;
        }
        if let Some(bad) = data.rows.iter().position(|r| r.len() != data.columns.len()) {
            return Err(DwhError::Other(anyhow::anyhow!(
                "row {bad} has {} values, expected {}",
                data.rows[bad].len(),
                data.columns.len()
            )));
        }

        let width = data.columns.len();
        let rows_per_stmt = (MAX_PARAMS_PER_STATEMENT / width).max(1);
        let column_list = data
            .columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let row_placeholder = format!("({})", vec!["?"; width].join(", "));

        let tx = self.conn.unchecked_transaction()?;
        let mut inserted = 0;
        for chunk in data.rows.chunks(rows_per_stmt) {
            let sql = format!(
                "INSERT INTO {} ({}) VALUES {}",
                quote_ident(table),
                column_list,
                vec![row_placeholder.as_str(); chunk.len()].join(", ")
            );
            let mut stmt = tx.prepare_cached(&sql)?;
            inserted += stmt.execute(params_from_iter(chunk.iter().flatten()))?;
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Delete every row of `table`.
    pub fn clear(&self, table: &str) -> DwhResult<usize> {
        let table = self.table(table)?;
        let tx = self.conn.unchecked_transaction()?;
        let deleted = tx.execute(&format!("DELETE FROM {}", quote_ident(table)), [])?;
        tx.commit()?;
        Ok(deleted)
    }

    /// Insert source rows whose mapped column combination has no match in
    /// `dst_table`. One set-based statement; re-running is a no-op.
    pub fn copy_missing(
        &self,
        src_table: &str,
        dst_table: &str,
        mapping: &ColumnMapping,
    ) -> DwhResult<usize> {
        let src_table = self.table(src_table)?;
        let dst_table = self.table(dst_table)?;
        if mapping.is_empty() {
            return Ok(0);
        }
        let mut src_cols = Vec::with_capacity(mapping.len());
        let mut dst_cols = Vec::with_capacity(mapping.len());
        let mut matches = Vec::with_capacity(mapping.len());
        for (src, dst) in mapping {
            validate_identifier(src)?;
            validate_identifier(dst)?;
            src_cols.push(format!("src.{}", quote_ident(src)));
            dst_cols.push(quote_ident(dst));
            // IS: NULL keys match NULL keys, otherwise plain equality.
            matches.push(format!("dest.{} IS src.{}", quote_ident(dst), quote_ident(src)));
        }

        let sql = format!(
            "INSERT INTO {dst} ({dst_cols})
             SELECT DISTINCT {src_cols}
             FROM {src} AS src
             WHERE NOT EXISTS (
                 SELECT 1 FROM {dst} AS dest
                 WHERE {matches}
             )",
            dst = quote_ident(dst_table),
            src = quote_ident(src_table),
            dst_cols = dst_cols.join(", "),
            src_cols = src_cols.join(", "),
            matches = matches.join(" AND "),
        );

        let tx = self.conn.unchecked_transaction()?;
        let inserted = tx.execute(&sql, [])?;
        tx.commit()?;
        Ok(inserted)
    }
}

/// Full read of an already-validated table name. Shared with the bank store.
pub(crate) fn fetch_all_from(conn: &Connection, table: &str) -> DwhResult<TableData> {
    let mut stmt = conn.prepare(&format!("SELECT * FROM {}", quote_ident(table)))?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();
    let rows = stmt
        .query_map([], |row| {
            (0..width)
                .map(|i| row.get::<_, Value>(i))
                .collect::<Result<Vec<_>, _>>()
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(TableData { columns, rows })
}

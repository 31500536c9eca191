use super::{quote_ident, DwhStore};
use crate::{
    error::{DwhError, DwhResult},
    types::{date_to_sql, DATE_FMT},
};
use chrono::NaiveDate;
use rusqlite::params;

impl DwhStore {
    // ── Metadata watermark ─────────────────────────────────────

    /// Record `as_of` as the latest source date staged for `staging_table`.
    pub fn set_watermark(&self, staging_table: &str, as_of: NaiveDate) -> DwhResult<()> {
        let staging_table = self.table(staging_table)?;
        let meta = quote_ident(self.table(self.registry.meta_table())?);
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            &format!(
                "INSERT INTO {meta} (table_name, max_update_dt) VALUES (?1, ?2)
                 ON CONFLICT(table_name) DO UPDATE SET max_update_dt = excluded.max_update_dt"
            ),
            params![staging_table, date_to_sql(as_of)],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Max recorded watermark for `staging_table`, if any.
    pub fn watermark_for(&self, staging_table: &str) -> DwhResult<Option<NaiveDate>> {
        let meta = quote_ident(self.table(self.registry.meta_table())?);
        let raw: Option<String> = self.conn.query_row(
            &format!("SELECT MAX(max_update_dt) FROM {meta} WHERE table_name = ?1"),
            params![staging_table],
            |row| row.get(0),
        )?;
        match raw {
            None => Ok(None),
            Some(s) => {
                let day = s.get(..10).unwrap_or(&s);
                NaiveDate::parse_from_str(day, DATE_FMT)
                    .map(Some)
                    .map_err(|e| DwhError::MalformedSource {
                        path: self.registry.meta_table().to_string(),
                        reason: format!("max_update_dt '{s}': {e}"),
                    })
            }
        }
    }
}

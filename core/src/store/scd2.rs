use super::{quote_ident, DwhStore};
use crate::{
    config::Scd2Rule,
    error::DwhResult,
    registry::validate_identifier,
    types::{MAX_DATE, MIN_DATE},
};
use rusqlite::params;

/// Row counts of one SCD2 merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Scd2Outcome {
    pub closed:   usize,
    pub inserted: usize,
}

impl DwhStore {
    // ── SCD2 merge ─────────────────────────────────────────────

    /// Reconcile `staging_table` into the SCD2 `dimension_table`.
    ///
    /// Close phase: open versions whose key appears in staging with at least
    /// one differing mapped column get `effective_to` = staging date and
    /// `deleted_flg` = 1.
    /// Insert phase: staging rows with no open version, or differing from it,
    /// become new open versions `[date or MIN_DATE, MAX_DATE)`. Identical
    /// staging rows collapse into one version.
    ///
    /// Both phases share one transaction. A NULL on exactly one side counts
    /// as a difference; NULL against NULL does not.
    pub fn merge_scd2(
        &self,
        staging_table: &str,
        dimension_table: &str,
        rule: &Scd2Rule,
    ) -> DwhResult<Scd2Outcome> {
        let stg = quote_ident(self.table(staging_table)?);
        let dim = quote_ident(self.table(dimension_table)?);
        validate_identifier(&rule.date_col)?;
        validate_identifier(&rule.stg_pk)?;
        validate_identifier(&rule.dim_pk)?;
        if rule.mapping.is_empty() {
            return Ok(Scd2Outcome::default());
        }

        let mut dim_cols = Vec::with_capacity(rule.mapping.len());
        let mut stg_cols = Vec::with_capacity(rule.mapping.len());
        let mut differs  = Vec::with_capacity(rule.mapping.len());
        for (stg_col, dim_col) in &rule.mapping {
            validate_identifier(stg_col)?;
            validate_identifier(dim_col)?;
            dim_cols.push(quote_ident(dim_col));
            stg_cols.push(format!("stg.{}", quote_ident(stg_col)));
            differs.push(format!(
                "dim.{} IS NOT stg.{}",
                quote_ident(dim_col),
                quote_ident(stg_col)
            ));
        }
        let differs = differs.join(" OR ");
        let date_col = quote_ident(&rule.date_col);
        let stg_pk = quote_ident(&rule.stg_pk);
        let dim_pk = quote_ident(&rule.dim_pk);

        let close_sql = format!(
            "UPDATE {dim} AS dim
             SET effective_to = stg.{date_col},
                 deleted_flg  = 1
             FROM {stg} AS stg
             WHERE dim.{dim_pk} = stg.{stg_pk}
               AND dim.deleted_flg = 0
               AND ({differs})"
        );

        let insert_sql = format!(
            "INSERT INTO {dim} ({dim_cols}, effective_from, effective_to, deleted_flg)
             SELECT DISTINCT {stg_cols}, COALESCE(stg.{date_col}, ?1), ?2, 0
             FROM {stg} AS stg
             LEFT JOIN {dim} AS dim
               ON stg.{stg_pk} = dim.{dim_pk} AND dim.deleted_flg = 0
             WHERE stg.{stg_pk} IS NOT NULL
               AND (dim.{dim_pk} IS NULL OR ({differs}))",
            dim_cols = dim_cols.join(", "),
            stg_cols = stg_cols.join(", "),
        );

        let tx = self.conn.unchecked_transaction()?;
        let closed = tx.execute(&close_sql, [])?;
        let inserted = tx.execute(&insert_sql, params![MIN_DATE, MAX_DATE])?;
        tx.commit()?;
        Ok(Scd2Outcome { closed, inserted })
    }
}

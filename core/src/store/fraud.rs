use super::{quote_ident, DwhStore};
use crate::{
    error::{DwhError, DwhResult},
    registry::TableGroup,
    types::{date_to_sql, parse_sql_datetime},
};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::params;

const FIO_SQL: &str =
    "COALESCE(cl.last_name, '') || ' ' || COALESCE(cl.first_name, '') || ' ' || COALESCE(cl.patronymic, '')";

#[derive(Debug, Clone, PartialEq)]
pub struct FraudEventRow {
    pub event_dt:   String,
    pub passport:   Option<String>,
    pub fio:        Option<String>,
    pub phone:      Option<String>,
    pub event_type: String,
    pub report_dt:  String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientIdentity {
    pub passport: Option<String>,
    pub fio:      String,
    pub phone:    Option<String>,
}

/// A fact transaction on a currently-open card, with the owning client when
/// the open account/client chain resolves.
#[derive(Debug, Clone, PartialEq)]
pub struct CardTransactionRow {
    pub card_num:    String,
    pub trans_date:  NaiveDateTime,
    pub raw_date:    String,
    pub amt:         Option<f64>,
    pub oper_result: String,
    pub client:      Option<ClientIdentity>,
}

impl DwhStore {
    // ── Fraud report ───────────────────────────────────────────

    fn dwh_table(&self, group: TableGroup, field: &str) -> DwhResult<String> {
        let name = self.registry.require(group, field)?;
        Ok(quote_ident(self.table(name)?))
    }

    /// Transactions `t` joined through open card → account → client versions.
    fn open_chain_sql(&self) -> DwhResult<String> {
        Ok(format!(
            "JOIN {cards} c
                ON TRIM(t.card_num) = TRIM(c.cards_num) AND c.deleted_flg = 0
             JOIN {accounts} a
                ON c.account_num = a.account_num AND a.deleted_flg = 0
             JOIN {clients} cl
                ON a.client = cl.client_id AND cl.deleted_flg = 0",
            cards = self.dwh_table(TableGroup::Dim, "cards")?,
            accounts = self.dwh_table(TableGroup::Dim, "accounts")?,
            clients = self.dwh_table(TableGroup::Dim, "clients")?,
        ))
    }

    /// Transactions of clients whose passport is blacklisted (entry on or
    /// before the transaction) or expired at transaction time. One event per
    /// transaction.
    pub fn insert_blacklist_fraud(
        &self,
        floor: NaiveDate,
        event_type: &str,
        report_dt: NaiveDate,
    ) -> DwhResult<usize> {
        let sql = format!(
            "INSERT INTO {rep} (event_dt, passport, fio, phone, event_type, report_dt)
             SELECT t.trans_date, cl.passport_num, {FIO_SQL}, cl.phone, ?2, ?3
             FROM {facts} t
             {chain}
             WHERE (cl.passport_valid_to <= t.trans_date
                    OR EXISTS (
                        SELECT 1 FROM {blacklist} p
                        WHERE p.passport_num = cl.passport_num
                          AND p.entry_dt <= t.trans_date
                    ))
               AND t.trans_date >= ?1",
            rep = self.dwh_table(TableGroup::Rep, "fraud")?,
            facts = self.dwh_table(TableGroup::Fact, "transactions")?,
            blacklist = self.dwh_table(TableGroup::Fact, "blacklist")?,
            chain = self.open_chain_sql()?,
        );
        self.execute_report(&sql, floor, event_type, report_dt, None)
    }

    /// Transactions made after the account contract expired.
    pub fn insert_invalid_contract_fraud(
        &self,
        floor: NaiveDate,
        event_type: &str,
        report_dt: NaiveDate,
    ) -> DwhResult<usize> {
        let sql = format!(
            "INSERT INTO {rep} (event_dt, passport, fio, phone, event_type, report_dt)
             SELECT t.trans_date, cl.passport_num, {FIO_SQL}, cl.phone, ?2, ?3
             FROM {facts} t
             {chain}
             WHERE a.valid_to <= t.trans_date
               AND t.trans_date >= ?1",
            rep = self.dwh_table(TableGroup::Rep, "fraud")?,
            facts = self.dwh_table(TableGroup::Fact, "transactions")?,
            chain = self.open_chain_sql()?,
        );
        self.execute_report(&sql, floor, event_type, report_dt, None)
    }

    /// Pairs of transactions by the same client in different terminal cities
    /// at most `max_gap_secs` apart. One event per qualifying transaction,
    /// however many partners it has.
    pub fn insert_city_hopping_fraud(
        &self,
        floor: NaiveDate,
        max_gap_secs: i64,
        event_type: &str,
        report_dt: NaiveDate,
    ) -> DwhResult<usize> {
        let sql = format!(
            "WITH located AS (
                 SELECT t.trans_date,
                        CAST(strftime('%s', t.trans_date) AS INTEGER) AS epoch,
                        term.terminal_city,
                        cl.client_id,
                        cl.passport_num,
                        {FIO_SQL} AS fio,
                        cl.phone
                 FROM {facts} t
                 JOIN {terminals} term
                    ON t.terminal = term.terminal_id AND term.deleted_flg = 0
                 {chain}
             )
             INSERT INTO {rep} (event_dt, passport, fio, phone, event_type, report_dt)
             SELECT t1.trans_date, t1.passport_num, t1.fio, t1.phone, ?2, ?3
             FROM located t1
             WHERE t1.trans_date >= ?1
               AND EXISTS (
                   SELECT 1 FROM located t2
                   WHERE t2.passport_num = t1.passport_num
                     AND t2.client_id = t1.client_id
                     AND t2.terminal_city <> t1.terminal_city
                     AND ABS(t2.epoch - t1.epoch) <= ?4
               )",
            rep = self.dwh_table(TableGroup::Rep, "fraud")?,
            facts = self.dwh_table(TableGroup::Fact, "transactions")?,
            terminals = self.dwh_table(TableGroup::Dim, "terminals")?,
            chain = self.open_chain_sql()?,
        );
        self.execute_report(&sql, floor, event_type, report_dt, Some(max_gap_secs))
    }

    fn execute_report(
        &self,
        sql: &str,
        floor: NaiveDate,
        event_type: &str,
        report_dt: NaiveDate,
        gap: Option<i64>,
    ) -> DwhResult<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let floor = date_to_sql(floor);
        let report_dt = date_to_sql(report_dt);
        let inserted = match gap {
            Some(secs) => tx.execute(sql, params![floor, event_type, report_dt, secs])?,
            None => tx.execute(sql, params![floor, event_type, report_dt])?,
        };
        tx.commit()?;
        Ok(inserted)
    }

    /// Transactions since `floor` on open cards, ordered by card then time.
    pub fn card_transactions_since(&self, floor: NaiveDate) -> DwhResult<Vec<CardTransactionRow>> {
        let sql = format!(
            "SELECT TRIM(t.card_num), t.trans_date, CAST(t.amt AS REAL), t.oper_result,
                    cl.client_id, cl.passport_num, {FIO_SQL}, cl.phone
             FROM {facts} t
             JOIN {cards} c
                ON TRIM(t.card_num) = TRIM(c.cards_num) AND c.deleted_flg = 0
             LEFT JOIN {accounts} a
                ON c.account_num = a.account_num AND a.deleted_flg = 0
             LEFT JOIN {clients} cl
                ON a.client = cl.client_id AND cl.deleted_flg = 0
             WHERE t.trans_date >= ?1
             ORDER BY TRIM(t.card_num), t.trans_date",
            facts = self.dwh_table(TableGroup::Fact, "transactions")?,
            cards = self.dwh_table(TableGroup::Dim, "cards")?,
            accounts = self.dwh_table(TableGroup::Dim, "accounts")?,
            clients = self.dwh_table(TableGroup::Dim, "clients")?,
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let raw = stmt
            .query_map(params![date_to_sql(floor)], |row| {
                let client_id: Option<String> = row.get(4)?;
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<f64>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    client_id.is_some(),
                    ClientIdentity {
                        passport: row.get(5)?,
                        fio:      row.get(6)?,
                        phone:    row.get(7)?,
                    },
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(card_num, raw_date, amt, oper_result, has_client, identity)| {
                let trans_date = parse_sql_datetime(&raw_date).ok_or_else(|| {
                    DwhError::MalformedSource {
                        path: self.registry.fact.transactions.clone(),
                        reason: format!("unparseable trans_date '{raw_date}'"),
                    }
                })?;
                Ok(CardTransactionRow {
                    card_num,
                    trans_date,
                    raw_date,
                    amt,
                    oper_result: oper_result.unwrap_or_default(),
                    client: has_client.then_some(identity),
                })
            })
            .collect()
    }

    /// Plain inserts into the fraud report; the caller owns the transaction.
    pub fn insert_fraud_events(&self, events: &[FraudEventRow]) -> DwhResult<usize> {
        let rep = self.dwh_table(TableGroup::Rep, "fraud")?;
        let mut stmt = self.conn.prepare_cached(&format!(
            "INSERT INTO {rep} (event_dt, passport, fio, phone, event_type, report_dt)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
        ))?;
        let mut inserted = 0;
        for e in events {
            inserted += stmt.execute(params![
                e.event_dt,
                e.passport,
                e.fio,
                e.phone,
                e.event_type,
                e.report_dt,
            ])?;
        }
        Ok(inserted)
    }

    pub fn fraud_events(&self) -> DwhResult<Vec<FraudEventRow>> {
        let rep = self.dwh_table(TableGroup::Rep, "fraud")?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT event_dt, passport, fio, phone, event_type, report_dt
             FROM {rep} ORDER BY event_dt ASC, event_type ASC"
        ))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(FraudEventRow {
                    event_dt:   row.get(0)?,
                    passport:   row.get(1)?,
                    fio:        row.get(2)?,
                    phone:      row.get(3)?,
                    event_type: row.get(4)?,
                    report_dt:  row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

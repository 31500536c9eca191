//! Fraud detection: four rule-based detectors over the merged warehouse.
//!
//! Each detector:
//!   - takes an optional explicit report date; without one the floor is the
//!     watermark of the transactions staging table
//!   - appends qualifying events to the fraud report in its own transaction
//!
//! A failing detector is logged and the remaining detectors still run.

use crate::{
    error::DwhResult,
    registry::TableGroup,
    run_log::RunLog,
    store::{CardTransactionRow, DwhStore, FraudEventRow},
    types::date_to_sql,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ── Constants ────────────────────────────────────────────────────────────────

/// Max gap between two transactions in different cities.
pub const CITY_HOP_WINDOW_SECS: i64 = 3600;

/// Every step of a guessing run must fall within this span of its first step.
pub const GUESS_WINDOW_SECS: i64 = 20 * 60;
pub const GUESS_MIN_RUN_LEN: usize = 4;
pub const GUESS_MIN_REJECTS: usize = 3;

pub const OPER_REJECT: &str = "REJECT";
pub const OPER_SUCCESS: &str = "SUCCESS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FraudType {
    BlacklistedOrExpiredPassport,
    InvalidContract,
    DifferentCitiesShortTime,
    AmountGuessing,
}

impl FraudType {
    pub const ALL: [FraudType; 4] = [
        FraudType::BlacklistedOrExpiredPassport,
        FraudType::InvalidContract,
        FraudType::DifferentCitiesShortTime,
        FraudType::AmountGuessing,
    ];

    /// Stable label stored in `event_type`.
    pub fn label(self) -> &'static str {
        match self {
            FraudType::BlacklistedOrExpiredPassport => "blacklisted_or_expired_passport",
            FraudType::InvalidContract              => "invalid_contract",
            FraudType::DifferentCitiesShortTime     => "different_cities_short_time",
            FraudType::AmountGuessing               => "amount_guessing",
        }
    }
}

/// Outcome of one `report_frauds` call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FraudReport {
    pub inserted: BTreeMap<FraudType, usize>,
    pub failures: Vec<(FraudType, String)>,
}

impl FraudReport {
    pub fn total(&self) -> usize {
        self.inserted.values().sum()
    }
}

// ── Reporter ─────────────────────────────────────────────────────────────────

pub struct FraudReporter<'a> {
    store:        &'a DwhStore,
    log:          RunLog,
    generated_on: NaiveDate,
}

impl<'a> FraudReporter<'a> {
    pub fn new(store: &'a DwhStore, log: RunLog) -> Self {
        Self {
            store,
            log,
            generated_on: chrono::Local::now().date_naive(),
        }
    }

    /// Override the `report_dt` stamped on new events.
    pub fn with_generated_on(mut self, date: NaiveDate) -> Self {
        self.generated_on = date;
        self
    }

    /// Run all four detectors in order.
    pub fn report_frauds(&self, report_date: Option<NaiveDate>) -> FraudReport {
        let mut report = FraudReport::default();
        for fraud_type in FraudType::ALL {
            self.log.info(format!("Checking {} frauds ...", fraud_type.label()));
            match self.detect(fraud_type, report_date) {
                Ok(n) => {
                    self.log.info(format!("{}: {n} events", fraud_type.label()));
                    report.inserted.insert(fraud_type, n);
                }
                Err(e) => {
                    self.log.error(format!("{} detector failed: {e}", fraud_type.label()));
                    report.failures.push((fraud_type, e.to_string()));
                }
            }
        }
        report
    }

    pub fn detect(&self, fraud_type: FraudType, report_date: Option<NaiveDate>) -> DwhResult<usize> {
        let Some(floor) = self.floor(report_date)? else {
            self.log.warn(format!(
                "No report date and no transactions watermark, {} skipped",
                fraud_type.label()
            ));
            return Ok(0);
        };
        let label = fraud_type.label();
        match fraud_type {
            FraudType::BlacklistedOrExpiredPassport => {
                self.store.insert_blacklist_fraud(floor, label, self.generated_on)
            }
            FraudType::InvalidContract => {
                self.store.insert_invalid_contract_fraud(floor, label, self.generated_on)
            }
            FraudType::DifferentCitiesShortTime => self.store.insert_city_hopping_fraud(
                floor,
                CITY_HOP_WINDOW_SECS,
                label,
                self.generated_on,
            ),
            FraudType::AmountGuessing => self.detect_amount_guessing(floor),
        }
    }

    /// Explicit report date, else the transactions staging watermark.
    pub fn floor(&self, report_date: Option<NaiveDate>) -> DwhResult<Option<NaiveDate>> {
        if report_date.is_some() {
            return Ok(report_date);
        }
        let stg_transactions = self.store.registry().require(TableGroup::Stg, "transactions")?;
        self.store.watermark_for(stg_transactions)
    }

    fn detect_amount_guessing(&self, floor: NaiveDate) -> DwhResult<usize> {
        let tx = self.store.transaction()?;
        let txns = self.store.card_transactions_since(floor)?;
        let report_dt = date_to_sql(self.generated_on);
        let mut events: Vec<FraudEventRow> = amount_guessing_hits(&txns)
            .into_iter()
            .filter_map(|i| {
                let t = &txns[i];
                let client = t.client.as_ref()?;
                Some(FraudEventRow {
                    event_dt:   t.raw_date.clone(),
                    passport:   client.passport.clone(),
                    fio:        Some(client.fio.clone()),
                    phone:      client.phone.clone(),
                    event_type: FraudType::AmountGuessing.label().to_string(),
                    report_dt:  report_dt.clone(),
                })
            })
            .collect();
        events.sort_by(|a, b| a.event_dt.cmp(&b.event_dt));
        let inserted = self.store.insert_fraud_events(&events)?;
        tx.commit()?;
        Ok(inserted)
    }
}

// ── Amount-guessing walk ─────────────────────────────────────────────────────

/// Indices of transactions that belong to an amount-guessing run.
///
/// `txns` must be ordered by card, then time. For every start position the
/// walk extends one step at a time while the step stays within
/// `GUESS_WINDOW_SECS` of the start and its amount is strictly below the
/// previous step's. A step without an amount ends the run. Whenever the
/// run so far is at least `GUESS_MIN_RUN_LEN` long, holds at least
/// `GUESS_MIN_REJECTS` rejects and the current step is a success, its
/// rejects and that final success are hits.
pub fn amount_guessing_hits(txns: &[CardTransactionRow]) -> Vec<usize> {
    let mut hits = BTreeSet::new();
    let mut start = 0;
    while start < txns.len() {
        let card = &txns[start].card_num;
        let len = txns[start..].iter().take_while(|t| &t.card_num == card).count();
        scan_card(&txns[start..start + len], start, &mut hits);
        start += len;
    }
    hits.into_iter().collect()
}

fn scan_card(card: &[CardTransactionRow], offset: usize, hits: &mut BTreeSet<usize>) {
    for first in 0..card.len() {
        let origin = &card[first];
        let Some(mut prev_amt) = origin.amt else {
            continue;
        };
        let mut rejects = usize::from(is_reject(origin));

        for last in first + 1..card.len() {
            let step = &card[last];
            let elapsed = (step.trans_date - origin.trans_date).num_seconds();
            // An unknown amount is never lower than its predecessor.
            let Some(amt) = step.amt else {
                break;
            };
            if elapsed > GUESS_WINDOW_SECS || amt >= prev_amt {
                break;
            }
            prev_amt = amt;
            rejects += usize::from(is_reject(step));

            let run_len = last - first + 1;
            if step.oper_result == OPER_SUCCESS
                && run_len >= GUESS_MIN_RUN_LEN
                && rejects >= GUESS_MIN_REJECTS
            {
                hits.extend(
                    (first..last)
                        .filter(|&k| is_reject(&card[k]))
                        .map(|k| k + offset),
                );
                hits.insert(last + offset);
            }
        }
    }
}

fn is_reject(t: &CardTransactionRow) -> bool {
    t.oper_result == OPER_REJECT
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDateTime};

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    fn txn(card: &str, minutes: i64, amt: f64, result: &str) -> CardTransactionRow {
        let at = t0() + Duration::minutes(minutes);
        CardTransactionRow {
            card_num: card.into(),
            trans_date: at,
            raw_date: at.format("%Y-%m-%d %H:%M:%S").to_string(),
            amt: Some(amt),
            oper_result: result.into(),
            client: None,
        }
    }

    #[test]
    fn decreasing_rejects_ending_in_success_are_all_hits() {
        let txns = vec![
            txn("X", 0, 1000.0, "REJECT"),
            txn("X", 5, 800.0, "REJECT"),
            txn("X", 10, 500.0, "REJECT"),
            txn("X", 15, 200.0, "SUCCESS"),
            txn("X", 25, 100.0, "SUCCESS"),
        ];
        assert_eq!(amount_guessing_hits(&txns), vec![0, 1, 2, 3]);
    }

    #[test]
    fn run_broken_by_non_decreasing_amount() {
        let txns = vec![
            txn("X", 0, 1000.0, "REJECT"),
            txn("X", 5, 800.0, "REJECT"),
            txn("X", 10, 900.0, "REJECT"),
            txn("X", 15, 200.0, "SUCCESS"),
        ];
        assert!(amount_guessing_hits(&txns).is_empty());
    }

    #[test]
    fn run_must_fit_in_twenty_minutes() {
        let txns = vec![
            txn("X", 0, 1000.0, "REJECT"),
            txn("X", 8, 800.0, "REJECT"),
            txn("X", 16, 500.0, "REJECT"),
            txn("X", 21, 200.0, "SUCCESS"),
        ];
        assert!(amount_guessing_hits(&txns).is_empty());
    }

    #[test]
    fn two_rejects_are_not_enough() {
        let txns = vec![
            txn("X", 0, 1000.0, "SUCCESS"),
            txn("X", 5, 800.0, "REJECT"),
            txn("X", 10, 500.0, "REJECT"),
            txn("X", 15, 200.0, "SUCCESS"),
        ];
        assert!(amount_guessing_hits(&txns).is_empty());
    }

    #[test]
    fn later_start_can_qualify_after_a_noisy_prefix() {
        let txns = vec![
            txn("X", 0, 50.0, "SUCCESS"),
            txn("X", 30, 1000.0, "REJECT"),
            txn("X", 32, 900.0, "REJECT"),
            txn("X", 34, 800.0, "REJECT"),
            txn("X", 36, 700.0, "REJECT"),
            txn("X", 38, 600.0, "SUCCESS"),
        ];
        assert_eq!(amount_guessing_hits(&txns), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn missing_amount_ends_the_run() {
        let mut txns = vec![
            txn("X", 0, 1000.0, "REJECT"),
            txn("X", 5, 800.0, "REJECT"),
            txn("X", 10, 500.0, "REJECT"),
            txn("X", 15, 0.0, "SUCCESS"),
        ];
        txns[3].amt = None;
        assert!(amount_guessing_hits(&txns).is_empty());

        txns[3].amt = Some(200.0);
        txns[0].amt = None;
        assert!(
            amount_guessing_hits(&txns).is_empty(),
            "three steps after an unknown start are too short"
        );
    }

    #[test]
    fn runs_never_span_cards() {
        let txns = vec![
            txn("X", 0, 1000.0, "REJECT"),
            txn("X", 5, 800.0, "REJECT"),
            txn("Y", 10, 500.0, "REJECT"),
            txn("Y", 15, 200.0, "SUCCESS"),
        ];
        assert!(amount_guessing_hits(&txns).is_empty());
    }
}

//! SCD2 merge tests.
//!
//! Tests cover: version close + reopen on an attribute change, re-merge
//! idempotence, NULL comparison semantics, missing staging dates, NULL keys,
//! and the single-open-version guarantee.

use dwh_core::{
    engine::EtlPipeline,
    error::DwhError,
    types::{TableData, MAX_DATE, MIN_DATE},
};
use rusqlite::types::Value;

const CLIENT_COLS: &[&str] = &[
    "client_id",
    "last_name",
    "first_name",
    "patronymic",
    "passport_num",
    "passport_valid_to",
    "phone",
    "update_dt",
];

fn build() -> EtlPipeline {
    EtlPipeline::build_test().expect("build test pipeline")
}

fn client(id: Option<&str>, phone: Option<&str>, update_dt: Option<&str>) -> TableData {
    TableData::from_text(
        CLIENT_COLS,
        &[&[
            id,
            Some("Petrova"),
            Some("Anna"),
            Some("Sergeevna"),
            Some("4510 123456"),
            Some("2030-01-01"),
            phone,
            update_dt,
        ]],
    )
}

fn stage_and_merge(pipeline: &EtlPipeline, data: &TableData) -> dwh_core::store::Scd2Outcome {
    let loader = pipeline.loader();
    loader.load_staging("clients", data).unwrap();
    loader
        .merge_dimension("clients")
        .unwrap()
        .expect("clients has an SCD2 rule")
}

fn text(v: Option<&Value>) -> Option<String> {
    match v {
        Some(Value::Text(s)) => Some(s.clone()),
        _ => None,
    }
}

fn int(v: Option<&Value>) -> Option<i64> {
    match v {
        Some(Value::Integer(i)) => Some(*i),
        _ => None,
    }
}

/// A changed phone closes the old version at the staging date and opens a
/// new one from that date.
#[test]
fn changed_attribute_closes_and_reopens() {
    let pipeline = build();
    let first = stage_and_merge(&pipeline, &client(Some("C1"), Some("111"), Some("2024-01-01")));
    assert_eq!(first.closed, 0);
    assert_eq!(first.inserted, 1);

    let second = stage_and_merge(&pipeline, &client(Some("C1"), Some("222"), Some("2024-02-01")));
    assert_eq!(second.closed, 1, "old version must be closed");
    assert_eq!(second.inserted, 1, "new version must be opened");

    let dim = pipeline.store.fetch_all("dwh_dim_clients_hist").unwrap();
    assert_eq!(dim.len(), 2);

    let old = (0..dim.len())
        .find(|&r| text(dim.value(r, "phone")).as_deref() == Some("111"))
        .expect("old version kept");
    assert_eq!(text(dim.value(old, "effective_from")).as_deref(), Some("2024-01-01"));
    assert_eq!(text(dim.value(old, "effective_to")).as_deref(), Some("2024-02-01"));
    assert_eq!(int(dim.value(old, "deleted_flg")), Some(1));

    let new = (0..dim.len())
        .find(|&r| text(dim.value(r, "phone")).as_deref() == Some("222"))
        .expect("new version inserted");
    assert_eq!(text(dim.value(new, "effective_from")).as_deref(), Some("2024-02-01"));
    assert_eq!(text(dim.value(new, "effective_to")).as_deref(), Some(MAX_DATE));
    assert_eq!(int(dim.value(new, "deleted_flg")), Some(0));
}

/// Merging the same staging content again changes nothing.
#[test]
fn remerge_of_unchanged_staging_is_a_noop() {
    let pipeline = build();
    let data = client(Some("C1"), Some("111"), Some("2024-01-01"));
    stage_and_merge(&pipeline, &data);

    let again = stage_and_merge(&pipeline, &data);
    assert_eq!(again.closed, 0);
    assert_eq!(again.inserted, 0);
    assert_eq!(pipeline.store.row_count("dwh_dim_clients_hist").unwrap(), 1);
}

/// NULL against NULL is equal; NULL against a value is a change.
#[test]
fn null_attributes_compare_null_safely() {
    let pipeline = build();
    stage_and_merge(&pipeline, &client(Some("C1"), None, Some("2024-01-01")));
    let same = stage_and_merge(&pipeline, &client(Some("C1"), None, Some("2024-01-05")));
    assert_eq!((same.closed, same.inserted), (0, 0), "NULL phone unchanged");

    let filled = stage_and_merge(&pipeline, &client(Some("C1"), Some("333"), Some("2024-01-10")));
    assert_eq!((filled.closed, filled.inserted), (1, 1), "NULL -> value is a change");

    let cleared = stage_and_merge(&pipeline, &client(Some("C1"), None, Some("2024-01-20")));
    assert_eq!((cleared.closed, cleared.inserted), (1, 1), "value -> NULL is a change");
}

/// A new key without a staging date starts at the minimum date.
#[test]
fn missing_staging_date_uses_min_date() {
    let pipeline = build();
    stage_and_merge(&pipeline, &client(Some("C9"), Some("999"), None));

    let dim = pipeline.store.fetch_all("dwh_dim_clients_hist").unwrap();
    assert_eq!(dim.len(), 1);
    assert_eq!(text(dim.value(0, "effective_from")).as_deref(), Some(MIN_DATE));
    assert_eq!(text(dim.value(0, "effective_to")).as_deref(), Some(MAX_DATE));
}

/// Staging rows without a key never become versions.
#[test]
fn null_key_rows_are_skipped() {
    let pipeline = build();
    let outcome = stage_and_merge(&pipeline, &client(None, Some("111"), Some("2024-01-01")));
    assert_eq!(outcome.inserted, 0);
    assert!(pipeline.store.is_empty("dwh_dim_clients_hist").unwrap());
}

/// Every key keeps exactly one open version across repeated changes.
#[test]
fn at_most_one_open_version_per_key() {
    let pipeline = build();
    for (i, phone) in ["100", "200", "300", "400"].iter().enumerate() {
        let date = format!("2024-0{}-01", i + 1);
        stage_and_merge(&pipeline, &client(Some("C1"), Some(phone), Some(&date)));
    }

    let dim = pipeline.store.fetch_all("dwh_dim_clients_hist").unwrap();
    assert_eq!(dim.len(), 4);
    let open = (0..dim.len())
        .filter(|&r| int(dim.value(r, "deleted_flg")) == Some(0))
        .count();
    assert_eq!(open, 1, "exactly one open version expected, got {open}");
}

/// Fields without a rule are a no-op; unregistered tables are rejected.
#[test]
fn unmapped_fields_and_unregistered_tables() {
    let pipeline = build();
    assert_eq!(pipeline.loader().merge_dimension("blacklist").unwrap(), None);
    assert_eq!(pipeline.loader().merge_dimension("wallets").unwrap(), None);

    let rule = pipeline.config().dwh.scd2["clients"].clone();
    let err = pipeline
        .store
        .merge_scd2("stg_clients", "dim_wallets", &rule)
        .unwrap_err();
    assert!(matches!(err, DwhError::UnregisteredTable(_)), "got {err:?}");
}

/// Identical staging rows for a new key open a single version.
#[test]
fn duplicate_staging_rows_open_one_version() {
    let pipeline = build();
    let row: &[Option<&str>] = &[
        Some("P1"),
        Some("POS"),
        Some("Moscow"),
        Some("Arbat 1"),
        Some("2021-03-01"),
    ];
    let data = TableData::from_text(
        &["terminal_id", "terminal_type", "terminal_city", "terminal_address", "date"],
        &[row, row],
    );
    let loader = pipeline.loader();
    loader.load_staging("terminals", &data).unwrap();
    let outcome = loader
        .merge_dimension("terminals")
        .unwrap()
        .expect("terminals has an SCD2 rule");
    assert_eq!(outcome.inserted, 1);
    assert_eq!(pipeline.store.row_count("dwh_dim_terminals_hist").unwrap(), 1);
}

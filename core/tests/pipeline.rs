//! End-to-end pipeline tests: bank load, dated file batches and the fraud
//! report in one run.

use chrono::NaiveDate;
use dwh_core::{
    bank::BankStore,
    config::EtlConfig,
    engine::EtlPipeline,
    fraud_detection::FraudType,
    ingest::{IncomingBatches, Ingestor},
    run_log::RunLog,
    store::DwhStore,
    types::TableData,
};
use std::collections::BTreeMap;

const BANK_FIXTURE: &str = "
    CREATE TABLE accounts (account TEXT, valid_to TEXT, client TEXT, create_dt TEXT, update_dt TEXT);
    CREATE TABLE cards (card_num TEXT, account TEXT, create_dt TEXT, update_dt TEXT);
    CREATE TABLE clients (
        client_id TEXT, last_name TEXT, first_name TEXT, patronymic TEXT, date_of_birth TEXT,
        passport_num TEXT, passport_valid_to TEXT, phone TEXT, create_dt TEXT, update_dt TEXT
    );
    INSERT INTO accounts VALUES ('A1', '2030-01-01', 'C1', '2020-01-01', NULL);
    INSERT INTO cards VALUES ('K1', 'A1', '2020-01-01', NULL);
    INSERT INTO clients VALUES ('C1', 'Ivanov', 'Ivan', 'Ivanovich', '1980-05-05',
        '4510 111111', '2030-01-01', '+7 900 000 00 01', '2020-01-01', NULL);
";

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn bank() -> BankStore {
    let bank = BankStore::in_memory(EtlConfig::default_test().bank.tables).expect("open bank");
    bank.execute_batch(BANK_FIXTURE).expect("bank fixture");
    bank
}

fn batch(date: &str, txns: &[(&str, &str, &str, &str)], blacklisted: &[&str]) -> BTreeMap<String, TableData> {
    let mut tables = BTreeMap::new();
    let mut data = TableData::from_text(
        &["transaction_id", "transaction_date", "amount", "card_num", "oper_type", "oper_result", "terminal"],
        &[],
    );
    for &(id, at, amt, terminal) in txns {
        data.extend(TableData::from_text(
            &["transaction_id", "transaction_date", "amount", "card_num", "oper_type", "oper_result", "terminal"],
            &[&[Some(id), Some(at), Some(amt), Some("K1"), Some("PAYMENT"), Some("SUCCESS"), Some(terminal)]],
        ));
    }
    tables.insert("transactions".to_string(), data);
    tables.insert(
        "terminals".to_string(),
        TableData::from_text(
            &["terminal_id", "terminal_type", "terminal_city", "terminal_address", "date"],
            &[
                &[Some("P1"), Some("POS"), Some("Moscow"), Some("Arbat 1"), Some(date)],
                &[Some("P2"), Some("ATM"), Some("Kazan"), Some("Baumana 5"), Some(date)],
            ],
        ),
    );
    let mut blacklist = TableData::from_text(&["date", "passport"], &[]);
    for &passport in blacklisted {
        blacklist.extend(TableData::from_text(&["date", "passport"], &[&[Some(date), Some(passport)]]));
    }
    tables.insert("blacklist".to_string(), blacklist);
    tables
}

#[test]
fn full_run_reports_frauds_per_batch() {
    init_logging();
    let pipeline = EtlPipeline::build_test()
        .expect("build test pipeline")
        .with_report_generation_date(day(2021, 3, 3));

    let mut batches = IncomingBatches::new();
    batches.insert(
        day(2021, 3, 1),
        batch("2021-03-01", &[
            ("T1", "2021-03-01 10:00:00", "100", "P1"),
            ("T2", "2021-03-01 10:30:00", "100", "P2"),
        ], &[]),
    );
    batches.insert(
        day(2021, 3, 2),
        batch("2021-03-02", &[("T3", "2021-03-02 12:00:00", "100", "P1")], &["4510 111111"]),
    );

    let summary = pipeline.run(Some(&bank()), &batches, None).unwrap();
    assert_eq!(summary.bank_fields, vec!["accounts", "cards", "clients"]);
    assert_eq!(summary.batches, vec![day(2021, 3, 1), day(2021, 3, 2)]);
    assert!(summary.detector_failures.is_empty(), "{:?}", summary.detector_failures);
    assert_eq!(summary.fraud_events[&FraudType::DifferentCitiesShortTime], 2);
    assert_eq!(summary.fraud_events[&FraudType::BlacklistedOrExpiredPassport], 1);
    assert_eq!(summary.run_id, pipeline.run_id());

    assert_eq!(pipeline.store.row_count("dwh_fact_transactions").unwrap(), 3);
    assert_eq!(
        pipeline.store.watermark_for("stg_transactions").unwrap(),
        Some(day(2021, 3, 2))
    );
    let events = pipeline.store.fraud_events().unwrap();
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| e.report_dt == "2021-03-03"));
}

/// Re-running the same batches adds nothing to dimensions or facts.
#[test]
fn rerun_is_idempotent_for_the_warehouse() {
    let pipeline = EtlPipeline::build_test().expect("build test pipeline");
    let mut batches = IncomingBatches::new();
    batches.insert(
        day(2021, 3, 1),
        batch("2021-03-01", &[("T1", "2021-03-01 10:00:00", "100", "P1")], &["4510 999999"]),
    );

    pipeline.run(Some(&bank()), &batches, None).unwrap();
    pipeline.run(Some(&bank()), &batches, None).unwrap();

    assert_eq!(pipeline.store.row_count("dwh_fact_transactions").unwrap(), 1);
    assert_eq!(pipeline.store.row_count("dwh_fact_passport_blacklist").unwrap(), 1);
    assert_eq!(pipeline.store.row_count("dwh_dim_terminals_hist").unwrap(), 2);
    assert_eq!(pipeline.store.row_count("dwh_dim_clients_hist").unwrap(), 1);
}

#[test]
fn summary_serializes_fraud_labels() {
    let pipeline = EtlPipeline::build_test().expect("build test pipeline");
    let summary = pipeline.run(None, &IncomingBatches::new(), None).unwrap();
    assert!(summary.batches.is_empty());
    let json = serde_json::to_string(&summary).unwrap();
    assert!(json.contains("\"run_id\""), "{json}");
}

/// Files on disk through a file-backed warehouse.
#[test]
fn file_drop_to_warehouse() {
    init_logging();
    let root = std::env::temp_dir().join(format!("dwh-pipeline-{}", uuid::Uuid::new_v4()));
    let data_dir = root.join("data");
    std::fs::create_dir_all(&data_dir).unwrap();
    std::fs::write(
        data_dir.join("transactions_01032021.txt"),
        "transaction_id;transaction_date;amount;card_num;oper_type;oper_result;terminal\n\
         T1;2021-03-01 10:00:00;1000,00;K1;PAYMENT;REJECT;P1\n\
         T2;2021-03-01 10:02:00;900,00;K1;PAYMENT;REJECT;P1\n\
         T3;2021-03-01 10:04:00;800,00;K1;PAYMENT;REJECT;P1\n\
         T4;2021-03-01 10:06:00;700,00;K1;PAYMENT;SUCCESS;P1\n",
    )
    .unwrap();
    std::fs::write(
        data_dir.join("terminals_01032021.csv"),
        "terminal_id;terminal_type;terminal_city;terminal_address\nP1;POS;Moscow;Arbat 1\n",
    )
    .unwrap();

    let mut config = EtlConfig::default_test();
    config.files.data_dir = data_dir.to_string_lossy().to_string();
    config.files.archive_dir = root.join("archive").to_string_lossy().to_string();

    let db_path = root.join("dwh.db").to_string_lossy().to_string();
    let store = DwhStore::open(&db_path, config.dwh.tables.clone()).unwrap();
    let pipeline = EtlPipeline::new(config.clone(), store);
    pipeline.initialize(None).unwrap();

    let ingestor = Ingestor::new(&config.files, RunLog::fresh());
    let mut batches = ingestor.read_incoming().unwrap();
    ingestor.prepare(&mut batches).unwrap();
    let summary = pipeline.run(Some(&bank()), &batches, None).unwrap();
    ingestor.archive().unwrap();

    assert_eq!(summary.fraud_events[&FraudType::AmountGuessing], 4);
    assert_eq!(pipeline.store.row_count("dwh_dim_terminals_hist").unwrap(), 1);
    assert!(root.join("archive").join("transactions_01032021.txt.backup").exists());

    drop(pipeline);
    let _ = std::fs::remove_dir_all(&root);
}

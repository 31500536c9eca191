use crate::{
    error::{DwhError, DwhResult},
    registry::{
        validate_identifier, DimTables, FactTables, MetaTables, RepTables, StgTables,
        TableRegistry,
    },
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Source column → destination column.
pub type ColumnMapping = BTreeMap<String, String>;

/// How one staging table is reconciled into its SCD2 dimension.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Scd2Rule {
    pub mapping:  ColumnMapping,
    pub date_col: String,
    pub stg_pk:   String,
    pub dim_pk:   String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DwhConfig {
    pub tables: TableRegistry,
    #[serde(default)]
    pub scd2: BTreeMap<String, Scd2Rule>,
    #[serde(default)]
    pub fact_mapping: BTreeMap<String, ColumnMapping>,
    /// Skip a bank dimension whose warehouse table already holds rows.
    #[serde(default)]
    pub skip_populated_dimensions: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankConfig {
    pub tables: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PreprocessRule {
    #[serde(default)]
    pub numeric_cols: Vec<String>,
    #[serde(default)]
    pub add_cols: Vec<String>,
    #[serde(default)]
    pub rm_cols: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesConfig {
    pub data_dir:    String,
    pub archive_dir: String,
    /// Logical table → file-name regex.
    pub patterns:    BTreeMap<String, String>,
    #[serde(default)]
    pub preprocess:  BTreeMap<String, PreprocessRule>,
    #[serde(default = "default_csv_sep")]
    pub csv_sep:     char,
}

fn default_csv_sep() -> char {
    ';'
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone)]
pub struct EtlConfig {
    pub dwh:   DwhConfig,
    pub bank:  BankConfig,
    pub files: FilesConfig,
}

impl EtlConfig {
    /// Load `dwh.json`, `bank.json` and `files.json` from `config_dir`.
    pub fn load(config_dir: &str) -> anyhow::Result<Self> {
        let dwh_path = format!("{config_dir}/dwh.json");
        let dwh_content = std::fs::read_to_string(&dwh_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {dwh_path}: {e}"))?;
        let dwh: DwhConfig = serde_json::from_str(&dwh_content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {dwh_path}: {e}"))?;

        let bank_path = format!("{config_dir}/bank.json");
        let bank_content = std::fs::read_to_string(&bank_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {bank_path}: {e}"))?;
        let bank: BankConfig = serde_json::from_str(&bank_content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {bank_path}: {e}"))?;

        let files_path = format!("{config_dir}/files.json");
        let files_content = std::fs::read_to_string(&files_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {files_path}: {e}"))?;
        let files: FilesConfig = serde_json::from_str(&files_content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {files_path}: {e}"))?;

        let config = Self { dwh, bank, files };
        config.validate()?;
        Ok(config)
    }

    /// Reject names that could not be substituted into SQL safely.
    pub fn validate(&self) -> DwhResult<()> {
        self.dwh.tables.validate()?;
        for rule in self.dwh.scd2.values() {
            validate_mapping(&rule.mapping)?;
            validate_identifier(&rule.date_col)?;
            validate_identifier(&rule.stg_pk)?;
            validate_identifier(&rule.dim_pk)?;
        }
        for mapping in self.dwh.fact_mapping.values() {
            validate_mapping(mapping)?;
        }
        for table in self.bank.tables.values() {
            validate_identifier(table)?;
        }
        if !self.files.csv_sep.is_ascii() {
            return Err(DwhError::Other(anyhow::anyhow!(
                "csv_sep must be a single ASCII character, got {:?}",
                self.files.csv_sep
            )));
        }
        Ok(())
    }

    /// Config with hardcoded defaults for use in tests.
    pub fn default_test() -> Self {
        let tables = TableRegistry {
            dim: DimTables {
                accounts:  "dwh_dim_accounts_hist".into(),
                cards:     "dwh_dim_cards_hist".into(),
                clients:   "dwh_dim_clients_hist".into(),
                terminals: "dwh_dim_terminals_hist".into(),
            },
            fact: FactTables {
                blacklist:    "dwh_fact_passport_blacklist".into(),
                transactions: "dwh_fact_transactions".into(),
            },
            stg: StgTables {
                accounts:     "stg_accounts".into(),
                blacklist:    "stg_blacklist".into(),
                cards:        "stg_cards".into(),
                clients:      "stg_clients".into(),
                terminals:    "stg_terminals".into(),
                transactions: "stg_transactions".into(),
            },
            rep:  RepTables { fraud: "rep_fraud".into() },
            meta: MetaTables { meta: "meta_load".into() },
        };

        let mut scd2 = BTreeMap::new();
        scd2.insert(
            "accounts".to_string(),
            Scd2Rule {
                mapping: mapping(&[
                    ("account", "account_num"),
                    ("valid_to", "valid_to"),
                    ("client", "client"),
                ]),
                date_col: "update_dt".into(),
                stg_pk:   "account".into(),
                dim_pk:   "account_num".into(),
            },
        );
        scd2.insert(
            "cards".to_string(),
            Scd2Rule {
                mapping:  mapping(&[("card_num", "cards_num"), ("account", "account_num")]),
                date_col: "update_dt".into(),
                stg_pk:   "card_num".into(),
                dim_pk:   "cards_num".into(),
            },
        );
        scd2.insert(
            "clients".to_string(),
            Scd2Rule {
                mapping: mapping(&[
                    ("client_id", "client_id"),
                    ("last_name", "last_name"),
                    ("first_name", "first_name"),
                    ("patronymic", "patronymic"),
                    ("date_of_birth", "date_of_birth"),
                    ("passport_num", "passport_num"),
                    ("passport_valid_to", "passport_valid_to"),
                    ("phone", "phone"),
                ]),
                date_col: "update_dt".into(),
                stg_pk:   "client_id".into(),
                dim_pk:   "client_id".into(),
            },
        );
        scd2.insert(
            "terminals".to_string(),
            Scd2Rule {
                mapping: mapping(&[
                    ("terminal_id", "terminal_id"),
                    ("terminal_type", "terminal_type"),
                    ("terminal_city", "terminal_city"),
                    ("terminal_address", "terminal_address"),
                ]),
                date_col: "date".into(),
                stg_pk:   "terminal_id".into(),
                dim_pk:   "terminal_id".into(),
            },
        );

        let mut fact_mapping = BTreeMap::new();
        fact_mapping.insert(
            "transactions".to_string(),
            mapping(&[
                ("transaction_id", "trans_id"),
                ("transaction_date", "trans_date"),
                ("amount", "amt"),
                ("card_num", "card_num"),
                ("oper_type", "oper_type"),
                ("oper_result", "oper_result"),
                ("terminal", "terminal"),
            ]),
        );
        fact_mapping.insert(
            "blacklist".to_string(),
            mapping(&[("date", "entry_dt"), ("passport", "passport_num")]),
        );

        let mut bank_tables = BTreeMap::new();
        bank_tables.insert("accounts".to_string(), "accounts".to_string());
        bank_tables.insert("cards".to_string(), "cards".to_string());
        bank_tables.insert("clients".to_string(), "clients".to_string());

        let mut patterns = BTreeMap::new();
        patterns.insert("transactions".to_string(), r"transactions_(\d{2})(\d{2})(\d{4})\.txt".to_string());
        patterns.insert("terminals".to_string(), r"terminals_(\d{2})(\d{2})(\d{4})\.csv".to_string());
        patterns.insert("blacklist".to_string(), r"passport_blacklist_(\d{2})(\d{2})(\d{4})\.csv".to_string());

        let mut preprocess = BTreeMap::new();
        preprocess.insert(
            "transactions".to_string(),
            PreprocessRule {
                numeric_cols: vec!["amount".into()],
                add_cols: vec![],
                rm_cols: vec!["path".into()],
            },
        );
        preprocess.insert(
            "terminals".to_string(),
            PreprocessRule {
                numeric_cols: vec![],
                add_cols: vec!["date".into()],
                rm_cols: vec!["path".into()],
            },
        );
        preprocess.insert(
            "blacklist".to_string(),
            PreprocessRule {
                numeric_cols: vec![],
                add_cols: vec![],
                rm_cols: vec!["path".into()],
            },
        );

        Self {
            dwh: DwhConfig {
                tables,
                scd2,
                fact_mapping,
                skip_populated_dimensions: false,
            },
            bank: BankConfig { tables: bank_tables },
            files: FilesConfig {
                data_dir: "./data".into(),
                archive_dir: "./archive".into(),
                patterns,
                preprocess,
                csv_sep: ';',
            },
        }
    }
}

fn mapping(pairs: &[(&str, &str)]) -> ColumnMapping {
    pairs
        .iter()
        .map(|(s, d)| (s.to_string(), d.to_string()))
        .collect()
}

fn validate_mapping(mapping: &ColumnMapping) -> DwhResult<()> {
    for (src, dst) in mapping {
        validate_identifier(src)?;
        validate_identifier(dst)?;
    }
    Ok(())
}

//! Incoming file drops: discovery, parsing, preparation and archival.
//!
//! A file belongs to logical table `t` when its name matches `patterns[t]`
//! from the first character. The batch date is the first DDMMYYYY token in
//! its file name. Only delimited text files (`.txt`, `.csv`) are read;
//! matched files of any other format are neither read nor archived.

use crate::{
    config::{FilesConfig, PreprocessRule},
    error::{DwhError, DwhResult},
    run_log::RunLog,
    types::{date_to_sql, TableData},
};
use chrono::NaiveDate;
use regex::Regex;
use rusqlite::types::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Batch date → logical table → rows, dates ascending.
pub type IncomingBatches = BTreeMap<NaiveDate, BTreeMap<String, TableData>>;

pub const PATH_COLUMN: &str = "path";
pub const DATE_COLUMN: &str = "date";
pub const ARCHIVE_SUFFIX: &str = "backup";

/// First `DDMMYYYY` token in the file name of `text` as a date.
pub fn date_from_path(text: &str) -> DwhResult<NaiveDate> {
    let name = Path::new(text)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(text);
    let token = Regex::new(r"(\d{2})(\d{2})(\d{4})").map_err(anyhow::Error::from)?;
    let malformed = |reason: String| DwhError::MalformedSource {
        path: text.to_string(),
        reason,
    };
    let caps = token
        .captures(name)
        .ok_or_else(|| malformed("no DDMMYYYY date token".into()))?;
    let digits = format!("{}{}{}", &caps[1], &caps[2], &caps[3]);
    NaiveDate::parse_from_str(&digits, "%d%m%Y")
        .map_err(|e| malformed(format!("invalid date token '{digits}': {e}")))
}

/// Replace `,` by `.` and strip everything but digits and `.`.
pub fn clean_numeric(raw: &str) -> Value {
    let cleaned: String = raw
        .replace(',', ".")
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    if cleaned.is_empty() {
        return Value::Null;
    }
    match cleaned.parse::<f64>() {
        Ok(v) => Value::Real(v),
        Err(_) => Value::Text(cleaned),
    }
}

pub struct Ingestor<'a> {
    config: &'a FilesConfig,
    log:    RunLog,
}

impl<'a> Ingestor<'a> {
    pub fn new(config: &'a FilesConfig, log: RunLog) -> Self {
        Self { config, log }
    }

    fn compiled_patterns(&self) -> DwhResult<Vec<(String, Regex)>> {
        self.config
            .patterns
            .iter()
            .map(|(table, pattern)| {
                let re = Regex::new(&format!("^(?:{pattern})")).map_err(anyhow::Error::from)?;
                Ok((table.clone(), re))
            })
            .collect()
    }

    /// Files under `data_dir` per logical table, sorted by path.
    pub fn discover(&self) -> DwhResult<BTreeMap<String, Vec<PathBuf>>> {
        let patterns = self.compiled_patterns()?;
        let mut files = Vec::new();
        walk(Path::new(&self.config.data_dir), &mut files)?;
        files.sort();

        let mut out: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
        for path in files {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            for (table, re) in &patterns {
                if re.is_match(name) {
                    out.entry(table.clone()).or_default().push(path.clone());
                }
            }
        }
        Ok(out)
    }

    /// Read one delimited file; every row gets a `path` column.
    pub fn read_file(&self, path: &Path) -> DwhResult<TableData> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.config.csv_sep as u8)
            .has_headers(true)
            .trim(csv::Trim::Headers)
            .from_path(path)?;
        let columns: Vec<String> = reader.headers()?.iter().map(String::from).collect();
        let mut data = TableData::new(columns);
        for record in reader.records() {
            let record = record?;
            let row = record
                .iter()
                .map(|cell| {
                    if cell.is_empty() {
                        Value::Null
                    } else {
                        Value::Text(cell.to_string())
                    }
                })
                .collect();
            data.rows.push(row);
        }
        let path_str = path.to_string_lossy().to_string();
        let paths = vec![Value::Text(path_str); data.rows.len()];
        data.push_column(PATH_COLUMN, paths);
        Ok(data)
    }

    /// Discover and read every incoming file, grouped by batch date.
    pub fn read_incoming(&self) -> DwhResult<IncomingBatches> {
        let mut batches = IncomingBatches::new();
        for (table, paths) in self.discover()? {
            for path in paths {
                if !is_readable(&path) {
                    self.log.warn(format!(
                        "Unsupported file format, {} is left in place",
                        path.display()
                    ));
                    continue;
                }
                let date = date_from_path(&path.to_string_lossy())?;
                let data = self.read_file(&path)?;
                self.log.info(format!(
                    "Read {} rows for {table} ({date}) from {}",
                    data.len(),
                    path.display()
                ));
                let tables = batches.entry(date).or_default();
                match tables.get_mut(&table) {
                    Some(existing) => existing.extend(data),
                    None => {
                        tables.insert(table.clone(), data);
                    }
                }
            }
        }
        Ok(batches)
    }

    /// Apply per-table cleanup: numeric columns, added columns, removed columns.
    pub fn prepare(&self, batches: &mut IncomingBatches) -> DwhResult<()> {
        for tables in batches.values_mut() {
            for (table, data) in tables.iter_mut() {
                if let Some(rule) = self.config.preprocess.get(table) {
                    prepare_table(data, rule)?;
                }
            }
        }
        Ok(())
    }

    /// Move every matched file `read_incoming` consumes to
    /// `archive_dir/<name>.backup`. Unreadable formats stay in `data_dir`.
    pub fn archive(&self) -> DwhResult<Vec<PathBuf>> {
        let archive_dir = Path::new(&self.config.archive_dir);
        std::fs::create_dir_all(archive_dir)?;
        let mut moved = Vec::new();
        for paths in self.discover()?.into_values() {
            for src in paths {
                if !is_readable(&src) {
                    continue;
                }
                let Some(name) = src.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                let dest = archive_dir.join(format!("{name}.{ARCHIVE_SUFFIX}"));
                if std::fs::rename(&src, &dest).is_err() {
                    // Cross-device moves need copy + remove.
                    std::fs::copy(&src, &dest)?;
                    std::fs::remove_file(&src)?;
                }
                self.log.info(format!("Archived {} -> {}", src.display(), dest.display()));
                moved.push(dest);
            }
        }
        Ok(moved)
    }
}

/// Only delimited text files are parsed.
fn is_readable(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("txt") | Some("csv")
    )
}

fn prepare_table(data: &mut TableData, rule: &PreprocessRule) -> DwhResult<()> {
    for col in &rule.numeric_cols {
        if let Some(idx) = data.column_index(col) {
            for row in &mut data.rows {
                if let Value::Text(raw) = &row[idx] {
                    row[idx] = clean_numeric(raw);
                }
            }
        }
    }
    for col in &rule.add_cols {
        if col != DATE_COLUMN {
            continue;
        }
        let idx = data.column_index(PATH_COLUMN).ok_or_else(|| DwhError::MalformedSource {
            path: String::new(),
            reason: "column 'path' not found, date could not be extracted".into(),
        })?;
        let dates = data
            .rows
            .iter()
            .map(|row| match &row[idx] {
                Value::Text(p) => date_from_path(p).map(|d| Value::Text(date_to_sql(d))),
                _ => Ok(Value::Null),
            })
            .collect::<DwhResult<Vec<_>>>()?;
        data.drop_column(DATE_COLUMN);
        data.push_column(DATE_COLUMN, dates);
    }
    for col in &rule.rm_cols {
        data.drop_column(col);
    }
    Ok(())
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) -> DwhResult<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            walk(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

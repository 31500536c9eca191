//! Shared primitive types used across the warehouse loader.

use chrono::NaiveDate;
use rusqlite::types::Value;

/// The canonical run identifier.
pub type RunId = String;

/// `effective_from` for versions whose source date is absent.
pub const MIN_DATE: &str = "1900-01-01";

/// `effective_to` of every open dimension version.
pub const MAX_DATE: &str = "3000-01-01";

/// Storage format for dates.
pub const DATE_FMT: &str = "%Y-%m-%d";

/// Storage format for timestamps.
pub const DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

pub fn date_to_sql(date: NaiveDate) -> String {
    date.format(DATE_FMT).to_string()
}

/// A transient tabular buffer passed between pipeline steps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableData {
    pub columns: Vec<String>,
    pub rows:    Vec<Vec<Value>>,
}

impl TableData {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns, rows: Vec::new() }
    }

    /// Build from string literals. Used heavily by tests and fixtures.
    pub fn from_text(columns: &[&str], rows: &[&[Option<&str>]]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| {
                    r.iter()
                        .map(|v| match v {
                            Some(s) => Value::Text(s.to_string()),
                            None    => Value::Null,
                        })
                        .collect()
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Append a column; `values` must have one entry per row.
    pub fn push_column(&mut self, name: &str, values: Vec<Value>) {
        debug_assert_eq!(values.len(), self.rows.len());
        self.columns.push(name.to_string());
        for (row, v) in self.rows.iter_mut().zip(values) {
            row.push(v);
        }
    }

    pub fn drop_column(&mut self, name: &str) {
        if let Some(idx) = self.column_index(name) {
            self.columns.remove(idx);
            for row in &mut self.rows {
                row.remove(idx);
            }
        }
    }

    /// Concatenate rows of `other`. Columns are aligned by name; columns
    /// missing on either side are filled with NULL.
    pub fn extend(&mut self, other: TableData) {
        for col in &other.columns {
            if self.column_index(col).is_none() {
                let nulls = vec![Value::Null; self.rows.len()];
                self.push_column(col, nulls);
            }
        }
        let positions: Vec<Option<usize>> = self
            .columns
            .iter()
            .map(|c| other.column_index(c))
            .collect();
        for row in other.rows {
            let aligned = positions
                .iter()
                .map(|p| p.map(|i| row[i].clone()).unwrap_or(Value::Null))
                .collect();
            self.rows.push(aligned);
        }
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).map(|r| &r[idx])
    }
}

/// Parse a stored timestamp; a bare date means midnight.
pub fn parse_sql_datetime(raw: &str) -> Option<chrono::NaiveDateTime> {
    let raw = raw.trim();
    chrono::NaiveDateTime::parse_from_str(raw, DATETIME_FMT)
        .or_else(|_| chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, DATE_FMT)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

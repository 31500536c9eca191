//! Table registry: logical field name → physical table name.
//!
//! RULE: The registry is fixed once the pipeline is built.
//! Every table or column name that reaches SQL text passes through
//! `validate_identifier`, and every table name the warehouse store touches
//! must be registered here.

use crate::error::{DwhError, DwhResult};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableGroup {
    Dim,
    Fact,
    Stg,
    Rep,
    Meta,
}

impl TableGroup {
    pub const ALL: [TableGroup; 5] = [
        TableGroup::Dim,
        TableGroup::Fact,
        TableGroup::Stg,
        TableGroup::Rep,
        TableGroup::Meta,
    ];

    pub fn prefix(self) -> &'static str {
        match self {
            TableGroup::Dim  => "DIM",
            TableGroup::Fact => "FACT",
            TableGroup::Stg  => "STG",
            TableGroup::Rep  => "REP",
            TableGroup::Meta => "META",
        }
    }
}

impl fmt::Display for TableGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

// ── Groups ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DimTables {
    pub accounts:  String,
    pub cards:     String,
    pub clients:   String,
    pub terminals: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FactTables {
    pub blacklist:    String,
    pub transactions: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StgTables {
    pub accounts:     String,
    pub blacklist:    String,
    pub cards:        String,
    pub clients:      String,
    pub terminals:    String,
    pub transactions: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RepTables {
    pub fraud: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MetaTables {
    pub meta: String,
}

// ── Registry ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TableRegistry {
    #[serde(rename = "DIM")]
    pub dim:  DimTables,
    #[serde(rename = "FACT")]
    pub fact: FactTables,
    #[serde(rename = "STG")]
    pub stg:  StgTables,
    #[serde(rename = "REP")]
    pub rep:  RepTables,
    #[serde(rename = "META")]
    pub meta: MetaTables,
}

impl TableRegistry {
    /// Field → table pairs of one group, in field-name order.
    pub fn fields(&self, group: TableGroup) -> Vec<(&'static str, &str)> {
        match group {
            TableGroup::Dim => vec![
                ("accounts", self.dim.accounts.as_str()),
                ("cards", self.dim.cards.as_str()),
                ("clients", self.dim.clients.as_str()),
                ("terminals", self.dim.terminals.as_str()),
            ],
            TableGroup::Fact => vec![
                ("blacklist", self.fact.blacklist.as_str()),
                ("transactions", self.fact.transactions.as_str()),
            ],
            TableGroup::Stg => vec![
                ("accounts", self.stg.accounts.as_str()),
                ("blacklist", self.stg.blacklist.as_str()),
                ("cards", self.stg.cards.as_str()),
                ("clients", self.stg.clients.as_str()),
                ("terminals", self.stg.terminals.as_str()),
                ("transactions", self.stg.transactions.as_str()),
            ],
            TableGroup::Rep  => vec![("fraud", self.rep.fraud.as_str())],
            TableGroup::Meta => vec![("meta", self.meta.meta.as_str())],
        }
    }

    /// Absent-value lookup. Callers that tolerate unmapped fields use this.
    pub fn resolve(&self, group: TableGroup, field: &str) -> Option<&str> {
        self.fields(group)
            .into_iter()
            .find(|(name, _)| *name == field)
            .map(|(_, table)| table)
    }

    /// Hard-failure lookup.
    pub fn require(&self, group: TableGroup, field: &str) -> DwhResult<&str> {
        self.resolve(group, field).ok_or_else(|| DwhError::UnknownField {
            group: group.to_string(),
            field: field.to_string(),
        })
    }

    pub fn meta_table(&self) -> &str {
        &self.meta.meta
    }

    pub fn is_registered(&self, table: &str) -> bool {
        TableGroup::ALL
            .iter()
            .any(|g| self.fields(*g).iter().any(|(_, t)| *t == table))
    }

    /// Every physical name must be a plain SQL identifier. The DDL template
    /// derives index names from table names, so `schema.` prefixes are refused.
    pub fn validate(&self) -> DwhResult<()> {
        for group in TableGroup::ALL {
            for (_, table) in self.fields(group) {
                if table.contains('.') {
                    return Err(DwhError::InvalidIdentifier(table.to_string()));
                }
                validate_identifier(table)?;
            }
        }
        Ok(())
    }

    /// DDL template placeholder → physical name, e.g. `DIM_cards` or `META`.
    pub fn placeholders(&self) -> Vec<(String, &str)> {
        let mut out = Vec::new();
        for group in TableGroup::ALL {
            for (field, table) in self.fields(group) {
                let key = match group {
                    TableGroup::Meta => group.prefix().to_string(),
                    _ => format!("{}_{}", group.prefix(), field),
                };
                out.push((key, table));
            }
        }
        out
    }
}

/// Accepts `name` or `schema.name`, each part `[A-Za-z_][A-Za-z0-9_]*`.
pub fn validate_identifier(name: &str) -> DwhResult<&str> {
    let parts: Vec<&str> = name.split('.').collect();
    let valid_part = |p: &str| {
        let mut chars = p.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            }
            _ => false,
        }
    };
    if parts.len() <= 2 && parts.iter().all(|p| valid_part(p)) {
        Ok(name)
    } else {
        Err(DwhError::InvalidIdentifier(name.to_string()))
    }
}

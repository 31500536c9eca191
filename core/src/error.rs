use thiserror::Error;

#[derive(Error, Debug)]
pub enum DwhError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("No table name for field '{field}' registered in {group} tables")]
    UnknownField { group: String, field: String },

    #[error("Invalid SQL identifier: '{0}'")]
    InvalidIdentifier(String),

    #[error("Table '{0}' is not registered")]
    UnregisteredTable(String),

    #[error("Malformed source '{path}': {reason}")]
    MalformedSource { path: String, reason: String },

    #[error("DDL template error: {0}")]
    Template(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type DwhResult<T> = Result<T, DwhError>;

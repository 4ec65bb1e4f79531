//! Error taxonomy surfaced to callers of the inventory façade.

use std::time::Duration;
use thiserror::Error;

/// Errors returned by schema, row, sync, auth and agent operations.
#[derive(Error, Debug)]
pub enum InventoryError {
    #[error("column `{0}` already exists")]
    DuplicateColumn(String),

    #[error("column `{0}` not found")]
    ColumnNotFound(String),

    #[error("invalid column name `{0}`")]
    InvalidColumnName(String),

    #[error("category `{0}` already exists")]
    DuplicateCategory(String),

    #[error("category `{0}` not found")]
    CategoryNotFound(String),

    #[error("row `{0}` not found")]
    RowNotFound(String),

    #[error("invalid value for `{column}`: {reason}")]
    Validation { column: String, reason: String },

    /// The schema committed but the row rewrite did not, even after retries.
    /// The change is partially applied and stays journaled until replayed.
    #[error("schema change `{change}` committed but rows not rewritten after {attempts} attempts: {source:#}")]
    Sync {
        change: String,
        attempts: u32,
        source: anyhow::Error,
    },

    #[error("agent request failed: {0}")]
    Agent(String),

    #[error("agent did not answer within {0:?}")]
    AgentTimeout(Duration),

    #[error("user `{0}` already exists")]
    UserExists(String),

    #[error("invalid username or password")]
    InvalidCredentials,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl InventoryError {
    pub(crate) fn validation(column: impl Into<String>, reason: impl Into<String>) -> Self {
        InventoryError::Validation {
            column: column.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, InventoryError>;

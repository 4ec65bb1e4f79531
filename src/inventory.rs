//! Entry point for callers: item CRUD plus column and category management.

use std::{fs, time::Duration};

use anyhow::Context;
use tracing::info;

use crate::agent::{self, Agent, TableSnapshot};
use crate::config::Config;
use crate::error::{InventoryError, Result};
use crate::rows::{Row, Values};
use crate::schema::{Category, ColumnDef, ColumnType};
use crate::sync::{Journal, Synchronizer};

/// Item and column operations over one data directory.
///
/// Schema changes go to the [`Synchronizer`]; row changes are validated
/// against the schema as it stands under the same lock.
pub struct Inventory {
    sync: Synchronizer,
}

impl Inventory {
    pub fn open(cfg: &Config) -> Result<Self> {
        fs::create_dir_all(&cfg.data_dir)
            .with_context(|| format!("creating data directory {:?}", cfg.data_dir))?;
        let sync = Synchronizer::open(
            cfg.schema_path(),
            cfg.categories_path(),
            cfg.row_format.open(&cfg.data_dir),
            Journal::new(cfg.journal_path()),
            cfg.retry_policy(),
        )?;
        info!(data_dir = %cfg.data_dir.display(), format = %cfg.row_format, "inventory ready");
        Ok(Self { sync })
    }

    pub fn list_columns(&self) -> Vec<ColumnDef> {
        self.sync.read(|t| t.columns().to_vec())
    }

    pub fn list_items(&self) -> Vec<Row> {
        self.sync.read(|t| t.rows.list_rows().to_vec())
    }

    pub fn get_item(&self, id: &str) -> Option<Row> {
        self.sync.read(|t| t.rows.get(id).cloned())
    }

    pub fn add_item(&self, values: Values) -> Result<Row> {
        self.sync.write_rows(|columns, rows| rows.insert_row(columns, values))
    }

    /// Add an item under `category`; only that category's columns may be set.
    pub fn add_item_in(&self, category: &str, values: Values) -> Result<Row> {
        self.sync.write_tables(|t| {
            let cat = t
                .categories
                .get(category)
                .ok_or_else(|| InventoryError::CategoryNotFound(category.to_string()))?;
            t.rows
                .insert_row_in(t.schema.list_columns(), Some(cat), values)
        })
    }

    pub fn update_item(&self, id: &str, values: Values) -> Result<Row> {
        self.sync.write_rows(|columns, rows| rows.update_row(columns, id, values))
    }

    pub fn delete_item(&self, id: &str) -> Result<Row> {
        self.sync.write_rows(|columns, rows| rows.delete_row(columns, id))
    }

    pub fn add_column(&self, name: &str, ty: ColumnType) -> Result<()> {
        self.sync.add_column(ColumnDef::new(name, ty))
    }

    /// Add a dropdown column restricted to `options`.
    pub fn add_dropdown_column(&self, name: &str, options: Vec<String>) -> Result<()> {
        self.sync
            .add_column(ColumnDef::new(name, ColumnType::Dropdown).with_options(options))
    }

    pub fn rename_column(&self, old_name: &str, new_name: &str) -> Result<()> {
        self.sync.rename_column(old_name, new_name)
    }

    pub fn retype_column(&self, name: &str, ty: ColumnType) -> Result<()> {
        self.sync.retype_column(name, ty)
    }

    pub fn set_column_options(&self, name: &str, options: Vec<String>) -> Result<()> {
        self.sync.set_column_options(name, options)
    }

    pub fn delete_column(&self, name: &str) -> Result<()> {
        self.sync.delete_column(name)
    }

    pub fn list_categories(&self) -> Vec<Category> {
        self.sync.read(|t| t.categories.list().to_vec())
    }

    pub fn add_category(&self, name: &str, columns: Vec<String>) -> Result<()> {
        self.sync
            .write_tables(|t| t.categories.add(name, columns, t.schema.list_columns()))
    }

    pub fn snapshot(&self) -> TableSnapshot {
        self.sync.read(|t| TableSnapshot::capture(t.columns(), t.rows.list_rows()))
    }

    /// Ask `agent` about the current table. The lock is released before the
    /// request is sent.
    pub async fn ask<A: Agent>(&self, agent: &A, question: &str, limit: Duration) -> Result<String> {
        let snapshot = self.snapshot();
        agent::ask(agent, &snapshot, question, limit).await
    }
}

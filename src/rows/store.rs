use anyhow::Context;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, warn};
use uuid::Uuid;

use super::format::RowFile;
use super::types::{Row, Values};
use crate::error::{InventoryError, Result};
use crate::schema::{is_reserved, Category, ColumnDef};

/// Rows in insertion order, mirrored to a [`RowFile`].
///
/// Every mutation works on a copy, persists it, and only then replaces the
/// in-memory rows; a failed write leaves the store as it was.
pub struct RowStore {
    file: Box<dyn RowFile>,
    rows: Vec<Row>,
}

impl RowStore {
    /// Load rows exactly as stored. Callers decide when to [`normalize`](Self::normalize).
    pub fn load(file: Box<dyn RowFile>, columns: &[ColumnDef]) -> anyhow::Result<Self> {
        let rows = file
            .load(columns)
            .with_context(|| format!("loading rows from {:?}", file.path()))?;
        Ok(Self { file, rows })
    }

    /// Load and align every row with `columns` in memory.
    pub fn open(file: Box<dyn RowFile>, columns: &[ColumnDef]) -> anyhow::Result<Self> {
        let mut store = Self::load(file, columns)?;
        store.normalize(columns);
        Ok(store)
    }

    pub fn list_rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn get(&self, id: &str) -> Option<&Row> {
        self.rows.iter().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Back-fill missing declared columns with their defaults and drop keys
    /// no longer declared. Memory only; returns whether anything changed.
    pub fn normalize(&mut self, columns: &[ColumnDef]) -> bool {
        let mut changed = false;
        for row in &mut self.rows {
            changed |= align(row, columns);
        }
        changed
    }

    /// Validate `values` against `columns` and append a new row with a fresh id.
    pub fn insert_row(&mut self, columns: &[ColumnDef], values: Values) -> Result<Row> {
        self.insert_row_in(columns, None, values)
    }

    /// As [`insert_row`](Self::insert_row), but tagged with `category` and
    /// limited to the columns it lists. Other declared columns get defaults.
    pub fn insert_row_in(
        &mut self,
        columns: &[ColumnDef],
        category: Option<&Category>,
        values: Values,
    ) -> Result<Row> {
        if let Some(cat) = category {
            if let Some(name) = values.keys().find(|k| !cat.contains(k.as_str())) {
                return Err(InventoryError::validation(
                    name,
                    format!("not a column of category `{}`", cat.name),
                ));
            }
        }
        let mut coerced = validate(columns, values)?;
        for col in columns {
            coerced
                .entry(col.name.clone())
                .or_insert_with(|| col.ty.default_value());
        }

        let mut row = Row::new(self.fresh_id(), coerced);
        if let Some(cat) = category {
            row.category = cat.name.clone();
        }
        let mut next = self.rows.clone();
        next.push(row.clone());
        self.commit(columns, next)?;
        debug!(id = %row.id, "row inserted");
        Ok(row)
    }

    /// Change only the supplied keys of row `id`.
    pub fn update_row(&mut self, columns: &[ColumnDef], id: &str, values: Values) -> Result<Row> {
        let idx = self.position(id)?;
        let coerced = validate(columns, values)?;

        let mut next = self.rows.clone();
        next[idx].values.extend(coerced);
        let row = next[idx].clone();
        self.commit(columns, next)?;
        debug!(id = %id, "row updated");
        Ok(row)
    }

    pub fn delete_row(&mut self, columns: &[ColumnDef], id: &str) -> Result<Row> {
        let idx = self.position(id)?;
        let mut next = self.rows.clone();
        let removed = next.remove(idx);
        self.commit(columns, next)?;
        debug!(id = %id, "row deleted");
        Ok(removed)
    }

    /// Apply `f` to a copy of every row, align the result with `columns`,
    /// persist it, then make it current.
    pub fn rewrite<F>(&mut self, columns: &[ColumnDef], f: F) -> anyhow::Result<()>
    where
        F: Fn(&mut Row),
    {
        let mut next = self.rows.clone();
        for row in &mut next {
            f(row);
            align(row, columns);
        }
        self.file
            .save(columns, &next)
            .with_context(|| format!("rewriting rows in {:?}", self.file.path()))?;
        self.rows = next;
        Ok(())
    }

    /// Apply `f` and align with `columns` in memory only. Used when the
    /// file could not be rewritten, so readers and later saves see rows that
    /// match the committed schema while the journal still holds the change.
    pub fn stage<F>(&mut self, columns: &[ColumnDef], f: F)
    where
        F: Fn(&mut Row),
    {
        for row in &mut self.rows {
            f(row);
            align(row, columns);
        }
    }

    fn commit(&mut self, columns: &[ColumnDef], next: Vec<Row>) -> Result<()> {
        self.file
            .save(columns, &next)
            .with_context(|| format!("saving rows to {:?}", self.file.path()))?;
        self.rows = next;
        Ok(())
    }

    fn position(&self, id: &str) -> Result<usize> {
        self.rows
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| InventoryError::RowNotFound(id.to_string()))
    }

    fn fresh_id(&self) -> String {
        let taken: HashSet<&str> = self.rows.iter().map(|r| r.id.as_str()).collect();
        loop {
            let id = Uuid::new_v4().simple().to_string();
            if !taken.contains(id.as_str()) {
                return id;
            }
        }
    }
}

/// Coerce every supplied value to its declared column type.
pub fn validate(columns: &[ColumnDef], values: Values) -> Result<Values> {
    let mut out = Values::new();
    for (name, raw) in values {
        if is_reserved(&name) {
            return Err(InventoryError::validation(name, "system field, set by the store"));
        }
        let col = columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| InventoryError::validation(&name, "no such column"))?;
        let value = col
            .coerce(&raw)
            .map_err(|reason| InventoryError::validation(&name, reason))?;
        out.insert(name, value);
    }
    Ok(out)
}

fn align(row: &mut Row, columns: &[ColumnDef]) -> bool {
    let mut changed = false;
    let before = row.values.len();
    row.values.retain(|k, _| columns.iter().any(|c| &c.name == k));
    if row.values.len() != before {
        warn!(id = %row.id, dropped = before - row.values.len(), "purged undeclared values");
        changed = true;
    }
    for col in columns {
        if !row.values.contains_key(&col.name) {
            row.values.insert(col.name.clone(), col.ty.default_value());
            changed = true;
        }
    }
    changed
}

/// Value of `column` in `row`, or `null` when absent.
pub fn value_or_null<'a>(row: &'a Row, column: &str) -> &'a Value {
    static NULL: Value = Value::Null;
    row.values.get(column).unwrap_or(&NULL)
}

use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::types::{is_reserved, ColumnDef, ColumnType};
use super::write::{read_columns, write_columns};
use crate::error::{InventoryError, Result};

/// A structural or metadata change to the declared columns.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaEdit {
    Add(ColumnDef),
    Rename { from: String, to: String },
    Retype { name: String, ty: ColumnType },
    SetOptions { name: String, options: Vec<String> },
    Delete(String),
}

/// Ordered list of declared columns, mirrored to a JSON file.
///
/// The in-memory list is only replaced after the file write succeeded, so a
/// failed mutation leaves memory and disk agreeing on the previous schema.
pub struct SchemaStore {
    path: PathBuf,
    columns: Vec<ColumnDef>,
}

impl SchemaStore {
    /// Load `path` if it exists; otherwise start with no columns.
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let columns =
            read_columns(&path).with_context(|| format!("loading schema from {:?}", path))?;
        debug!(path = %path.display(), columns = columns.len(), "schema loaded");
        Ok(Self { path, columns })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn list_columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Validate `edit` against the current columns and return the list that
    /// committing it would produce. Does not touch disk.
    pub fn plan(&self, edit: &SchemaEdit) -> Result<Vec<ColumnDef>> {
        let mut next = self.columns.clone();
        match edit {
            SchemaEdit::Add(def) => {
                self.check_free_name(&def.name)?;
                next.push(def.clone());
            }
            SchemaEdit::Rename { from, to } => {
                let idx = self.position(from)?;
                if from != to {
                    self.check_free_name(to)?;
                    next[idx].name = to.clone();
                }
            }
            SchemaEdit::Retype { name, ty } => {
                let idx = self.position(name)?;
                next[idx].ty = *ty;
            }
            SchemaEdit::SetOptions { name, options } => {
                let idx = self.position(name)?;
                next[idx].options = options.clone();
            }
            SchemaEdit::Delete(name) => {
                let idx = self.position(name)?;
                next.remove(idx);
            }
        }
        Ok(next)
    }

    /// Durably write `next` and make it the current schema.
    pub fn commit(&mut self, next: Vec<ColumnDef>) -> Result<()> {
        write_columns(&self.path, &next)
            .with_context(|| format!("writing schema to {:?}", self.path))?;
        info!(path = %self.path.display(), columns = next.len(), "schema committed");
        self.columns = next;
        Ok(())
    }

    pub fn apply(&mut self, edit: &SchemaEdit) -> Result<()> {
        let next = self.plan(edit)?;
        self.commit(next)
    }

    pub fn add_column(&mut self, name: &str, ty: ColumnType) -> Result<()> {
        self.apply(&SchemaEdit::Add(ColumnDef::new(name, ty)))
    }

    pub fn rename_column(&mut self, old_name: &str, new_name: &str) -> Result<()> {
        self.apply(&SchemaEdit::Rename {
            from: old_name.to_string(),
            to: new_name.to_string(),
        })
    }

    pub fn retype_column(&mut self, name: &str, ty: ColumnType) -> Result<()> {
        self.apply(&SchemaEdit::Retype {
            name: name.to_string(),
            ty,
        })
    }

    pub fn set_column_options(&mut self, name: &str, options: Vec<String>) -> Result<()> {
        self.apply(&SchemaEdit::SetOptions {
            name: name.to_string(),
            options,
        })
    }

    pub fn delete_column(&mut self, name: &str) -> Result<()> {
        self.apply(&SchemaEdit::Delete(name.to_string()))
    }

    fn position(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| InventoryError::ColumnNotFound(name.to_string()))
    }

    fn check_free_name(&self, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(InventoryError::InvalidColumnName(name.to_string()));
        }
        if is_reserved(name) || self.column(name).is_some() {
            return Err(InventoryError::DuplicateColumn(name.to_string()));
        }
        Ok(())
    }
}

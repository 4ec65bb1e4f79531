use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    fs, io,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

use super::types::ColumnDef;
use crate::error::{InventoryError, Result};
use crate::persist::write_atomic;

/// A named group of declared columns. Items added under a category may only
/// fill that category's columns.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Category {
    pub name: String,
    pub columns: Vec<String>,
}

impl Category {
    pub fn contains(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }
}

/// Categories in creation order, mirrored to `category.json`.
pub struct CategoryStore {
    path: PathBuf,
    categories: Vec<Category>,
}

impl CategoryStore {
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let categories = match fs::File::open(&path) {
            Ok(f) => serde_json::from_reader(io::BufReader::new(f))
                .with_context(|| format!("parsing {:?}", path))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e).with_context(|| format!("opening {:?}", path)),
        };
        debug!(path = %path.display(), categories = categories.len(), "categories loaded");
        Ok(Self { path, categories })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn list(&self) -> &[Category] {
        &self.categories
    }

    pub fn get(&self, name: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.name == name)
    }

    /// Register `name` over `columns`, each of which must be declared.
    pub fn add(&mut self, name: &str, columns: Vec<String>, declared: &[ColumnDef]) -> Result<()> {
        if name.trim().is_empty() {
            return Err(InventoryError::validation("category", "name must not be empty"));
        }
        if self.get(name).is_some() {
            return Err(InventoryError::DuplicateCategory(name.to_string()));
        }
        let mut seen = HashSet::new();
        for col in &columns {
            if !declared.iter().any(|d| &d.name == col) {
                return Err(InventoryError::ColumnNotFound(col.clone()));
            }
            if !seen.insert(col.as_str()) {
                return Err(InventoryError::validation(col, "listed twice"));
            }
        }

        let mut next = self.categories.clone();
        next.push(Category {
            name: name.to_string(),
            columns,
        });
        self.commit(next)?;
        info!(category = name, "category added");
        Ok(())
    }

    /// Point every category at the new column name. No-op when nothing
    /// refers to `from`.
    pub fn rename_column(&mut self, from: &str, to: &str) -> anyhow::Result<()> {
        if !self.categories.iter().any(|c| c.contains(from)) {
            return Ok(());
        }
        let mut next = self.categories.clone();
        for cat in &mut next {
            for col in &mut cat.columns {
                if col == from {
                    *col = to.to_string();
                }
            }
        }
        self.commit(next)
    }

    /// Drop `name` from every category that lists it.
    pub fn remove_column(&mut self, name: &str) -> anyhow::Result<()> {
        if !self.categories.iter().any(|c| c.contains(name)) {
            return Ok(());
        }
        let mut next = self.categories.clone();
        for cat in &mut next {
            cat.columns.retain(|c| c != name);
        }
        self.commit(next)
    }

    fn commit(&mut self, next: Vec<Category>) -> anyhow::Result<()> {
        write_atomic(&self.path, |w| {
            serde_json::to_writer_pretty(&mut *w, &next).context("serializing categories")?;
            w.write_all(b"\n")?;
            Ok(())
        })
        .with_context(|| format!("writing categories to {:?}", self.path))?;
        self.categories = next;
        Ok(())
    }
}

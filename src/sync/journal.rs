use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    fmt, fs,
    io,
    path::{Path, PathBuf},
};

use crate::persist::{remove_if_exists, write_atomic};
use crate::rows::Row;
use crate::schema::ColumnDef;

/// A column-structural change that has to be mirrored into every row.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StructuralChange {
    Added { name: String, default: Value },
    Renamed { from: String, to: String },
    Removed { name: String },
}

impl StructuralChange {
    /// Mirror the change into one row. Applying it twice is the same as once.
    pub fn apply(&self, row: &mut Row) {
        match self {
            StructuralChange::Added { name, default } => {
                row.values
                    .entry(name.clone())
                    .or_insert_with(|| default.clone());
            }
            StructuralChange::Renamed { from, to } => {
                if let Some(v) = row.values.remove(from) {
                    row.values.insert(to.clone(), v);
                }
            }
            StructuralChange::Removed { name } => {
                row.values.remove(name);
            }
        }
    }

    /// Whether `columns` already reflects this change, i.e. the schema half
    /// was committed and only the rows may be behind.
    pub fn committed_in(&self, columns: &[ColumnDef]) -> bool {
        let has = |n: &str| columns.iter().any(|c| c.name == n);
        match self {
            StructuralChange::Added { name, .. } => has(name),
            StructuralChange::Renamed { from, to } => has(to) && !has(from),
            StructuralChange::Removed { name } => !has(name),
        }
    }
}

impl fmt::Display for StructuralChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructuralChange::Added { name, .. } => write!(f, "add `{}`", name),
            StructuralChange::Renamed { from, to } => write!(f, "rename `{}` -> `{}`", from, to),
            StructuralChange::Removed { name } => write!(f, "delete `{}`", name),
        }
    }
}

/// Single-slot record of the structural change in flight.
///
/// Written before the schema commit and removed once the rows caught up, so
/// a crash or exhausted retry in between can be finished later.
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pending(&self) -> Result<Option<StructuralChange>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("reading {:?}", self.path)),
        };
        let change = serde_json::from_str(&text)
            .with_context(|| format!("parsing sync journal {:?}", self.path))?;
        Ok(Some(change))
    }

    pub fn record(&self, change: &StructuralChange) -> Result<()> {
        write_atomic(&self.path, |w| {
            serde_json::to_writer(&mut *w, change).context("serializing sync journal")?;
            w.write_all(b"\n")?;
            Ok(())
        })
    }

    pub fn clear(&self) -> Result<()> {
        remove_if_exists(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rows::Values;
    use crate::schema::ColumnType;
    use serde_json::json;
    use tempfile::tempdir;

    fn row() -> Row {
        Row::new("r", Values::from([("a".to_string(), json!(1.5))]))
    }

    #[test]
    fn test_apply_is_idempotent() {
        let changes = [
            StructuralChange::Added {
                name: "b".into(),
                default: json!(""),
            },
            StructuralChange::Renamed {
                from: "a".into(),
                to: "c".into(),
            },
            StructuralChange::Removed { name: "c".into() },
        ];
        for change in changes {
            let mut once = row();
            change.apply(&mut once);
            let mut twice = once.clone();
            change.apply(&mut twice);
            assert_eq!(once, twice, "{change}");
        }
    }

    #[test]
    fn test_rename_moves_value() {
        let mut r = row();
        StructuralChange::Renamed {
            from: "a".into(),
            to: "b".into(),
        }
        .apply(&mut r);
        assert_eq!(r.values.get("a"), None);
        assert_eq!(r.values.get("b"), Some(&json!(1.5)));
    }

    #[test]
    fn test_committed_in() {
        let cols = vec![ColumnDef::new("b", ColumnType::Text)];
        let rename = StructuralChange::Renamed {
            from: "a".into(),
            to: "b".into(),
        };
        assert!(rename.committed_in(&cols));
        assert!(!rename.committed_in(&[ColumnDef::new("a", ColumnType::Text)]));
        assert!(StructuralChange::Removed { name: "a".into() }.committed_in(&cols));
    }

    #[test]
    fn test_record_pending_clear() {
        let tmp = tempdir().unwrap();
        let journal = Journal::new(tmp.path().join(".sync_journal.json"));
        assert_eq!(journal.pending().unwrap(), None);

        let change = StructuralChange::Removed { name: "x".into() };
        journal.record(&change).unwrap();
        assert_eq!(journal.pending().unwrap(), Some(change));

        journal.clear().unwrap();
        assert_eq!(journal.pending().unwrap(), None);
        journal.clear().unwrap();
    }
}

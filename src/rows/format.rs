//! On-disk encodings for the row store.

use anyhow::{anyhow, Context, Result};
use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    fmt, fs,
    io::{self, BufReader},
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

use super::types::{Row, Values};
use crate::persist::write_atomic;
use crate::schema::{encode_cell, ColumnDef, ColumnType, CATEGORY_FIELD, ID_COLUMN};

/// Which encoding a data directory uses for its rows.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum RowFormat {
    #[default]
    Csv,
    Json,
}

impl RowFormat {
    pub fn file_name(&self) -> &'static str {
        match self {
            RowFormat::Csv => "inventory.csv",
            RowFormat::Json => "inventory.json",
        }
    }

    /// Build the matching backend for a file inside `dir`.
    pub fn open(&self, dir: &Path) -> Box<dyn RowFile> {
        let path = dir.join(self.file_name());
        match self {
            RowFormat::Csv => Box::new(CsvRowFile::new(path)),
            RowFormat::Json => Box::new(JsonRowFile::new(path)),
        }
    }
}

impl fmt::Display for RowFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RowFormat::Csv => "csv",
            RowFormat::Json => "json",
        })
    }
}

impl FromStr for RowFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Ok(RowFormat::Csv),
            "json" => Ok(RowFormat::Json),
            other => Err(anyhow!("unknown row format `{}` (expected csv or json)", other)),
        }
    }
}

/// Whole-file persistence for rows.
///
/// `load` returns rows as stored, without aligning them to `columns`; the
/// declared columns are only used to decode typed cells. `save` replaces the
/// file atomically.
pub trait RowFile: Send + Sync {
    fn path(&self) -> &Path;
    fn load(&self, columns: &[ColumnDef]) -> Result<Vec<Row>>;
    fn save(&self, columns: &[ColumnDef], rows: &[Row]) -> Result<()>;
}

/// `ID#`, then `Category` when any item has one, then one column per
/// declared column in schema order.
pub struct CsvRowFile {
    path: PathBuf,
}

impl CsvRowFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RowFile for CsvRowFile {
    fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self, columns: &[ColumnDef]) -> Result<Vec<Row>> {
        let file = match fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("opening {:?}", self.path)),
        };
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .from_reader(BufReader::new(file));

        let headers = rdr
            .headers()
            .with_context(|| format!("reading header of {:?}", self.path))?
            .clone();
        if headers.is_empty() {
            return Ok(Vec::new());
        }
        let id_idx = headers
            .iter()
            .position(|h| h == ID_COLUMN)
            .ok_or_else(|| anyhow!("{:?} has no `{}` column", self.path, ID_COLUMN))?;
        let category_idx = headers.iter().position(|h| h == CATEGORY_FIELD);

        // header position → decoder; undeclared headers are kept as text
        let decoders: Vec<ColumnType> = headers
            .iter()
            .map(|h| {
                columns
                    .iter()
                    .find(|c| c.name == h)
                    .map(|c| c.ty)
                    .unwrap_or(ColumnType::Text)
            })
            .collect();

        let mut rows = Vec::new();
        for (line, record) in rdr.records().enumerate() {
            let record =
                record.with_context(|| format!("parsing {:?} record {}", self.path, line + 1))?;
            let mut row = Row::new(String::new(), Values::new());
            for (i, cell) in record.iter().enumerate() {
                if i == id_idx {
                    row.id = cell.to_string();
                } else if Some(i) == category_idx {
                    row.category = cell.to_string();
                } else if let Some(name) = headers.get(i) {
                    row.values
                        .insert(name.to_string(), decoders[i].decode_cell(cell));
                }
            }
            rows.push(row);
        }
        debug!(path = %self.path.display(), rows = rows.len(), "loaded csv rows");
        Ok(rows)
    }

    fn save(&self, columns: &[ColumnDef], rows: &[Row]) -> Result<()> {
        write_atomic(&self.path, |w| {
            let categorized = rows.iter().any(|r| !r.category.is_empty());
            let mut wtr = WriterBuilder::new().from_writer(w);
            let header = std::iter::once(ID_COLUMN)
                .chain(categorized.then_some(CATEGORY_FIELD))
                .chain(columns.iter().map(|c| c.name.as_str()));
            wtr.write_record(header)?;
            for row in rows {
                let cells = std::iter::once(row.id.clone())
                    .chain(categorized.then(|| row.category.clone()))
                    .chain(columns.iter().map(|c| {
                        row.values
                            .get(&c.name)
                            .map(encode_cell)
                            .unwrap_or_default()
                    }));
                wtr.write_record(cells)?;
            }
            wtr.flush()?;
            Ok(())
        })
    }
}

/// JSON array of objects, one `"ID#"` key per object.
pub struct JsonRowFile {
    path: PathBuf,
}

impl JsonRowFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RowFile for JsonRowFile {
    fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self, _columns: &[ColumnDef]) -> Result<Vec<Row>> {
        let file = match fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("opening {:?}", self.path)),
        };
        let rows: Vec<Row> = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing {:?}", self.path))?;
        debug!(path = %self.path.display(), rows = rows.len(), "loaded json rows");
        Ok(rows)
    }

    fn save(&self, columns: &[ColumnDef], rows: &[Row]) -> Result<()> {
        // only declared columns are written
        let trimmed: Vec<Row> = rows
            .iter()
            .map(|r| Row {
                id: r.id.clone(),
                category: r.category.clone(),
                values: columns
                    .iter()
                    .map(|c| {
                        let v = r.values.get(&c.name).cloned().unwrap_or(Value::Null);
                        (c.name.clone(), v)
                    })
                    .collect(),
            })
            .collect();
        write_atomic(&self.path, |w| {
            serde_json::to_writer_pretty(&mut *w, &trimmed).context("serializing rows")?;
            w.write_all(b"\n")?;
            Ok(())
        })
    }
}

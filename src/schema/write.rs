use anyhow::{Context, Result};
use std::{
    fs,
    io,
    path::Path,
};

use super::ColumnDef;
use crate::persist::write_atomic;

/// Write the full ordered column list to `path` as pretty JSON.
///
/// Goes through a temp file in the same directory and a rename, so readers
/// only ever see the old or the new list.
pub fn write_columns(path: &Path, columns: &[ColumnDef]) -> Result<()> {
    write_atomic(path, |w| {
        serde_json::to_writer_pretty(&mut *w, columns).context("serializing columns")?;
        w.write_all(b"\n")?;
        Ok(())
    })
}

/// Read the ordered column list from `path`; a missing file is an empty schema.
pub fn read_columns(path: &Path) -> Result<Vec<ColumnDef>> {
    let f = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("opening {:?}", path)),
    };
    serde_json::from_reader(io::BufReader::new(f)).with_context(|| format!("parsing {:?}", path))
}

use anyhow::{Context, Result};
use std::{
    fs,
    io::{BufWriter, Write},
    path::Path,
};
use tempfile::NamedTempFile;

/// Write `path` atomically: `fill` writes into a temp file in the same
/// directory, which is flushed, fsynced and renamed over `path`.
///
/// If `fill` or any step fails the temp file is dropped (and removed) and
/// `path` keeps its previous contents.
pub fn write_atomic<F>(path: &Path, fill: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> Result<()>,
{
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).with_context(|| format!("creating directory {:?}", dir))?;

    let tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("creating temp file in {:?}", dir))?;
    let mut writer = BufWriter::new(tmp);
    fill(&mut writer).with_context(|| format!("writing {:?}", path))?;
    writer
        .flush()
        .with_context(|| format!("flushing {:?}", path))?;

    let tmp = writer
        .into_inner()
        .map_err(|e| e.into_error())
        .with_context(|| format!("flushing {:?}", path))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("syncing {:?}", path))?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("renaming temp file over {:?}", path))?;
    Ok(())
}

/// Remove `path`, treating an already-missing file as success.
pub fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("removing {:?}", path)),
    }
}

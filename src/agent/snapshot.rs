use std::fmt::Write;

use crate::rows::{value_or_null, Row};
use crate::schema::{encode_cell, ColumnDef, CATEGORY_FIELD, ID_COLUMN};

/// A read-only copy of the table taken under the inventory lock.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSnapshot {
    pub headers: Vec<String>,
    pub cells: Vec<Vec<String>>,
}

impl TableSnapshot {
    /// The `Category` column is only shown once some item has one.
    pub fn capture(columns: &[ColumnDef], rows: &[Row]) -> Self {
        let categorized = rows.iter().any(|r| !r.category.is_empty());
        let headers = std::iter::once(ID_COLUMN.to_string())
            .chain(categorized.then(|| CATEGORY_FIELD.to_string()))
            .chain(columns.iter().map(|c| c.name.clone()))
            .collect();
        let cells = rows
            .iter()
            .map(|row| {
                std::iter::once(row.id.clone())
                    .chain(categorized.then(|| row.category.clone()))
                    .chain(
                        columns
                            .iter()
                            .map(|c| encode_cell(value_or_null(row, &c.name))),
                    )
                    .collect()
            })
            .collect();
        Self { headers, cells }
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Plain-text grid, every column right-aligned to its widest cell.
    pub fn render(&self) -> String {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.chars().count()).collect();
        for row in &self.cells {
            for (w, cell) in widths.iter_mut().zip(row) {
                *w = (*w).max(cell.chars().count());
            }
        }

        let mut out = String::new();
        write_line(&mut out, &self.headers, &widths);
        for row in &self.cells {
            write_line(&mut out, row, &widths);
        }
        out
    }
}

fn write_line(out: &mut String, cells: &[String], widths: &[usize]) {
    let line = cells
        .iter()
        .zip(widths)
        .map(|(c, w)| format!("{:>width$}", c, width = *w))
        .collect::<Vec<_>>()
        .join(" ");
    let _ = writeln!(out, "{}", line.trim_end());
}

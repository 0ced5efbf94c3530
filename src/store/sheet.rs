//! Spreadsheet mirror backed by a CSV file.
//!
//! The whole table is read and rewritten per operation; the mirror is small
//! (one sheet of party bookings) and the simplicity keeps the adapter free of
//! partial-write states. Cells are parsed into typed [`FieldValue`]s on read
//! and rendered canonically on write, so a value round-trips unchanged
//! through the file.
//!
//! The mirror never mints identifiers: they arrive from the remote store,
//! either inside an inserted record or via [`MirrorStore::bind_identifier`].

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{MirrorStore, RecordStore};
use crate::error::StoreError;
use crate::record::{FieldChanges, FieldValue, Record, RecordSet, FIELD_ID, FIELD_LAST_UPDATED, FIELD_STATUS};

/// Columns every mirror file starts with, in this order.
const BASE_COLUMNS: [&str; 3] = [FIELD_ID, FIELD_LAST_UPDATED, FIELD_STATUS];

pub struct SheetStore {
    path: PathBuf,
}

impl SheetStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the header and data rows. A missing file reads as an empty table
    /// with the base columns.
    fn read_table(&self) -> Result<(Vec<String>, Vec<Vec<String>>), StoreError> {
        if !self.path.exists() {
            let header = BASE_COLUMNS.iter().map(|s| s.to_string()).collect();
            return Ok((header, Vec::new()));
        }

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&self.path)?;
        let header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result?;
            let mut row: Vec<String> = record.iter().map(str::to_string).collect();
            row.resize(header.len(), String::new());
            rows.push(row);
        }
        Ok((header, rows))
    }

    fn write_table(&self, header: &[String], rows: &[Vec<String>]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut writer = csv::Writer::from_path(&self.path)?;
        writer.write_record(header)?;
        for row in rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    fn row_to_record(header: &[String], row: &[String], index: usize) -> Record {
        let mut record = Record::new();
        for (name, cell) in header.iter().zip(row) {
            // Identifier and status cells are opaque text: typed parsing
            // would turn an id like "42" into a number, and a record whose
            // ID is not text reads as unidentified.
            let value = if name == FIELD_ID || name == FIELD_STATUS {
                FieldValue::text(cell.as_str())
            } else {
                parse_cell(cell)
            };
            if !value.is_absent() {
                record.set(name.clone(), value);
            }
        }
        record.set_row(index);
        record
    }

    /// Append columns the table has not seen before and pad existing rows.
    fn ensure_columns<'a>(
        header: &mut Vec<String>,
        rows: &mut [Vec<String>],
        names: impl Iterator<Item = &'a str>,
    ) {
        for name in names {
            if !header.iter().any(|h| h == name) {
                header.push(name.to_string());
                for row in rows.iter_mut() {
                    row.push(String::new());
                }
            }
        }
    }

    fn column(header: &[String], name: &str) -> Option<usize> {
        header.iter().position(|h| h == name)
    }

    fn find_row(header: &[String], rows: &[Vec<String>], id: &str) -> Option<usize> {
        let id_col = Self::column(header, FIELD_ID)?;
        rows.iter().position(|row| row[id_col] == id)
    }
}

/// Parse one cell into a typed value.
///
/// Empty is absent; `true`/`false` are booleans; RFC 3339 strings are
/// timestamps; a finite number is numeric only when its canonical rendering
/// matches the cell exactly, so text like `"007"` keeps its leading zeros.
pub fn parse_cell(cell: &str) -> FieldValue {
    if cell.is_empty() {
        return FieldValue::Absent;
    }
    match cell {
        "true" => return FieldValue::Bool(true),
        "false" => return FieldValue::Bool(false),
        _ => {}
    }
    if let Ok(n) = cell.parse::<f64>() {
        if n.is_finite() && n.to_string() == cell {
            return FieldValue::Number(n);
        }
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(cell) {
        return FieldValue::Timestamp(ts.with_timezone(&Utc));
    }
    FieldValue::text(cell)
}

#[async_trait]
impl RecordStore for SheetStore {
    fn store_name(&self) -> &str {
        "sheet"
    }

    async fn list_records(&self) -> Result<RecordSet, StoreError> {
        let (header, rows) = self.read_table()?;
        Ok(rows
            .iter()
            .enumerate()
            .map(|(index, row)| Self::row_to_record(&header, row, index))
            .collect())
    }

    async fn apply_patch(&self, id: &str, changes: &FieldChanges) -> Result<(), StoreError> {
        let (mut header, mut rows) = self.read_table()?;
        let row_index = Self::find_row(&header, &rows, id)
            .ok_or_else(|| StoreError::RowNotFound(id.to_string()))?;

        Self::ensure_columns(&mut header, &mut rows, changes.keys().map(String::as_str));
        for (name, value) in changes {
            let col = Self::column(&header, name).expect("column ensured above");
            rows[row_index][col] = value.render();
        }
        self.write_table(&header, &rows)
    }

    async fn insert_record(&self, record: &Record) -> Result<String, StoreError> {
        let id = record.id().ok_or(StoreError::MissingIdentifier)?.to_string();

        let (mut header, mut rows) = self.read_table()?;
        Self::ensure_columns(
            &mut header,
            &mut rows,
            record
                .fields()
                .filter(|(_, value)| !value.is_absent())
                .map(|(name, _)| name),
        );

        let row = header
            .iter()
            .map(|name| record.get(name).render())
            .collect();
        rows.push(row);
        self.write_table(&header, &rows)?;
        Ok(id)
    }

    async fn delete_record(&self, id: &str) -> Result<(), StoreError> {
        let (header, mut rows) = self.read_table()?;
        let Some(id_col) = Self::column(&header, FIELD_ID) else {
            return Ok(());
        };
        let before = rows.len();
        rows.retain(|row| row[id_col] != id);
        if rows.len() != before {
            self.write_table(&header, &rows)?;
        }
        Ok(())
    }
}

#[async_trait]
impl MirrorStore for SheetStore {
    fn exists(&self) -> bool {
        self.path.exists()
    }

    async fn bind_identifier(&self, row: usize, id: &str) -> Result<(), StoreError> {
        let (mut header, mut rows) = self.read_table()?;
        if row >= rows.len() {
            return Err(StoreError::RowOutOfRange(row));
        }
        Self::ensure_columns(&mut header, &mut rows, std::iter::once(FIELD_ID));
        let id_col = Self::column(&header, FIELD_ID).expect("column ensured above");
        rows[row][id_col] = id.to_string();
        self.write_table(&header, &rows)
    }
}

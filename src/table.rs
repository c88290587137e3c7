//! Identifier-first tables as produced by spreadsheet exports: the metadata
//! table that feeds leaf labels, and the raw cell grid the heatmap is built from.

use crate::error::{EngineError, ErrorCode};
use calamine::{Data, Ods, Reader, Sheets, Xls, Xlsb, Xlsx, open_workbook};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Column that is preferred as identifier when present, otherwise column 0 is used.
pub const GENOME_ID_COLUMN: &str = "GenomeID";

/// Text rendered for a missing metadata value inside a label.
pub const MISSING_TEXT: &str = "NONE";

/// Cell spellings treated as "no value".
pub const NA_VALUES: &[&str] = &[
    "", "NA", "N/A", "n/a", "NaN", "nan", "-NaN", "-nan", "null", "NULL", "None", "#N/A",
    "#NA", "<NA>",
];

pub fn is_na(raw: &str) -> bool {
    NA_VALUES.contains(&raw.trim())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetadataValue {
    Text(String),
    Number(f64),
    Missing,
}

impl MetadataValue {
    pub fn from_cell(raw: &str) -> Self {
        if is_na(raw) {
            Self::Missing
        } else {
            Self::Text(raw.trim().to_string())
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{s}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Missing => write!(f, "{MISSING_TEXT}"),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::from_cell(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        if value.is_nan() {
            Self::Missing
        } else {
            Self::Number(value)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRow {
    pub identifier: String,
    pub values: Vec<(String, MetadataValue)>,
}

impl MetadataRow {
    pub fn new(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            values: vec![],
        }
    }

    pub fn with(mut self, field: &str, value: impl Into<MetadataValue>) -> Self {
        self.values.push((field.to_string(), value.into()));
        self
    }

    pub fn get(&self, field: &str) -> Option<&MetadataValue> {
        self.values
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }
}

/// Stored form of [`MetadataTable`]; deserializing re-validates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredTable {
    identifier_column: String,
    fields: Vec<String>,
    rows: Vec<MetadataRow>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "StoredTable", into = "StoredTable")]
pub struct MetadataTable {
    identifier_column: String,
    fields: Vec<String>,
    rows: Vec<MetadataRow>,
    /// Row position of each identifier.
    index: HashMap<String, usize>,
}

impl TryFrom<StoredTable> for MetadataTable {
    type Error = EngineError;

    fn try_from(stored: StoredTable) -> Result<Self, Self::Error> {
        Self::new(&stored.identifier_column, stored.fields, stored.rows)
    }
}

impl From<MetadataTable> for StoredTable {
    fn from(table: MetadataTable) -> Self {
        Self {
            identifier_column: table.identifier_column,
            fields: table.fields,
            rows: table.rows,
        }
    }
}

impl MetadataTable {
    pub fn new(
        identifier_column: &str,
        fields: Vec<String>,
        rows: Vec<MetadataRow>,
    ) -> Result<Self, EngineError> {
        let mut index: HashMap<String, usize> = HashMap::with_capacity(rows.len());
        for (pos, row) in rows.iter().enumerate() {
            if row.identifier.trim().is_empty() {
                return Err(EngineError::invalid_input(
                    "Metadata table contains a row without identifier",
                ));
            }
            if index.insert(row.identifier.clone(), pos).is_some() {
                return Err(EngineError::invalid_input(format!(
                    "Identifier '{}' occurs more than once in the metadata table",
                    row.identifier
                )));
            }
        }
        Ok(Self {
            identifier_column: identifier_column.to_string(),
            fields,
            rows,
            index,
        })
    }

    /// Reads a CSV file, or the first worksheet of a spreadsheet workbook.
    pub fn from_path(path: &str) -> Result<Self, EngineError> {
        Self::from_raw(RawTable::from_path(path, "metadata table")?)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, EngineError> {
        Self::from_raw(RawTable::from_reader(reader)?)
    }

    fn from_raw(raw: RawTable) -> Result<Self, EngineError> {
        let id_idx = raw
            .header
            .iter()
            .position(|h| h == GENOME_ID_COLUMN)
            .unwrap_or(0);
        let identifier_column = raw.header[id_idx].clone();
        let field_columns: Vec<(usize, String)> = raw
            .header
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != id_idx)
            .map(|(i, name)| (i, clean_field_name(name)))
            .collect();

        let rows = raw
            .rows
            .iter()
            .map(|cells| MetadataRow {
                identifier: cells[id_idx].trim().to_string(),
                values: field_columns
                    .iter()
                    .map(|(i, name)| (name.clone(), MetadataValue::from_cell(&cells[*i])))
                    .collect(),
            })
            .collect();
        let fields = field_columns.into_iter().map(|(_, name)| name).collect();
        Self::new(&identifier_column, fields, rows)
    }

    pub fn identifier_column(&self) -> &str {
        &self.identifier_column
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f == field)
    }

    pub fn rows(&self) -> &[MetadataRow] {
        &self.rows
    }

    pub fn get(&self, identifier: &str) -> Option<&MetadataRow> {
        self.index.get(identifier).map(|&pos| &self.rows[pos])
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().map(|r| r.identifier.as_str())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Parentheses in a column name would read as a range condition once the
/// name is part of a label.
pub fn clean_field_name(name: &str) -> String {
    name.trim().replace(['(', ')'], "")
}

/// Header plus string cells, every row as wide as the header.
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    /// Opens `path` as a workbook when its extension names a spreadsheet
    /// format, as CSV otherwise. `what` names the table in error messages.
    pub fn from_path(path: &str, what: &str) -> Result<Self, EngineError> {
        if let Some(extension) = workbook_extension(path) {
            return Self::from_workbook(path, &extension, what);
        }
        let file = File::open(path).map_err(|e| {
            EngineError::new(ErrorCode::Io, format!("Could not open {what} '{path}': {e}"))
        })?;
        Self::from_reader(file)
    }

    fn from_workbook(path: &str, extension: &str, what: &str) -> Result<Self, EngineError> {
        let opened: Result<Sheets<BufReader<File>>, String> = match extension {
            "xls" => open_workbook::<Xls<_>, _>(path).map(Sheets::Xls).map_err(|e| e.to_string()),
            "xlsb" => open_workbook::<Xlsb<_>, _>(path).map(Sheets::Xlsb).map_err(|e| e.to_string()),
            "ods" => open_workbook::<Ods<_>, _>(path).map(Sheets::Ods).map_err(|e| e.to_string()),
            _ => open_workbook::<Xlsx<_>, _>(path).map(Sheets::Xlsx).map_err(|e| e.to_string()),
        };
        let mut workbook = opened.map_err(|e| {
            EngineError::new(ErrorCode::Io, format!("Could not open {what} '{path}': {e}"))
        })?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| EngineError::invalid_input(format!("Workbook '{path}' has no worksheet")))?
            .map_err(|e| {
                EngineError::invalid_input(format!("Could not read the first worksheet of '{path}': {e}"))
            })?;
        let mut grid = range
            .rows()
            .map(|cells| cells.iter().map(cell_text).collect::<Vec<String>>());
        let header = grid.next().unwrap_or_default();
        Self::from_grid(header, grid)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, EngineError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_reader(reader);
        let header: Vec<String> = rdr.byte_headers()?.iter().map(decode_field).collect();
        let records = rdr
            .byte_records()
            .map(|record| record.map(|r| r.iter().map(decode_field).collect::<Vec<String>>()))
            .collect::<Result<Vec<_>, csv::Error>>()?;
        Self::from_grid(header, records)
    }

    /// Header checks, blank-row skipping and identifier checks shared by
    /// every source format.
    fn from_grid(
        header: Vec<String>,
        grid: impl IntoIterator<Item = Vec<String>>,
    ) -> Result<Self, EngineError> {
        if header.is_empty() || header.iter().all(|h| h.trim().is_empty()) {
            return Err(EngineError::invalid_input("Table has no header row"));
        }
        let mut rows = vec![];
        for cells in grid {
            if cells.iter().all(|c| c.trim().is_empty()) {
                continue;
            }
            if cells[0].trim().is_empty() {
                return Err(EngineError::invalid_input(format!(
                    "Row {} has an empty identifier cell",
                    rows.len() + 1
                )));
            }
            rows.push(cells);
        }
        Ok(Self { header, rows })
    }
}

/// File extensions read through the workbook reader.
pub const WORKBOOK_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xlsb", "xls", "ods"];

/// Lower-cased extension of `path` when it names a workbook format.
fn workbook_extension(path: &str) -> Option<String> {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .filter(|ext| WORKBOOK_EXTENSIONS.contains(&ext.as_str()))
}

/// Empty and error cells read as empty text, which counts as missing.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        other => other.to_string(),
    }
}

/// Spreadsheet exports are frequently Latin-1; fall back to a byte-wise
/// decode when a field is not valid UTF-8.
fn decode_field(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

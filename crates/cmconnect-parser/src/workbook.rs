use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;

use calamine::{open_workbook_auto_from_rs, Data, Reader, Sheets};
use chrono::{NaiveDate, NaiveDateTime};

use crate::errors::ParserError;
use crate::model::{CellValue, RawSheet, RawWorkbook, SheetNames};

/// Anything that can hand out the cell grid of a named worksheet.
pub trait WorkbookSource {
    fn sheet_names(&self) -> Vec<String>;
    fn sheet_rows(&mut self, name: &str) -> Result<Vec<Vec<CellValue>>, ParserError>;
}

pub fn read_sheet<S: WorkbookSource + ?Sized>(
    source: &mut S,
    name: &str,
) -> Result<RawSheet, ParserError> {
    ensure_sheet(source, name)?;
    let grid = source.sheet_rows(name)?;
    Ok(RawSheet::from_grid(name, grid))
}

/// Reads the EPS and CRM sheets. Both are checked before either is parsed so a
/// missing sheet fails fast.
pub fn read_workbook<S: WorkbookSource + ?Sized>(
    source: &mut S,
    sheets: &SheetNames,
) -> Result<RawWorkbook, ParserError> {
    ensure_sheet(source, &sheets.eps)?;
    ensure_sheet(source, &sheets.crm)?;

    let eps = read_sheet(source, &sheets.eps)?;
    let crm = read_sheet(source, &sheets.crm)?;
    Ok(RawWorkbook { eps, crm })
}

fn ensure_sheet<S: WorkbookSource + ?Sized>(source: &S, name: &str) -> Result<(), ParserError> {
    let available = source.sheet_names();
    if available.iter().any(|sheet| sheet == name) {
        Ok(())
    } else {
        Err(ParserError::SheetNotFound {
            sheet: name.to_string(),
            available,
        })
    }
}

/// Workbook backed by calamine; the format (xlsx, xlsm, xlsb, xls, ods) is detected from content.
pub struct CalamineWorkbook {
    inner: Sheets<Cursor<Vec<u8>>>,
}

impl CalamineWorkbook {
    pub fn open(path: &Path) -> Result<Self, ParserError> {
        let bytes = std::fs::read(path).map_err(|source| ParserError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(bytes)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ParserError> {
        let inner = open_workbook_auto_from_rs(Cursor::new(bytes)).map_err(ParserError::workbook)?;
        Ok(Self { inner })
    }
}

impl std::fmt::Debug for CalamineWorkbook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalamineWorkbook")
            .field("sheets", &self.inner.sheet_names())
            .finish()
    }
}

impl WorkbookSource for CalamineWorkbook {
    fn sheet_names(&self) -> Vec<String> {
        self.inner.sheet_names()
    }

    fn sheet_rows(&mut self, name: &str) -> Result<Vec<Vec<CellValue>>, ParserError> {
        let range = self
            .inner
            .worksheet_range(name)
            .map_err(ParserError::workbook)?;
        Ok(range
            .rows()
            .map(|row| row.iter().map(cell_from_data).collect())
            .collect())
    }
}

pub(crate) fn cell_from_data(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Empty,
        Data::String(value) => CellValue::Text(value.clone()),
        Data::Int(value) => CellValue::Number(*value as f64),
        Data::Float(value) => CellValue::Number(*value),
        Data::Bool(value) => CellValue::Text(value.to_string()),
        Data::DateTime(value) => {
            if value.is_duration() {
                return CellValue::Text(value.as_f64().to_string());
            }
            match value.as_datetime() {
                Some(datetime) => CellValue::Date(datetime),
                None => CellValue::Text(value.as_f64().to_string()),
            }
        }
        Data::DateTimeIso(value) => match parse_iso_datetime(value) {
            Some(datetime) => CellValue::Date(datetime),
            None => CellValue::Text(value.clone()),
        },
        Data::DurationIso(value) => CellValue::Text(value.clone()),
        Data::Error(_) => CellValue::Empty,
    }
}

fn parse_iso_datetime(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

/// Workbook held entirely in memory. Sheet order follows insertion order.
#[derive(Debug, Clone, Default)]
pub struct InMemoryWorkbook {
    order: Vec<String>,
    sheets: HashMap<String, Vec<Vec<CellValue>>>,
}

impl InMemoryWorkbook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a sheet. `grid[0]` is the header row.
    pub fn with_sheet(mut self, name: impl Into<String>, grid: Vec<Vec<CellValue>>) -> Self {
        let name = name.into();
        if !self.sheets.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.sheets.insert(name, grid);
        self
    }
}

impl WorkbookSource for InMemoryWorkbook {
    fn sheet_names(&self) -> Vec<String> {
        self.order.clone()
    }

    fn sheet_rows(&mut self, name: &str) -> Result<Vec<Vec<CellValue>>, ParserError> {
        self.sheets
            .get(name)
            .cloned()
            .ok_or_else(|| ParserError::SheetNotFound {
                sheet: name.to_string(),
                available: self.order.clone(),
            })
    }
}

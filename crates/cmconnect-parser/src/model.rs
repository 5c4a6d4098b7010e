use std::fmt;

use chrono::{NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// A single spreadsheet cell as read from the workbook, before any cleanup.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Number(f64),
    Date(NaiveDateTime),
    Empty,
}

impl CellValue {
    pub fn text(value: impl Into<String>) -> Self {
        CellValue::Text(value.into())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            CellValue::Date(value) => Some(*value),
            _ => None,
        }
    }

    /// Text rendering used when the value is stored in a text column.
    pub fn to_text(&self) -> Option<String> {
        match self {
            CellValue::Text(value) => Some(value.clone()),
            CellValue::Number(value) => Some(format_number(*value)),
            CellValue::Date(value) => Some(format_datetime(value)),
            CellValue::Empty => None,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Text(value) => f.write_str(value),
            CellValue::Number(value) => f.write_str(&format_number(*value)),
            CellValue::Date(value) => f.write_str(&format_datetime(value)),
            CellValue::Empty => Ok(()),
        }
    }
}

fn format_number(value: f64) -> String {
    // Spreadsheets store whole numbers as floats; ids and phone numbers must not gain a ".0".
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

fn format_datetime(value: &NaiveDateTime) -> String {
    if value.time() == NaiveTime::MIN {
        value.format("%Y-%m-%d").to_string()
    } else {
        value.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

/// Names of the two worksheets every grievance workbook carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetNames {
    pub eps: String,
    pub crm: String,
}

impl Default for SheetNames {
    fn default() -> Self {
        Self {
            eps: "EPS RAW".to_string(),
            crm: "CRM RAW".to_string(),
        }
    }
}

/// One worksheet: the header row as labels plus every data row below it.
///
/// Rows always have exactly `columns.len()` cells.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSheet {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl RawSheet {
    pub fn new(name: impl Into<String>, columns: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, CellValue::Empty);
                row
            })
            .collect();
        Self {
            name: name.into(),
            columns,
            rows,
        }
    }

    /// Builds a sheet from raw grid rows where the first row is the header.
    pub fn from_grid(name: impl Into<String>, grid: Vec<Vec<CellValue>>) -> Self {
        let mut grid = grid.into_iter();
        let columns = grid
            .next()
            .map(|header| {
                header
                    .iter()
                    .map(|cell| cell.to_text().unwrap_or_default())
                    .collect()
            })
            .unwrap_or_default();
        Self::new(name, columns, grid.collect())
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, label: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == label)
    }

    pub fn column<'a>(&'a self, label: &str) -> Option<impl Iterator<Item = &'a CellValue> + 'a> {
        let index = self.column_index(label)?;
        Some(self.rows.iter().map(move |row| &row[index]))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawWorkbook {
    pub eps: RawSheet,
    pub crm: RawSheet,
}

use cmconnect_parser::{CellValue, RawSheet, RawWorkbook};
use serde::Serialize;
use tracing::debug;

use crate::canonical::canonicalize_columns;
use crate::cleanup::{clean_block_cell, coerce_date, substitute_value, CompiledRules};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Text,
    Timestamp,
}

impl ColumnKind {
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnKind::Text => "TEXT",
            ColumnKind::Timestamp => "TIMESTAMP",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedColumn {
    pub name: String,
    pub kind: ColumnKind,
}

impl NormalizedColumn {
    pub fn text(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ColumnKind::Text,
        }
    }
}

/// A sheet after canonicalization and cleanup. Row count always matches the source sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedDataset {
    pub columns: Vec<NormalizedColumn>,
    pub rows: Vec<Vec<CellValue>>,
}

impl NormalizedDataset {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|column| column.name.as_str()).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }

    pub fn values<'a>(&'a self, name: &str) -> Option<impl Iterator<Item = &'a CellValue> + 'a> {
        let index = self.column_index(name)?;
        Some(self.rows.iter().map(move |row| &row[index]))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedWorkbook {
    pub eps: NormalizedDataset,
    pub crm: NormalizedDataset,
}

pub fn normalize(raw: &RawWorkbook, rules: &CompiledRules) -> NormalizedWorkbook {
    NormalizedWorkbook {
        eps: normalize_eps(&raw.eps, rules),
        crm: normalize_crm(&raw.crm),
    }
}

/// CRM rows only get canonical column names; values pass through untouched.
pub fn normalize_crm(sheet: &RawSheet) -> NormalizedDataset {
    let columns = canonicalize_columns(&sheet.columns)
        .into_iter()
        .map(NormalizedColumn::text)
        .collect();

    let dataset = NormalizedDataset {
        columns,
        rows: sheet.rows.clone(),
    };
    debug!(
        sheet = %sheet.name,
        columns = dataset.column_count(),
        rows = dataset.row_count(),
        "normalized CRM sheet"
    );
    dataset
}

pub fn normalize_eps(sheet: &RawSheet, rules: &CompiledRules) -> NormalizedDataset {
    let names: Vec<String> = canonicalize_columns(&sheet.columns)
        .into_iter()
        .map(|name| rename_eps_column(name, rules))
        .collect();

    let mut rows = sheet.rows.clone();
    for (index, name) in names.iter().enumerate() {
        for substitution in rules
            .rules
            .value_substitutions
            .iter()
            .filter(|substitution| &substitution.column == name)
        {
            for row in rows.iter_mut() {
                row[index] = substitute_value(&row[index], &substitution.from, &substitution.to);
            }
        }

        if rules.rules.block_column.as_deref() == Some(name.as_str()) {
            for row in rows.iter_mut() {
                row[index] = clean_block_cell(&row[index], &rules.block_suffix);
            }
        }

        if rules.is_date_column(name) {
            for row in rows.iter_mut() {
                row[index] = coerce_date(&row[index]);
            }
        }
    }

    let columns = names
        .into_iter()
        .map(|name| {
            let kind = if rules.is_date_column(&name) {
                ColumnKind::Timestamp
            } else {
                ColumnKind::Text
            };
            NormalizedColumn { name, kind }
        })
        .collect();

    let dataset = NormalizedDataset { columns, rows };
    debug!(
        sheet = %sheet.name,
        columns = dataset.column_count(),
        rows = dataset.row_count(),
        "normalized EPS sheet"
    );
    dataset
}

fn rename_eps_column(name: String, rules: &CompiledRules) -> String {
    if name.is_empty() {
        return rules.rules.blank_column_name.clone();
    }
    match rules.alias_for(&name) {
        Some(alias) => alias.to_string(),
        None => name,
    }
}

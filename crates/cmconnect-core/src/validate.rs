use std::collections::BTreeMap;

use thiserror::Error;

use crate::normalize::NormalizedDataset;

/// PostgreSQL silently truncates identifiers beyond this many bytes.
pub const MAX_IDENTIFIER_BYTES: usize = 63;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("table '{table}' would receive duplicate columns after canonicalization: {columns:?}")]
    DuplicateColumns { table: String, columns: Vec<String> },

    #[error("table '{table}' has a blank column name at position {position}")]
    BlankColumn { table: String, position: usize },
}

/// Rejects datasets whose column set cannot be stored unambiguously.
pub fn validate_dataset(table: &str, dataset: &NormalizedDataset) -> Result<(), ValidationError> {
    if let Some(position) = dataset.columns.iter().position(|column| column.name.is_empty()) {
        return Err(ValidationError::BlankColumn {
            table: table.to_string(),
            position,
        });
    }

    let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
    for column in &dataset.columns {
        *seen.entry(stored_identifier(&column.name)).or_insert(0) += 1;
    }

    let duplicates: Vec<String> = seen
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(name, _)| name.to_string())
        .collect();

    if duplicates.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::DuplicateColumns {
            table: table.to_string(),
            columns: duplicates,
        })
    }
}

/// The identifier as the store will keep it.
pub fn stored_identifier(name: &str) -> &str {
    if name.len() <= MAX_IDENTIFIER_BYTES {
        return name;
    }
    let mut end = MAX_IDENTIFIER_BYTES;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::NormalizedColumn;

    fn dataset(names: &[&str]) -> NormalizedDataset {
        NormalizedDataset {
            columns: names.iter().map(|name| NormalizedColumn::text(*name)).collect(),
            rows: Vec::new(),
        }
    }

    #[test]
    fn distinct_columns_pass() {
        assert!(validate_dataset("crm_raw", &dataset(&["ticket_no", "status"])).is_ok());
    }

    #[test]
    fn duplicate_columns_are_reported_once() {
        let err = validate_dataset(
            "staging_grievance",
            &dataset(&["source_1", "status", "source_1", "source_1"]),
        )
        .unwrap_err();
        assert_eq!(
            err,
            ValidationError::DuplicateColumns {
                table: "staging_grievance".into(),
                columns: vec!["source_1".into()],
            }
        );
    }

    #[test]
    fn names_colliding_after_truncation_are_duplicates() {
        let base = "a".repeat(MAX_IDENTIFIER_BYTES);
        let first = format!("{base}_first");
        let second = format!("{base}_second");
        let err = validate_dataset("crm_raw", &dataset(&[&first, &second])).unwrap_err();
        assert!(matches!(err, ValidationError::DuplicateColumns { .. }));
    }

    #[test]
    fn blank_column_is_rejected() {
        let err = validate_dataset("crm_raw", &dataset(&["status", ""])).unwrap_err();
        assert_eq!(
            err,
            ValidationError::BlankColumn {
                table: "crm_raw".into(),
                position: 1,
            }
        );
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let name = format!("{}é", "a".repeat(MAX_IDENTIFIER_BYTES - 1));
        assert_eq!(stored_identifier(&name).len(), MAX_IDENTIFIER_BYTES - 1);
    }
}

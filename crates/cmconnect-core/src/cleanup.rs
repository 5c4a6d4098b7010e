//! Value-level cleanup rules applied to the EPS sheet.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime};
use cmconnect_parser::CellValue;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnAlias {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueSubstitution {
    pub column: String,
    pub from: String,
    pub to: String,
}

/// The cleanup-rule table. Every name here refers to a canonical column name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupRules {
    pub column_aliases: Vec<ColumnAlias>,
    pub blank_column_name: String,
    pub value_substitutions: Vec<ValueSubstitution>,
    pub block_column: Option<String>,
    pub block_suffix_pattern: String,
    pub date_columns: Vec<String>,
}

impl Default for CleanupRules {
    fn default() -> Self {
        Self {
            column_aliases: vec![
                ColumnAlias {
                    from: "source".into(),
                    to: "source_primary".into(),
                },
                ColumnAlias {
                    from: "source1".into(),
                    to: "source_secondary".into(),
                },
            ],
            blank_column_name: "officer_name".into(),
            value_substitutions: vec![ValueSubstitution {
                column: "district".into(),
                from: "Ri-Bhoi".into(),
                to: "Ri Bhoi".into(),
            }],
            block_column: Some("block".into()),
            block_suffix_pattern: r"\bc\s*(?:&|and)\s*rd\s+block\b".into(),
            date_columns: vec!["date_of_complaint".into()],
        }
    }
}

#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("invalid block suffix pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("blank column placeholder must not be empty")]
    EmptyPlaceholder,
}

impl CleanupRules {
    pub fn compile(&self) -> Result<CompiledRules, CleanupError> {
        if self.blank_column_name.trim().is_empty() {
            return Err(CleanupError::EmptyPlaceholder);
        }
        let block_suffix = RegexBuilder::new(&self.block_suffix_pattern)
            .case_insensitive(true)
            .build()
            .map_err(|source| CleanupError::InvalidPattern {
                pattern: self.block_suffix_pattern.clone(),
                source,
            })?;
        Ok(CompiledRules {
            rules: self.clone(),
            block_suffix,
        })
    }
}

/// Rules with their patterns compiled, ready to run against a dataset.
#[derive(Debug, Clone)]
pub struct CompiledRules {
    pub rules: CleanupRules,
    pub block_suffix: Regex,
}

impl CompiledRules {
    pub fn alias_for(&self, column: &str) -> Option<&str> {
        self.rules
            .column_aliases
            .iter()
            .find(|alias| alias.from == column)
            .map(|alias| alias.to.as_str())
    }

    pub fn is_date_column(&self, column: &str) -> bool {
        self.rules.date_columns.iter().any(|name| name == column)
    }
}

/// Applies the exact-match substitution to text cells; other cells are untouched.
pub fn substitute_value(cell: &CellValue, from: &str, to: &str) -> CellValue {
    match cell {
        CellValue::Text(value) if value == from => CellValue::Text(to.to_string()),
        other => other.clone(),
    }
}

pub fn clean_block_cell(cell: &CellValue, suffix: &Regex) -> CellValue {
    match cell {
        CellValue::Text(value) => CellValue::Text(clean_block_name(value, suffix)),
        other => other.clone(),
    }
}

/// Drops the development-block suffix and tidies the remaining name.
pub fn clean_block_name(value: &str, suffix: &Regex) -> String {
    let stripped = suffix.replace_all(value.trim(), " ");
    title_case(&collapse_whitespace(&stripped))
}

pub fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Uppercases the first letter of every alphabetic run and lowercases the rest.
pub fn title_case(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut in_word = false;
    for ch in value.chars() {
        if ch.is_alphabetic() {
            if in_word {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(ch);
            in_word = false;
        }
    }
    out
}

const DATE_FORMATS: &[&str] = &[
    "%d-%m-%Y",
    "%d/%m/%Y",
    "%d.%m.%Y",
    "%d-%b-%Y",
    "%d %b %Y",
    "%d-%B-%Y",
    "%d %B %Y",
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d-%m-%y",
    "%d/%m/%y",
];

const MIN_YEAR: i32 = 1000;

const TIME_SUFFIXES: &[&str] = &[" %H:%M:%S", " %H:%M", "T%H:%M:%S", "T%H:%M:%S%.f"];

// 9999-12-31, the last day Excel can represent.
const EXCEL_SERIAL_MAX: f64 = 2_958_466.0;

/// Best-effort date coercion. Anything that cannot be read as a date becomes empty.
pub fn coerce_date(cell: &CellValue) -> CellValue {
    let parsed = match cell {
        CellValue::Date(value) => Some(*value),
        CellValue::Text(value) => parse_date_text(value),
        CellValue::Number(value) => excel_serial_to_datetime(*value),
        CellValue::Empty => None,
    };
    parsed.map(CellValue::Date).unwrap_or(CellValue::Empty)
}

pub fn parse_date_text(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(datetime) = DateTime::parse_from_rfc3339(value) {
        return Some(datetime.naive_local());
    }

    // `%Y` also accepts one to three digit years, so "05-01-24" would land in
    // year 24 before the `%y` formats got a chance.
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            if date.year() >= MIN_YEAR {
                return date.and_hms_opt(0, 0, 0);
            }
            continue;
        }
        for suffix in TIME_SUFFIXES {
            let full = format!("{format}{suffix}");
            if let Ok(datetime) = NaiveDateTime::parse_from_str(value, &full) {
                if datetime.year() >= MIN_YEAR {
                    return Some(datetime);
                }
            }
        }
    }
    None
}

pub fn excel_serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 1.0 || serial >= EXCEL_SERIAL_MAX {
        return None;
    }
    // 1900 date system. Excel counts a fictitious 1900-02-29 as serial 60, so
    // serials before it are one day closer to the epoch than those after it.
    let epoch = match serial.trunc() as i64 {
        ..=59 => NaiveDate::from_ymd_opt(1899, 12, 31)?,
        60 => return None,
        _ => NaiveDate::from_ymd_opt(1899, 12, 30)?,
    }
    .and_hms_opt(0, 0, 0)?;
    let days = serial.trunc() as i64;
    let seconds = (serial.fract() * 86_400.0).round() as i64;
    epoch.checked_add_signed(Duration::days(days) + Duration::seconds(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> CompiledRules {
        CleanupRules::default().compile().expect("default rules compile")
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .expect("valid date")
    }

    #[test]
    fn block_suffix_is_removed_in_any_spelling() {
        let suffix = rules().block_suffix;
        assert_eq!(clean_block_name("North  C & RD Block", &suffix), "North");
        assert_eq!(clean_block_name("south c and rd block  ", &suffix), "South");
        assert_eq!(clean_block_name("Mawkyrwat C&RD Block", &suffix), "Mawkyrwat");
        assert_eq!(clean_block_name("  UMLING   c  AND  Rd   BLOCK", &suffix), "Umling");
    }

    #[test]
    fn block_names_without_suffix_are_title_cased() {
        let suffix = rules().block_suffix;
        assert_eq!(clean_block_name("mylliem", &suffix), "Mylliem");
        assert_eq!(clean_block_name("east   garo", &suffix), "East Garo");
        assert_eq!(clean_block_name("Mylliem", &suffix), "Mylliem");
    }

    #[test]
    fn block_cleanup_is_idempotent() {
        let suffix = rules().block_suffix;
        let once = clean_block_name("south c and rd block  ", &suffix);
        assert_eq!(clean_block_name(&once, &suffix), once);
    }

    #[test]
    fn non_text_block_cells_pass_through() {
        let suffix = rules().block_suffix;
        assert_eq!(clean_block_cell(&CellValue::Empty, &suffix), CellValue::Empty);
        assert_eq!(
            clean_block_cell(&CellValue::Number(7.0), &suffix),
            CellValue::Number(7.0)
        );
    }

    #[test]
    fn district_substitution_is_exact_and_case_sensitive() {
        assert_eq!(
            substitute_value(&CellValue::text("Ri-Bhoi"), "Ri-Bhoi", "Ri Bhoi"),
            CellValue::text("Ri Bhoi")
        );
        assert_eq!(
            substitute_value(&CellValue::text("ri-bhoi"), "Ri-Bhoi", "Ri Bhoi"),
            CellValue::text("ri-bhoi")
        );
        assert_eq!(
            substitute_value(&CellValue::text("Ri-Bhoi "), "Ri-Bhoi", "Ri Bhoi"),
            CellValue::text("Ri-Bhoi ")
        );
    }

    #[test]
    fn title_case_matches_word_boundaries() {
        assert_eq!(title_case("ri-bhoi"), "Ri-Bhoi");
        assert_eq!(title_case("EAST KHASI HILLS"), "East Khasi Hills");
        assert_eq!(title_case(""), "");
    }

    #[test]
    fn dates_parse_day_first() {
        assert_eq!(parse_date_text("05-01-2024"), Some(date(2024, 1, 5)));
        assert_eq!(parse_date_text("05/01/2024"), Some(date(2024, 1, 5)));
        assert_eq!(parse_date_text("12-Nov-2024"), Some(date(2024, 11, 12)));
        assert_eq!(parse_date_text("2024-11-12"), Some(date(2024, 11, 12)));
        assert_eq!(
            parse_date_text("12/11/2024 10:15"),
            NaiveDate::from_ymd_opt(2024, 11, 12).and_then(|d| d.and_hms_opt(10, 15, 0))
        );
    }

    #[test]
    fn unparseable_dates_become_empty() {
        assert_eq!(coerce_date(&CellValue::text("pending")), CellValue::Empty);
        assert_eq!(coerce_date(&CellValue::text("31-02-2024")), CellValue::Empty);
        assert_eq!(coerce_date(&CellValue::text("   ")), CellValue::Empty);
        assert_eq!(coerce_date(&CellValue::Empty), CellValue::Empty);
        assert_eq!(coerce_date(&CellValue::Number(-4.0)), CellValue::Empty);
    }

    #[test]
    fn excel_serials_convert_to_dates() {
        assert_eq!(
            coerce_date(&CellValue::Number(45_608.0)),
            CellValue::Date(date(2024, 11, 12))
        );
        let with_time = excel_serial_to_datetime(45_608.5).expect("serial with time");
        assert_eq!(with_time.format("%H:%M").to_string(), "12:00");
    }

    #[test]
    fn two_digit_years_map_to_this_century() {
        assert_eq!(parse_date_text("05-01-24"), Some(date(2024, 1, 5)));
        assert_eq!(parse_date_text("12/11/24"), Some(date(2024, 11, 12)));
        assert_eq!(
            parse_date_text("12/11/24 09:30"),
            NaiveDate::from_ymd_opt(2024, 11, 12).and_then(|d| d.and_hms_opt(9, 30, 0))
        );
        assert_eq!(
            coerce_date(&CellValue::text("05-01-24")),
            CellValue::Date(date(2024, 1, 5))
        );
    }

    #[test]
    fn early_1900_serials_skip_the_phantom_leap_day() {
        assert_eq!(excel_serial_to_datetime(1.0), Some(date(1900, 1, 1)));
        assert_eq!(excel_serial_to_datetime(59.0), Some(date(1900, 2, 28)));
        assert_eq!(excel_serial_to_datetime(60.0), None);
        assert_eq!(excel_serial_to_datetime(61.0), Some(date(1900, 3, 1)));
        assert_eq!(coerce_date(&CellValue::Number(60.0)), CellValue::Empty);
    }

    #[test]
    fn existing_dates_are_kept() {
        let value = CellValue::Date(date(2023, 6, 1));
        assert_eq!(coerce_date(&value), value);
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let rules = CleanupRules {
            block_suffix_pattern: "(unclosed".into(),
            ..CleanupRules::default()
        };
        assert!(matches!(
            rules.compile(),
            Err(CleanupError::InvalidPattern { .. })
        ));
    }
}

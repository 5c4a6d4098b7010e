//! Column label canonicalization shared by every sheet.

use once_cell::sync::Lazy;
use regex::Regex;

static SEPARATOR_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\p{Alphabetic}\p{Nd}]+").expect("separator pattern is valid"));

/// Maps a raw header label to its canonical column name.
///
/// Runs of whitespace, punctuation and underscores collapse to a single `_`,
/// separators at either end are dropped and the result is lowercased. A blank
/// label yields an empty string; callers decide which placeholder to use.
pub fn canonical_column_name(label: &str) -> String {
    let joined = SEPARATOR_RUN.replace_all(label.trim(), "_");
    joined.trim_matches('_').to_lowercase()
}

pub fn canonicalize_columns(labels: &[String]) -> Vec<String> {
    labels
        .iter()
        .map(|label| canonical_column_name(label))
        .collect()
}

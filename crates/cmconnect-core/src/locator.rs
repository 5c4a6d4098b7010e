use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use glob::{MatchOptions, Pattern};
use thiserror::Error;
use tracing::{debug, warn};

pub const SPREADSHEET_EXTENSION: &str = "xlsx";

#[derive(Debug, Error)]
pub enum LocateError {
    #[error("no *.{extension} files found in {}", directory.display())]
    NoMatchingFile {
        directory: PathBuf,
        extension: String,
    },

    #[error("cannot read input directory {}: {source}", directory.display())]
    Unreadable {
        directory: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid search pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

pub fn locate_latest_spreadsheet(directory: &Path) -> Result<PathBuf, LocateError> {
    locate_latest(directory, SPREADSHEET_EXTENSION)
}

/// Returns the most recently modified `*.<extension>` file directly inside `directory`.
///
/// Matching is case-insensitive. Office lock files (`~$name.xlsx`) are ignored.
/// When two files share a modification time the lexically greatest name wins.
pub fn locate_latest(directory: &Path, extension: &str) -> Result<PathBuf, LocateError> {
    let extension = extension.trim_start_matches('.');
    fs::read_dir(directory).map_err(|source| LocateError::Unreadable {
        directory: directory.to_path_buf(),
        source,
    })?;

    let pattern = format!(
        "{}/*.{}",
        Pattern::escape(&directory.to_string_lossy()),
        Pattern::escape(extension)
    );
    let options = MatchOptions {
        case_sensitive: false,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };

    let mut latest: Option<(SystemTime, String, PathBuf)> = None;
    for entry in glob::glob_with(&pattern, options)? {
        let path = match entry {
            Ok(path) => path,
            Err(err) => {
                warn!(error = %err, "skipping unreadable directory entry");
                continue;
            }
        };

        let name = match path.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => continue,
        };
        if name.starts_with("~$") {
            continue;
        }

        let modified = match fs::metadata(&path) {
            Ok(metadata) if metadata.is_file() => match metadata.modified() {
                Ok(modified) => modified,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "no modification time, skipping");
                    continue;
                }
            },
            Ok(_) => continue,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "cannot stat candidate, skipping");
                continue;
            }
        };

        let newer = match &latest {
            Some((best_time, best_name, _)) => (modified, &name) > (*best_time, best_name),
            None => true,
        };
        if newer {
            latest = Some((modified, name, path));
        }
    }

    match latest {
        Some((_, _, path)) => {
            debug!(path = %path.display(), "located latest input file");
            Ok(path)
        }
        None => Err(LocateError::NoMatchingFile {
            directory: directory.to_path_buf(),
            extension: extension.to_string(),
        }),
    }
}

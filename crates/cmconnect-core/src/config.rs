//! Runtime configuration: defaults, then a TOML file, then environment overrides.

use std::path::{Path, PathBuf};

use cmconnect_parser::SheetNames;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cleanup::CleanupRules;
use crate::store::LoadMode;

pub const DEFAULT_CONFIG_FILE: &str = "cmconnect.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("no database configured: set DATABASE_URL (or CMCONNECT_DATABASE_URL) or the [database] username/host/database keys")]
    MissingDatabase,

    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub dialect: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub host: Option<String>,
    pub port: u16,
    pub database: Option<String>,
    pub max_connections: u32,
    pub load_mode: LoadMode,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            dialect: "postgresql".into(),
            username: None,
            password: None,
            host: None,
            port: 5432,
            database: None,
            max_connections: 5,
            load_mode: LoadMode::Chunked,
        }
    }
}

impl DatabaseConfig {
    /// The explicit `url` if set, otherwise one assembled from the individual parts.
    pub fn connection_url(&self) -> Result<String, ConfigError> {
        self.build_url(self.password.as_deref().map(encode_userinfo))
    }

    /// Same as [`connection_url`](Self::connection_url) with the password masked, for display.
    pub fn redacted_url(&self) -> Result<String, ConfigError> {
        if let Some(url) = &self.url {
            return Ok(redact_url(url));
        }
        self.build_url(self.password.as_ref().map(|_| "****".to_string()))
    }

    fn build_url(&self, password: Option<String>) -> Result<String, ConfigError> {
        if let Some(url) = &self.url {
            return Ok(url.clone());
        }
        let (Some(username), Some(host), Some(database)) =
            (&self.username, &self.host, &self.database)
        else {
            return Err(ConfigError::MissingDatabase);
        };
        let password = password.map(|p| format!(":{p}")).unwrap_or_default();
        Ok(format!(
            "{}://{}{}@{}:{}/{}",
            self.dialect,
            encode_userinfo(username),
            password,
            host,
            self.port,
            database
        ))
    }
}

fn encode_userinfo(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((userinfo, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match userinfo.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:****@{host}"),
        None => url.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub input_dir: PathBuf,
    pub log_dir: PathBuf,
    pub spreadsheet_extension: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("Data").join("raw files"),
            log_dir: PathBuf::from("logs"),
            spreadsheet_extension: crate::locator::SPREADSHEET_EXTENSION.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableNames {
    pub eps: String,
    pub crm: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            eps: "staging_grievance".into(),
            crm: "crm_raw".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub batch_size: usize,
    pub sheets: SheetNames,
    pub tables: TableNames,
    pub rules: CleanupRules,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            sheets: SheetNames::default(),
            tables: TableNames::default(),
            rules: CleanupRules::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub paths: PathsConfig,
    pub pipeline: PipelineSection,
}

impl AppConfig {
    /// Loads `.env`, then the given TOML file (or `cmconnect.toml` when present), then
    /// applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.is_file() {
                    Self::from_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overrides values from environment variables supplied by `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL").or_else(|| lookup("CMCONNECT_DATABASE_URL")) {
            self.database.url = Some(url);
        }
        if let Some(dialect) = lookup("DB_DIALECT") {
            self.database.dialect = dialect;
        }
        if let Some(username) = lookup("DB_USER") {
            self.database.username = Some(username);
        }
        if let Some(password) = lookup("DB_PASS") {
            self.database.password = Some(password);
        }
        if let Some(host) = lookup("DB_HOST") {
            self.database.host = Some(host);
        }
        if let Some(port) = lookup("DB_PORT") {
            self.database.port = port.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "DB_PORT",
                value: port.clone(),
            })?;
        }
        if let Some(database) = lookup("DB_NAME") {
            self.database.database = Some(database);
        }
        if let Some(dir) = lookup("CMCONNECT_INPUT_DIR") {
            self.paths.input_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("CMCONNECT_LOG_DIR") {
            self.paths.log_dir = PathBuf::from(dir);
        }
        Ok(())
    }
}

//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Default extra connection arguments appended to MySQL data sources.
pub const DEFAULT_DATA_SOURCE_ARGS: &str = "collation=utf8mb4_general_ci";

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Extra `key=value&...` arguments for networked data sources.
    #[serde(default = "default_data_source_args")]
    pub data_source_args: String,

    /// Data sources; index 0 is the base all others are compared against.
    pub data_sources: Vec<DataSourceConfig>,

    /// Command defaults (tables, skip columns, limits).
    #[serde(default)]
    pub commands: CommandsConfig,

    /// Job executor behaviour.
    #[serde(default)]
    pub executor: ExecutorConfig,
}

impl Config {
    /// Enabled data sources in configured order. The base comes first.
    pub fn enabled_sources(&self) -> Vec<DataSourceConfig> {
        self.data_sources
            .iter()
            .filter(|ds| ds.enabled)
            .cloned()
            .collect()
    }
}

/// Supported database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbType {
    /// Networked MySQL/MariaDB server.
    #[default]
    Mysql,
    /// Embedded SQLite database file.
    Sqlite,
}

impl fmt::Display for DbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbType::Mysql => f.write_str("mysql"),
            DbType::Sqlite => f.write_str("sqlite"),
        }
    }
}

/// A single data source.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DataSourceConfig {
    /// Engine type (default: mysql).
    #[serde(default)]
    pub r#type: DbType,

    /// `host:port` for MySQL; an optional directory for SQLite.
    #[serde(default)]
    pub url: String,

    /// Database name for MySQL; database file for SQLite.
    pub schema: String,

    /// Username (MySQL only).
    #[serde(default)]
    pub username: String,

    /// Password (MySQL only).
    #[serde(default)]
    pub password: String,

    /// Whether this data source takes part in runs (default: true).
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl DataSourceConfig {
    /// Identity key used in reports and logs: `url/schema`.
    pub fn key(&self) -> String {
        format!("{}/{}", self.url, self.schema)
    }

    /// Local database file of an SQLite data source.
    ///
    /// A non-empty `url` is treated as the directory holding the file.
    pub fn sqlite_path(&self) -> PathBuf {
        if self.url.is_empty() {
            PathBuf::from(&self.schema)
        } else {
            PathBuf::from(&self.url).join(&self.schema)
        }
    }
}

impl fmt::Debug for DataSourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSourceConfig")
            .field("type", &self.r#type)
            .field("url", &self.url)
            .field("schema", &self.schema)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Defaults for the bdiff and count commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandsConfig {
    /// Tables counted by `count` when none are given on the command line.
    #[serde(default)]
    pub count_tables: Vec<String>,

    /// Tables compared by `bdiff` when none are given on the command line.
    #[serde(default)]
    pub bdiff_tables: Vec<String>,

    /// Columns excluded from row equality (e.g. last-modified timestamps).
    #[serde(default)]
    pub bdiff_skip_columns: Vec<String>,

    /// Tables with more base rows than this are skipped. 0 disables the guard.
    #[serde(default = "default_max_rows")]
    pub bdiff_max_rows: u64,

    /// Rows fetched per target page. 0 fetches the whole table at once.
    #[serde(default = "default_batch_size")]
    pub bdiff_batch_size: u64,

    /// Directory receiving `<table>.csv` reports.
    #[serde(default = "default_output_dir")]
    pub bdiff_output_dir: PathBuf,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            count_tables: Vec::new(),
            bdiff_tables: Vec::new(),
            bdiff_skip_columns: Vec::new(),
            bdiff_max_rows: default_max_rows(),
            bdiff_batch_size: default_batch_size(),
            bdiff_output_dir: default_output_dir(),
        }
    }
}

/// Job executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Jobs buffered per lane before `submit` applies backpressure.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Abort a bdiff run at the next table once any job has failed.
    #[serde(default)]
    pub stop_on_error: bool,

    /// Abandon remaining connect jobs as soon as one fails.
    #[serde(default = "default_true")]
    pub stop_other_jobs_when_error: bool,

    /// Compare all targets of a table concurrently (default: true).
    #[serde(default = "default_true")]
    pub parallel: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            stop_on_error: false,
            stop_other_jobs_when_error: true,
            parallel: true,
        }
    }
}

// Default value functions for serde
fn default_data_source_args() -> String {
    DEFAULT_DATA_SOURCE_ARGS.to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_rows() -> u64 {
    1_000_000
}

fn default_batch_size() -> u64 {
    10_000
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("bdiff")
}

fn default_queue_capacity() -> usize {
    16
}

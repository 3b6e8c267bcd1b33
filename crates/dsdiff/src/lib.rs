//! # dsdiff
//!
//! Multi data source comparison library.
//!
//! Runs the same reads against many independently configured databases and
//! reconciles their contents against a base data source:
//!
//! - **Lane executor** with one ordered queue and worker per data source
//! - **Batched table diff** classifying rows as `EXTRA`, `MISSING` or `DIFF`
//! - **CSV reports** per table, flushed after each data source
//! - **Row counts** of many tables across all data sources
//! - **Row diff** looking up each base row on every data source
//!
//! ## Example
//!
//! ```rust,no_run
//! use dsdiff::{BdiffOptions, Config, Session};
//!
//! #[tokio::main]
//! async fn main() -> dsdiff::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let options = BdiffOptions::from_config(&config);
//!     let tables = config.commands.bdiff_tables.clone();
//!     let session = Session::connect(config).await?;
//!     let summary = session.bdiff(options).run(&tables).await?;
//!     println!("{} missing rows", summary.missing);
//!     session.close().await;
//!     Ok(())
//! }
//! ```

pub mod bdiff;
pub mod config;
pub mod convert;
pub mod count;
pub mod error;
pub mod executor;
pub mod job;
pub mod pool;
pub mod report;
pub mod rowdiff;
pub mod session;

// Re-exports for convenient access
pub use bdiff::{BdiffEngine, BdiffOptions, BdiffSummary, DiffKind, DiffRecord};
pub use config::{Config, DataSourceConfig, DbType};
pub use convert::{Row, RowSet};
pub use count::{CountReport, CountSummary};
pub use error::{DsdiffError, Result};
pub use executor::{JobExecutor, JobState, JobTicket};
pub use job::{Execute, Job, JobContext, JobOutput};
pub use pool::{Connection, ConnectionPool, HealthCheckResult};
pub use rowdiff::{RowDiffReport, RowDiffSummary};
pub use session::Session;

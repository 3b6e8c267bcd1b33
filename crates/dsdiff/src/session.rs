//! Connected session: configuration, connections and executor.

use crate::bdiff::{BdiffEngine, BdiffOptions};
use crate::config::Config;
use crate::count::CountReport;
use crate::error::{DsdiffError, Result};
use crate::executor::JobExecutor;
use crate::job::Job;
use crate::pool::{ConnectionPool, HealthCheckResult};
use crate::rowdiff::RowDiffReport;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Everything a command needs, built once and passed down.
pub struct Session {
    config: Config,
    pool: ConnectionPool,
    executor: Arc<JobExecutor<Job>>,
}

fn start_executor(config: &Config) -> Result<Arc<JobExecutor<Job>>> {
    let lanes = config.enabled_sources().len();
    let executor = Arc::new(JobExecutor::new(lanes, config.executor.queue_capacity)?);
    executor.start();
    Ok(executor)
}

impl Session {
    /// Start an executor with one lane per enabled data source and connect
    /// every data source through it.
    pub async fn connect(config: Config) -> Result<Self> {
        let executor = start_executor(&config)?;
        let pool = match ConnectionPool::bootstrap(&config, &executor).await {
            Ok(pool) => pool,
            Err(e) => {
                executor.shutdown(false).await;
                return Err(e);
            }
        };
        executor.wait_for_idle().await;

        Ok(Self {
            config,
            pool,
            executor,
        })
    }

    /// Probe every enabled data source without keeping connections open.
    pub async fn health_check(config: &Config) -> Result<HealthCheckResult> {
        let executor = start_executor(config)?;
        let result = ConnectionPool::probe(config, &executor).await;
        executor.shutdown(true).await;
        result
    }

    /// Connect a new session for `config`, then close this one.
    ///
    /// On failure this session is returned untouched alongside the error.
    pub async fn reconfigure(self, config: Config) -> std::result::Result<Self, (Self, DsdiffError)> {
        match Session::connect(config).await {
            Ok(next) => {
                info!("Reconfigured: {} data sources", next.pool.len());
                self.close().await;
                Ok(next)
            }
            Err(e) => Err((self, e)),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn executor(&self) -> &JobExecutor<Job> {
        &self.executor
    }

    /// Token that cancels every running command of this session.
    pub fn cancel_token(&self) -> CancellationToken {
        self.executor.cancel_token()
    }

    /// Bdiff engine with the given options.
    pub fn bdiff(&self, options: BdiffOptions) -> BdiffEngine<'_> {
        BdiffEngine::new(&self.pool, &self.executor, options)
    }

    /// Count report writing to `output`.
    pub fn count(&self, output: impl Into<PathBuf>) -> CountReport<'_> {
        CountReport::new(&self.pool, &self.executor, output)
    }

    /// Row diff with the data source at `base_index` as base.
    pub fn row_diff(&self, base_index: usize, output_dir: impl Into<PathBuf>) -> RowDiffReport<'_> {
        RowDiffReport::new(
            &self.pool,
            &self.executor,
            base_index,
            self.config.commands.bdiff_skip_columns.clone(),
            output_dir,
        )
    }

    /// Drain the executor and close all connections.
    pub async fn close(self) {
        self.executor.shutdown(true).await;
        self.pool.close().await;
    }
}

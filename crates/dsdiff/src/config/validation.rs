//! Configuration validation.

use super::{Config, DbType};
use crate::error::{DsdiffError, Result};
use std::collections::HashSet;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    let base = config
        .data_sources
        .first()
        .ok_or_else(|| DsdiffError::Config("at least one data source is required".into()))?;
    if !base.enabled {
        return Err(DsdiffError::Config(
            "data_sources[0] is the base data source and must be enabled".into(),
        ));
    }

    let mut keys = HashSet::new();
    for (i, ds) in config.data_sources.iter().enumerate() {
        if ds.schema.is_empty() {
            return Err(DsdiffError::Config(format!(
                "data_sources[{}].schema is required",
                i
            )));
        }
        if ds.r#type == DbType::Mysql {
            if ds.url.is_empty() {
                return Err(DsdiffError::Config(format!(
                    "data_sources[{}].url is required for mysql",
                    i
                )));
            }
            if ds.username.is_empty() {
                return Err(DsdiffError::Config(format!(
                    "data_sources[{}].username is required for mysql",
                    i
                )));
            }
        }
        if ds.enabled && !keys.insert(ds.key()) {
            return Err(DsdiffError::Config(format!(
                "data source {} is configured more than once",
                ds.key()
            )));
        }
    }

    if config.executor.queue_capacity == 0 {
        return Err(DsdiffError::Config(
            "executor.queue_capacity must be at least 1".into(),
        ));
    }

    if config
        .commands
        .bdiff_output_dir
        .as_os_str()
        .is_empty()
    {
        return Err(DsdiffError::Config(
            "commands.bdiff_output_dir must not be empty".into(),
        ));
    }

    Ok(())
}

//! Configuration validation.

use super::{Config, ConnectionParams};
use crate::error::{DumpError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    ConnectionParams::parse(&config.database_url)?;

    if config.dump_dir.as_os_str().is_empty() {
        return Err(DumpError::Config("dump_dir is required".into()));
    }
    if config.export.schema.trim().is_empty() {
        return Err(DumpError::Config("export.schema is required".into()));
    }
    if config.export.procedure_prefix.is_empty() {
        return Err(DumpError::Config(
            "export.procedure_prefix must not be empty".into(),
        ));
    }
    if config.export.pg_dump_path.as_os_str().is_empty() {
        return Err(DumpError::Config("export.pg_dump_path is required".into()));
    }

    // Only check if explicitly set
    if let Some(0) = config.export.workers {
        return Err(DumpError::Config(
            "export.workers must be at least 1".into(),
        ));
    }

    Ok(())
}

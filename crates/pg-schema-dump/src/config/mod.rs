//! Configuration loading and validation.

mod connection;
mod types;
mod validation;

pub use connection::ConnectionParams;
pub use types::*;

use crate::error::Result;
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Parse the database URL into connection parameters.
    pub fn connection_params(&self) -> Result<ConnectionParams> {
        ConnectionParams::parse(&self.database_url)
    }
}

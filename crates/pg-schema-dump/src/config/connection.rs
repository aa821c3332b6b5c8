//! Connection parameters derived from a database URL.

use crate::error::{DumpError, Result};
use crate::postgres::SslMode;
use percent_encoding::percent_decode_str;
use std::fmt;
use url::Url;

const DEFAULT_PORT: u16 = 5432;
const DEFAULT_HOST: &str = "localhost";

/// Immutable connection settings shared by every worker in a run.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub ssl_mode: SslMode,
}

impl ConnectionParams {
    /// Parse a `postgres://` or `postgresql://` URL.
    ///
    /// Missing host and port fall back to `localhost:5432`, a missing `sslmode`
    /// query parameter means `disable`.
    pub fn parse(database_url: &str) -> Result<Self> {
        if database_url.trim().is_empty() {
            return Err(DumpError::Config("database URL is required".into()));
        }

        let url = Url::parse(database_url.trim())
            .map_err(|e| DumpError::Config(format!("invalid database URL: {}", e)))?;

        match url.scheme() {
            "postgres" | "postgresql" => {}
            other => {
                return Err(DumpError::Config(format!(
                    "unsupported database URL scheme '{}', expected postgres or postgresql",
                    other
                )))
            }
        }

        let host = match url.host_str() {
            Some(h) if !h.is_empty() => h.trim_start_matches('[').trim_end_matches(']').to_string(),
            _ => DEFAULT_HOST.to_string(),
        };
        let port = url.port().unwrap_or(DEFAULT_PORT);

        let user = decode(url.username(), "user")?;
        if user.is_empty() {
            return Err(DumpError::Config("database URL has no user".into()));
        }
        let password = decode(url.password().unwrap_or_default(), "password")?;

        let database = decode(url.path().trim_start_matches('/'), "database name")?;
        if database.is_empty() {
            return Err(DumpError::Config("database URL has no database name".into()));
        }

        let ssl_mode = url
            .query_pairs()
            .find(|(k, _)| k == "sslmode")
            .map(|(_, v)| SslMode::parse(&v))
            .transpose()?
            .unwrap_or(SslMode::Disable);

        Ok(Self {
            host,
            port,
            user,
            password,
            database,
            ssl_mode,
        })
    }

    /// Build a tokio-postgres configuration.
    pub fn pg_config(&self) -> tokio_postgres::Config {
        let mut pg_config = tokio_postgres::Config::new();
        pg_config.host(&self.host);
        pg_config.port(self.port);
        pg_config.dbname(&self.database);
        pg_config.user(&self.user);
        if !self.password.is_empty() {
            pg_config.password(&self.password);
        }
        pg_config.ssl_mode(self.ssl_mode.pg_ssl_mode());
        pg_config
    }
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("database", &self.database)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

fn decode(raw: &str, what: &str) -> Result<String> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|e| DumpError::Config(format!("database URL {} is not valid UTF-8: {}", what, e)))
}

//! PostgreSQL connectivity.
//!
//! - [`build_pool`]: deadpool-postgres pool with TLS chosen from `sslmode`, opened lazily
//! - [`connect_pool`]: [`build_pool`] plus a verifying round trip
//! - [`PgCatalog`]: catalog reader over the pool
//! - [`SslMode`], [`TlsBuilder`]: TLS setup

mod catalog;
mod tls;

pub use catalog::PgCatalog;
pub use tls::{SslMode, TlsBuilder};

use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tracing::{info, warn};

use crate::config::ConnectionParams;
use crate::error::{DumpError, Result};

/// Build a connection pool without opening a connection.
pub fn build_pool(params: &ConnectionParams, max_conns: usize) -> Result<Pool> {
    let pg_config = params.pg_config();
    let mgr_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };

    let mgr = match TlsBuilder::new(params.ssl_mode).build()? {
        Some(tls_connector) => Manager::from_config(pg_config, tls_connector, mgr_config),
        None => {
            warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
            Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config)
        }
    };

    let pool = Pool::builder(mgr)
        .max_size(max_conns.max(1))
        .build()
        .map_err(|e| DumpError::connection(e, "creating PostgreSQL pool"));
    pool
}

/// Open a connection pool and verify it with a round trip.
pub async fn connect_pool(params: &ConnectionParams, max_conns: usize) -> Result<Pool> {
    let pool = build_pool(params, max_conns)?;

    let client = pool
        .get()
        .await
        .map_err(|e| DumpError::connection(e, "connecting to PostgreSQL"))?;
    client
        .simple_query("SELECT 1")
        .await
        .map_err(|e| DumpError::connection(e, "pinging PostgreSQL"))?;

    info!(
        host = %params.host,
        port = params.port,
        dbname = %params.database,
        "Connected to database"
    );

    Ok(pool)
}

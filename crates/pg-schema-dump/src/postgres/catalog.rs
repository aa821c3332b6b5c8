//! Catalog reader backed by a deadpool-postgres pool.

use async_trait::async_trait;
use deadpool_postgres::{Object, Pool, PoolError};
use tokio_postgres::Row;
use tracing::debug;

use crate::catalog::{CatalogObject, CatalogReader, ObjectKind};
use crate::error::{DumpError, Result};

const LIST_TABLES: &str = r#"
    SELECT t.table_name::text
    FROM information_schema.tables t
    WHERE t.table_type = 'BASE TABLE'
      AND t.table_schema = $1
    ORDER BY t.table_name
"#;

// Aggregates and window functions are skipped: pg_get_functiondef rejects them.
const LIST_ROUTINES: &str = r#"
    SELECT p.proname::text, p.prokind::text, pg_catalog.pg_get_functiondef(p.oid)
    FROM pg_catalog.pg_proc p
    JOIN pg_catalog.pg_namespace n ON n.oid = p.pronamespace
    WHERE n.nspname = $1
      AND p.prokind IN ('f', 'p')
"#;

/// PostgreSQL catalog reader.
#[derive(Clone)]
pub struct PgCatalog {
    pool: Pool,
}

impl PgCatalog {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn client(&self) -> std::result::Result<Object, PoolError> {
        self.pool.get().await
    }
}

#[async_trait]
impl CatalogReader for PgCatalog {
    async fn list_tables(&self, schema: &str) -> Result<Vec<String>> {
        let client = self
            .client()
            .await
            .map_err(|e| DumpError::catalog("getting connection for list_tables", e))?;
        let rows = client
            .query(LIST_TABLES, &[&schema])
            .await
            .map_err(|e| DumpError::catalog("querying tables", e))?;

        let tables = rows
            .iter()
            .map(|row| {
                row.try_get::<_, String>(0)
                    .map_err(|e| DumpError::catalog("decoding table row", e))
            })
            .collect::<Result<Vec<_>>>()?;

        debug!("Listed {} tables in schema {}", tables.len(), schema);
        Ok(tables)
    }

    async fn list_routines(&self, schema: &str) -> Result<Vec<CatalogObject>> {
        let client = self
            .client()
            .await
            .map_err(|e| DumpError::catalog("getting connection for list_routines", e))?;
        let rows = client
            .query(LIST_ROUTINES, &[&schema])
            .await
            .map_err(|e| DumpError::catalog("querying routines", e))?;

        let routines = rows
            .iter()
            .map(decode_routine)
            .collect::<Result<Vec<_>>>()?;

        debug!("Listed {} routines in schema {}", routines.len(), schema);
        Ok(routines)
    }

    async fn test_connection(&self) -> Result<()> {
        let client = self
            .client()
            .await
            .map_err(|e| DumpError::connection(e, "getting connection for test_connection"))?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| DumpError::connection(e, "pinging PostgreSQL"))?;
        Ok(())
    }
}

fn decode_routine(row: &Row) -> Result<CatalogObject> {
    let decode = |e: tokio_postgres::Error| DumpError::catalog("decoding routine row", e);
    let name: String = row.try_get(0).map_err(decode)?;
    let prokind: String = row.try_get(1).map_err(decode)?;
    let definition: String = row.try_get(2).map_err(decode)?;

    Ok(CatalogObject::routine(
        name,
        ObjectKind::from_prokind(&prokind),
        definition,
    ))
}

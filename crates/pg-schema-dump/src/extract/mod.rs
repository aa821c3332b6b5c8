//! Table DDL extraction.
//!
//! - [`PgDumpExtractor`]: runs `pg_dump --schema-only` per table
//! - [`NativeExtractor`]: builds `CREATE TABLE` DDL from catalog queries

mod native;
mod pg_dump;

pub use native::{render_table_ddl, ColumnDef, NativeExtractor, TableDef};
pub use pg_dump::PgDumpExtractor;

use async_trait::async_trait;
use deadpool_postgres::Pool;
use std::path::Path;
use std::sync::Arc;

use crate::config::{ConnectionParams, ExportConfig, ExtractorKind};
use crate::error::Result;

/// Produces the schema of one table into a destination file.
#[async_trait]
pub trait SchemaExtractor: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Write the DDL of `schema.table` to `destination`, replacing any existing file.
    async fn dump_table(&self, schema: &str, table: &str, destination: &Path) -> Result<()>;
}

/// Build the extractor selected in the configuration.
pub fn from_config(
    export: &ExportConfig,
    params: Arc<ConnectionParams>,
    pool: Pool,
) -> Arc<dyn SchemaExtractor> {
    match export.extractor {
        ExtractorKind::PgDump => Arc::new(PgDumpExtractor::new(params, &export.pg_dump_path)),
        ExtractorKind::Native => Arc::new(NativeExtractor::new(pool)),
    }
}

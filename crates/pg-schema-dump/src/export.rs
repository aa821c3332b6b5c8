//! Export workers: persist one routed object to disk.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

use crate::catalog::ObjectKind;
use crate::error::{DumpError, Result};
use crate::extract::SchemaExtractor;
use crate::router::ExportTask;

/// Something that can export a single task.
#[async_trait]
pub trait Exporter: Send + Sync {
    async fn export(&self, task: &ExportTask) -> Result<()>;
}

/// Default exporter: tables go through a [`SchemaExtractor`], routines write
/// their fetched definition verbatim.
pub struct ExportWorker {
    schema: String,
    extractor: Arc<dyn SchemaExtractor>,
}

impl ExportWorker {
    pub fn new(schema: impl Into<String>, extractor: Arc<dyn SchemaExtractor>) -> Self {
        Self {
            schema: schema.into(),
            extractor,
        }
    }

    async fn export_inner(&self, task: &ExportTask) -> Result<()> {
        let object = &task.object;
        match object.kind {
            ObjectKind::Table => {
                ensure_parent_dir(&task.destination).await?;
                self.extractor
                    .dump_table(&self.schema, &object.name, &task.destination)
                    .await
            }
            ObjectKind::Function | ObjectKind::Procedure => {
                let definition = object.definition.as_deref().ok_or_else(|| {
                    DumpError::export(&object.name, format!("{} definition is missing", object.kind))
                })?;
                ensure_parent_dir(&task.destination).await?;
                write_file(&task.destination, definition).await
            }
        }
    }
}

#[async_trait]
impl Exporter for ExportWorker {
    async fn export(&self, task: &ExportTask) -> Result<()> {
        let kind = task.object.kind;
        let name = &task.object.name;

        match self.export_inner(task).await {
            Ok(()) => {
                info!(
                    kind = %kind,
                    name = %name,
                    file = %task.destination.display(),
                    "Dumped {}", kind
                );
                Ok(())
            }
            Err(e) => {
                error!(kind = %kind, name = %name, error = %e, "Failed to dump {}", kind);
                Err(e)
            }
        }
    }
}

/// Create the destination's directory if missing. Concurrent callers racing on
/// the same directory all succeed.
pub async fn ensure_parent_dir(destination: &Path) -> Result<()> {
    if let Some(dir) = destination.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| DumpError::file_write(dir, e))?;
    }
    Ok(())
}

async fn write_file(destination: &Path, content: &str) -> Result<()> {
    tokio::fs::write(destination, content)
        .await
        .map_err(|e| DumpError::file_write(destination, e))
}

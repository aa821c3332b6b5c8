//! Table export through the external `pg_dump` tool.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

use super::SchemaExtractor;
use crate::config::ConnectionParams;
use crate::error::{DumpError, Result};

/// Runs `pg_dump --schema-only --no-owner --no-privileges` for one table at a time.
///
/// The password is passed through `PGPASSWORD` on the child process only.
pub struct PgDumpExtractor {
    params: Arc<ConnectionParams>,
    program: PathBuf,
}

impl PgDumpExtractor {
    pub fn new(params: Arc<ConnectionParams>, program: impl Into<PathBuf>) -> Self {
        Self {
            params,
            program: program.into(),
        }
    }

    /// Arguments for dumping `schema.table`.
    pub fn args(&self, schema: &str, table: &str) -> Vec<String> {
        vec![
            "-h".into(),
            self.params.host.clone(),
            "-p".into(),
            self.params.port.to_string(),
            "-U".into(),
            self.params.user.clone(),
            "-d".into(),
            self.params.database.clone(),
            "-t".into(),
            table_pattern(schema, table),
            "--schema-only".into(),
            "--no-owner".into(),
            "--no-privileges".into(),
        ]
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.env("PGSSLMODE", self.params.ssl_mode.as_str());
        if !self.params.password.is_empty() {
            cmd.env("PGPASSWORD", &self.params.password);
        }
        cmd
    }

    /// Run `pg_dump --version` to check the tool can be launched.
    pub async fn version(&self) -> Result<String> {
        let output = Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                DumpError::export(
                    self.program.display().to_string(),
                    format!("failed to launch: {}", e),
                )
            })?;

        if !output.status.success() {
            return Err(DumpError::export(
                self.program.display().to_string(),
                format!("--version exited with {}", output.status),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl SchemaExtractor for PgDumpExtractor {
    fn name(&self) -> &'static str {
        "pg_dump"
    }

    async fn dump_table(&self, schema: &str, table: &str, destination: &Path) -> Result<()> {
        let file = tokio::fs::File::create(destination)
            .await
            .map_err(|e| DumpError::file_write(destination, e))?
            .into_std()
            .await;

        let args = self.args(schema, table);
        debug!("Running {} {}", self.program.display(), args.join(" "));

        let status = self
            .command()
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(file))
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| {
                DumpError::export(
                    table,
                    format!("failed to launch {}: {}", self.program.display(), e),
                )
            })?;

        if !status.success() {
            return Err(DumpError::export(
                table,
                format!("{} exited with {}", self.program.display(), status),
            ));
        }

        Ok(())
    }
}

/// `-t` pattern matching exactly one table; quoting keeps pg_dump from folding case.
fn table_pattern(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_pattern(schema), quote_pattern(table))
}

fn quote_pattern(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

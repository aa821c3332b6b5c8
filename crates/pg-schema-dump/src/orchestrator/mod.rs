//! Run coordinator: creates the dump root, then runs the table phase and the
//! routine phase one after the other.

use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::instrument::WithSubscriber;
use tracing::{error, info, info_span, warn, Dispatch, Instrument};

use crate::catalog::CatalogReader;
use crate::config::{Config, ConnectionParams, ExtractorKind, FailurePolicy};
use crate::dispatch::{DispatchReport, Dispatcher};
use crate::error::{DumpError, Result};
use crate::export::{ExportWorker, Exporter};
use crate::extract::{self, PgDumpExtractor};
use crate::postgres::{build_pool, connect_pool, PgCatalog};
use crate::router::{ExportTask, ObjectRouter};

/// One of the two export phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Tables,
    Routines,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Tables => f.write_str("tables"),
            Phase::Routines => f.write_str("routines"),
        }
    }
}

/// Outcome of one phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase: Phase,

    /// Objects enumerated from the catalog.
    pub found: usize,

    /// Files written successfully.
    pub exported: usize,

    /// Names of objects whose export failed.
    pub failed: Vec<String>,

    /// Set when the phase as a whole failed.
    pub error: Option<String>,
}

impl PhaseResult {
    fn aborted(phase: Phase, error: &DumpError) -> Self {
        Self {
            phase,
            found: 0,
            exported: 0,
            failed: Vec::new(),
            error: Some(error.to_string()),
        }
    }

    fn from_report(
        phase: Phase,
        found: usize,
        report: &DispatchReport,
        error: Option<String>,
    ) -> Self {
        Self {
            phase,
            found,
            exported: report.succeeded(),
            failed: report.failed().into_iter().map(|o| o.name.clone()).collect(),
            error,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of a dump run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DumpResult {
    /// Unique run identifier.
    pub run_id: String,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    pub tables: PhaseResult,
    pub routines: PhaseResult,
}

impl DumpResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Result of a health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub database_connected: bool,
    pub database_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_error: Option<String>,
    /// `pg_dump --version` output when the pg_dump extractor is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pg_dump_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pg_dump_error: Option<String>,
}

impl HealthCheckResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Schema dump orchestrator.
pub struct Orchestrator {
    config: Config,
    catalog: Arc<dyn CatalogReader>,
    dispatcher: Dispatcher,
    router: ObjectRouter,
    log_sink: Dispatch,
}

impl Orchestrator {
    /// Build an orchestrator over explicit collaborators.
    ///
    /// Logs go to the dispatcher current at construction until
    /// [`with_log_sink`](Self::with_log_sink) replaces it.
    pub fn new(config: Config, catalog: Arc<dyn CatalogReader>, exporter: Arc<dyn Exporter>) -> Self {
        let dispatcher = Dispatcher::new(exporter, config.export.get_workers());
        let router = ObjectRouter::new(
            config.dump_dir.clone(),
            config.export.procedure_prefix.clone(),
            config.export.routine_classification,
        );
        Self {
            config,
            catalog,
            dispatcher,
            router,
            log_sink: tracing::dispatcher::get_default(Dispatch::clone),
        }
    }

    /// Connect to PostgreSQL and wire up the catalog reader and export workers.
    pub async fn connect(config: Config) -> Result<Self> {
        let params = Arc::new(config.connection_params()?);
        let pool = connect_pool(&params, Self::pool_size(&config)).await?;
        Ok(Self::from_pool(config, params, pool))
    }

    /// Like [`Orchestrator::connect`], but connections are only opened on first use.
    ///
    /// Used where an unreachable database is something to report rather than abort on.
    pub fn open(config: Config) -> Result<Self> {
        let params = Arc::new(config.connection_params()?);
        let pool = build_pool(&params, Self::pool_size(&config))?;
        Ok(Self::from_pool(config, params, pool))
    }

    // One connection per worker plus one for catalog queries.
    fn pool_size(config: &Config) -> usize {
        config.export.get_workers() + 1
    }

    fn from_pool(config: Config, params: Arc<ConnectionParams>, pool: Pool) -> Self {
        let catalog = Arc::new(PgCatalog::new(pool.clone()));
        let extractor = extract::from_config(&config.export, params, pool);
        info!("Using {} extractor for tables", extractor.name());
        let exporter = Arc::new(ExportWorker::new(config.export.schema.clone(), extractor));

        Self::new(config, catalog, exporter)
    }

    /// Send this orchestrator's logs, including those of spawned workers, to `sink`.
    pub fn with_log_sink(mut self, sink: Dispatch) -> Self {
        self.log_sink = sink;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run both phases.
    ///
    /// Only failing to create the dump root is returned as an error. Phase
    /// failures are logged and reported in the result.
    pub async fn run(&self) -> Result<DumpResult> {
        let sink = self.log_sink.clone();
        let run_id = uuid::Uuid::new_v4().to_string();
        // The span must belong to the sink it is entered under.
        let span = tracing::dispatcher::with_default(&sink, || info_span!("dump", run_id = %run_id));

        self.run_inner(run_id).instrument(span).with_subscriber(sink).await
    }

    async fn run_inner(&self, run_id: String) -> Result<DumpResult> {
        let started_at = Utc::now();
        let dump_dir = self.router.dump_root();

        info!(
            schema = %self.config.export.schema,
            dump_dir = %dump_dir.display(),
            "Starting schema dump"
        );

        tokio::fs::create_dir_all(dump_dir).await.map_err(|e| {
            error!("Failed to create dump directory {}: {}", dump_dir.display(), e);
            DumpError::Io(e)
        })?;

        let tables = self.dump_tables().await;
        let routines = self.dump_routines().await;

        let completed_at = Utc::now();
        let duration_seconds = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;

        info!("Schema dump finished in {:.2}s", duration_seconds);

        Ok(DumpResult {
            run_id,
            started_at,
            completed_at,
            duration_seconds,
            tables,
            routines,
        })
    }

    async fn dump_tables(&self) -> PhaseResult {
        info!("Start dumping tables");

        let names = match self.catalog.list_tables(&self.config.export.schema).await {
            Ok(names) => names,
            Err(e) => {
                error!(error = %e, "Failed to dump tables");
                return PhaseResult::aborted(Phase::Tables, &e);
            }
        };

        let found = names.len();
        if found == 0 {
            info!("No tables found");
        } else {
            info!(count = found as u64, "Found tables for dumping");
        }

        let tasks = self.router.plan_tables(names);
        let result = self
            .run_phase(Phase::Tables, found, tasks, self.config.export.table_failure_policy)
            .await;
        if result.is_success() {
            info!("Finish dumping tables");
        }
        result
    }

    async fn dump_routines(&self) -> PhaseResult {
        info!("Start dumping functions and procedures");

        let routines = match self.catalog.list_routines(&self.config.export.schema).await {
            Ok(routines) => routines,
            Err(e) => {
                error!(error = %e, "Failed to dump functions and procedures");
                return PhaseResult::aborted(Phase::Routines, &e);
            }
        };

        let found = routines.len();
        if found == 0 {
            info!("No functions or procedures found");
        } else {
            info!(count = found as u64, "Found functions and procedures for dumping");
        }

        let tasks = self.router.plan_routines(routines);
        let result = self
            .run_phase(Phase::Routines, found, tasks, self.config.export.routine_failure_policy)
            .await;
        if result.is_success() {
            info!("Finish dumping functions and procedures");
        }
        result
    }

    async fn run_phase(
        &self,
        phase: Phase,
        found: usize,
        tasks: Vec<ExportTask>,
        policy: FailurePolicy,
    ) -> PhaseResult {
        if tasks.is_empty() {
            return PhaseResult::from_report(phase, found, &DispatchReport::default(), None);
        }

        match self.dispatcher.run(tasks, policy).await {
            Ok(report) => {
                let result = PhaseResult::from_report(phase, found, &report, None);
                if !result.failed.is_empty() {
                    warn!(
                        "Phase {} completed with {} failed objects: {:?}",
                        phase,
                        result.failed.len(),
                        result.failed
                    );
                }
                result
            }
            Err(failure) => {
                error!(error = %failure.error, "Phase {} failed", phase);
                let message = failure.error.to_string();
                PhaseResult::from_report(phase, found, &failure.report, Some(message))
            }
        }
    }

    /// Enumerate both phases and return the routed tasks without writing anything.
    pub async fn plan(&self) -> Result<Vec<ExportTask>> {
        async {
            let schema = &self.config.export.schema;
            let mut tasks = self.router.plan_tables(self.catalog.list_tables(schema).await?);
            tasks.extend(self.router.plan_routines(self.catalog.list_routines(schema).await?));
            info!("Planned {} exports", tasks.len());
            Ok(tasks)
        }
        .with_subscriber(self.log_sink.clone())
        .await
    }

    /// Check database connectivity and, for the pg_dump extractor, that the tool runs.
    pub async fn health_check(&self) -> HealthCheckResult {
        let start = std::time::Instant::now();
        let db = self.catalog.test_connection().await;
        let database_latency_ms = start.elapsed().as_millis() as u64;

        let (pg_dump_version, pg_dump_error) = match self.config.export.extractor {
            ExtractorKind::Native => (None, None),
            ExtractorKind::PgDump => {
                let tool = self.config.connection_params().map(|params| {
                    PgDumpExtractor::new(Arc::new(params), &self.config.export.pg_dump_path)
                });
                match tool {
                    Ok(tool) => match tool.version().await {
                        Ok(version) => (Some(version), None),
                        Err(e) => (None, Some(e.to_string())),
                    },
                    Err(e) => (None, Some(e.to_string())),
                }
            }
        };

        let database_connected = db.is_ok();
        HealthCheckResult {
            healthy: database_connected && pg_dump_error.is_none(),
            database_connected,
            database_latency_ms,
            database_error: db.err().map(|e| e.to_string()),
            pg_dump_version,
            pg_dump_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogObject, ObjectKind};
    use crate::config::RoutineClassification;
    use crate::extract::SchemaExtractor;
    use crate::logging::capture_sink;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// In-memory catalog.
    #[derive(Default)]
    struct FakeCatalog {
        tables: Vec<String>,
        routines: Vec<CatalogObject>,
        fail_tables: bool,
        fail_routines: bool,
    }

    impl FakeCatalog {
        fn new(tables: &[&str], routines: &[(&str, ObjectKind)]) -> Self {
            Self {
                tables: tables.iter().map(|s| s.to_string()).collect(),
                routines: routines
                    .iter()
                    .map(|(name, kind)| {
                        CatalogObject::routine(*name, *kind, format!("CREATE {} {}();\n", kind, name))
                    })
                    .collect(),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl CatalogReader for FakeCatalog {
        async fn list_tables(&self, _schema: &str) -> Result<Vec<String>> {
            if self.fail_tables {
                return Err(DumpError::catalog("listing tables", "relation does not exist"));
            }
            let mut tables = self.tables.clone();
            tables.sort();
            Ok(tables)
        }

        async fn list_routines(&self, _schema: &str) -> Result<Vec<CatalogObject>> {
            if self.fail_routines {
                return Err(DumpError::catalog("listing routines", "permission denied"));
            }
            Ok(self.routines.clone())
        }

        async fn test_connection(&self) -> Result<()> {
            Ok(())
        }
    }

    /// Writes a one-line DDL stub per table; fails for chosen tables.
    #[derive(Default)]
    struct ScriptedExtractor {
        fail: HashSet<String>,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    #[async_trait]
    impl SchemaExtractor for ScriptedExtractor {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn dump_table(&self, schema: &str, table: &str, destination: &Path) -> Result<()> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if self.fail.contains(table) {
                return Err(DumpError::export(table, "pg_dump exited with exit status: 1"));
            }
            tokio::fs::write(destination, format!("CREATE TABLE {}.{} ();\n", schema, table))
                .await
                .map_err(|e| DumpError::file_write(destination, e))
        }
    }

    fn orchestrator(
        dump_dir: &Path,
        catalog: FakeCatalog,
        extractor: Arc<ScriptedExtractor>,
    ) -> Orchestrator {
        let config = Config::new("postgres://app@localhost/shop", dump_dir);
        orchestrator_with(config, catalog, extractor)
    }

    fn orchestrator_with(
        config: Config,
        catalog: FakeCatalog,
        extractor: Arc<ScriptedExtractor>,
    ) -> Orchestrator {
        let exporter = Arc::new(ExportWorker::new(config.export.schema.clone(), extractor));
        Orchestrator::new(config, Arc::new(catalog), exporter)
    }

    fn sql_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = match std::fs::read_dir(dir) {
            Ok(entries) => entries
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        };
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_users_orders_and_procedure() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("db_dump");
        let catalog = FakeCatalog::new(&["users", "orders"], &[("spCalcTotal", ObjectKind::Function)]);

        let result = orchestrator(&root, catalog, Arc::default()).run().await.unwrap();

        assert_eq!(sql_files(&root.join("tables")), ["orders.sql", "users.sql"]);
        assert_eq!(sql_files(&root.join("procedures")), ["spCalcTotal.sql"]);
        assert!(sql_files(&root.join("functions")).is_empty());

        assert!(result.tables.is_success());
        assert!(result.routines.is_success());
        assert_eq!(result.tables.found, 2);
        assert_eq!(result.tables.exported, 2);
        assert_eq!(result.routines.exported, 1);

        let body = std::fs::read_to_string(root.join("procedures/spCalcTotal.sql")).unwrap();
        assert_eq!(body, "CREATE function spCalcTotal();\n");
    }

    #[tokio::test]
    async fn test_empty_catalog_succeeds_with_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("out");

        let result = orchestrator(&root, FakeCatalog::default(), Arc::default())
            .run()
            .await
            .unwrap();

        assert!(root.is_dir());
        assert!(sql_files(&root).is_empty());
        for phase in [&result.tables, &result.routines] {
            assert!(phase.is_success());
            assert_eq!(phase.found, 0);
            assert_eq!(phase.exported, 0);
        }
    }

    #[tokio::test]
    async fn test_empty_catalog_logs_nothing_found() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, mut rx) = capture_sink();
        let orch = orchestrator(dir.path(), FakeCatalog::default(), Arc::default())
            .with_log_sink(sink);

        orch.run().await.unwrap();

        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        assert!(lines.iter().any(|l| l == "INFO  No tables found"));
        assert!(lines.iter().any(|l| l == "INFO  No functions or procedures found"));
        assert!(!lines.iter().any(|l| l.contains("for dumping")));
    }

    #[tokio::test]
    async fn test_path_like_names_stay_inside_their_directory() {
        let dir = tempfile::tempdir().unwrap();
        let parent = dir.path().join("a");
        let root = parent.join("db_dump");
        let catalog = FakeCatalog::new(
            &["../../escaped"],
            &[("../tables/users", ObjectKind::Function)],
        );

        let result = orchestrator(&root, catalog, Arc::default()).run().await.unwrap();

        assert!(result.tables.is_success());
        assert!(result.routines.is_success());
        assert!(!parent.join("escaped.sql").exists());
        assert!(!dir.path().join("escaped.sql").exists());
        assert_eq!(sql_files(&parent), ["db_dump"]);
        assert_eq!(sql_files(&root), ["functions", "tables"]);
        assert_eq!(sql_files(&root.join("tables")), ["..%2F..%2Fescaped.sql"]);
        assert_eq!(sql_files(&root.join("functions")), ["..%2Ftables%2Fusers.sql"]);
    }

    #[tokio::test]
    async fn test_file_counts_follow_prefix_rule() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let catalog = FakeCatalog::new(
            &["a", "b", "c"],
            &[
                ("spArchive", ObjectKind::Procedure),
                ("spReindex", ObjectKind::Function),
                ("calc_tax", ObjectKind::Function),
                ("format_name", ObjectKind::Procedure),
            ],
        );

        orchestrator(&root, catalog, Arc::default()).run().await.unwrap();

        assert_eq!(sql_files(&root.join("tables")).len(), 3);
        assert_eq!(
            sql_files(&root.join("procedures")),
            ["spArchive.sql", "spReindex.sql"]
        );
        assert_eq!(
            sql_files(&root.join("functions")),
            ["calc_tax.sql", "format_name.sql"]
        );
    }

    #[tokio::test]
    async fn test_catalog_kind_classification() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::new("postgres://app@localhost/shop", dir.path());
        config.export.routine_classification = RoutineClassification::CatalogKind;
        let catalog = FakeCatalog::new(
            &[],
            &[
                ("spLooksLikeProc", ObjectKind::Function),
                ("archive", ObjectKind::Procedure),
            ],
        );

        orchestrator_with(config, catalog, Arc::default())
            .run()
            .await
            .unwrap();

        assert_eq!(sql_files(&dir.path().join("functions")), ["spLooksLikeProc.sql"]);
        assert_eq!(sql_files(&dir.path().join("procedures")), ["archive.sql"]);
    }

    #[tokio::test]
    async fn test_table_failure_does_not_fail_phase() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let extractor = Arc::new(ScriptedExtractor {
            fail: ["orders".to_string()].into_iter().collect(),
            ..Default::default()
        });
        let catalog = FakeCatalog::new(
            &["customers", "orders", "users"],
            &[("calc", ObjectKind::Function)],
        );

        let result = orchestrator(&root, catalog, extractor).run().await.unwrap();

        assert!(result.tables.is_success());
        assert_eq!(result.tables.found, 3);
        assert_eq!(result.tables.exported, 2);
        assert_eq!(result.tables.failed, ["orders"]);
        assert_eq!(
            sql_files(&root.join("tables")),
            ["customers.sql", "users.sql"]
        );
        // The routine phase still ran.
        assert_eq!(sql_files(&root.join("functions")), ["calc.sql"]);
    }

    #[tokio::test]
    async fn test_routine_failure_fails_phase_but_writes_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        // A directory where the file should go makes the write fail.
        std::fs::create_dir_all(root.join("functions").join("broken.sql")).unwrap();
        let catalog = FakeCatalog::new(
            &[],
            &[
                ("alpha", ObjectKind::Function),
                ("broken", ObjectKind::Function),
                ("spOmega", ObjectKind::Procedure),
            ],
        );

        let result = orchestrator(&root, catalog, Arc::default()).run().await.unwrap();

        assert!(!result.routines.is_success());
        assert!(result.routines.error.as_deref().unwrap().contains("broken.sql"));
        assert_eq!(result.routines.failed, ["broken"]);
        assert_eq!(result.routines.exported, 2);
        assert!(root.join("functions/alpha.sql").is_file());
        assert!(root.join("procedures/spOmega.sql").is_file());
    }

    #[tokio::test]
    async fn test_catalog_error_aborts_only_its_phase() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let mut catalog = FakeCatalog::new(&["users"], &[("spCalcTotal", ObjectKind::Procedure)]);
        catalog.fail_tables = true;

        let result = orchestrator(&root, catalog, Arc::default()).run().await.unwrap();

        assert!(!result.tables.is_success());
        assert_eq!(result.tables.found, 0);
        assert!(!root.join("tables").exists());
        assert!(result.routines.is_success());
        assert!(root.join("procedures/spCalcTotal.sql").is_file());
    }

    #[tokio::test]
    async fn test_rerun_overwrites_with_identical_content() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let orch = orchestrator(
            &root,
            FakeCatalog::new(&["users", "orders"], &[("spCalcTotal", ObjectKind::Procedure)]),
            Arc::default(),
        );

        orch.run().await.unwrap();
        let first = std::fs::read_to_string(root.join("tables/users.sql")).unwrap();
        orch.run().await.unwrap();
        let second = std::fs::read_to_string(root.join("tables/users.sql")).unwrap();

        assert_eq!(first, second);
        assert_eq!(sql_files(&root.join("tables")).len(), 2);
        assert_eq!(sql_files(&root.join("procedures")).len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_twenty_tables_never_exceed_five_workers() {
        let dir = tempfile::tempdir().unwrap();
        let names: Vec<String> = (0..20).map(|i| format!("t{:02}", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let extractor = Arc::new(ScriptedExtractor::default());

        let result = orchestrator(dir.path(), FakeCatalog::new(&refs, &[]), extractor.clone())
            .run()
            .await
            .unwrap();

        assert_eq!(result.tables.exported, 20);
        let max = extractor.max_active.load(Ordering::SeqCst);
        assert!(max <= 5, "observed {} concurrent exports", max);
    }

    #[tokio::test]
    async fn test_unwritable_dump_root_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "").unwrap();

        let err = orchestrator(&blocker.join("dump"), FakeCatalog::default(), Arc::default())
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, DumpError::Io(_)));
        assert_eq!(err.exit_code(), 4);
    }

    #[tokio::test]
    async fn test_logs_reach_the_sink_from_workers() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, mut rx) = capture_sink();
        let orch = orchestrator(
            dir.path(),
            FakeCatalog::new(&["users"], &[("calc", ObjectKind::Function)]),
            Arc::default(),
        )
        .with_log_sink(sink);

        orch.run().await.unwrap();

        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        assert!(lines.iter().any(|l| l == "INFO  Start dumping tables"));
        assert!(lines
            .iter()
            .any(|l| l.starts_with("INFO  Found tables for dumping") && l.contains("count=1")));
        assert!(lines
            .iter()
            .any(|l| l.starts_with("INFO  Dumped table") && l.contains("name=users")));
        assert!(lines
            .iter()
            .any(|l| l.starts_with("INFO  Dumped function") && l.contains("name=calc")));
    }

    #[tokio::test]
    async fn test_plan_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("db_dump");
        let orch = orchestrator(
            &root,
            FakeCatalog::new(&["users"], &[("spCalcTotal", ObjectKind::Procedure)]),
            Arc::default(),
        );

        let tasks = orch.plan().await.unwrap();

        let destinations: Vec<PathBuf> = tasks.into_iter().map(|t| t.destination).collect();
        assert_eq!(
            destinations,
            [
                root.join("tables").join("users.sql"),
                root.join("procedures").join("spCalcTotal.sql"),
            ]
        );
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_health_check_native_extractor() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::new("postgres://app@localhost/shop", dir.path());
        config.export.extractor = ExtractorKind::Native;

        let health = orchestrator_with(config, FakeCatalog::default(), Arc::default())
            .health_check()
            .await;

        assert!(health.healthy);
        assert!(health.database_connected);
        assert!(health.pg_dump_version.is_none());
    }

    #[tokio::test]
    async fn test_health_check_reports_unreachable_database() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::new("postgres://app@127.0.0.1:1/shop", dir.path());
        config.export.extractor = ExtractorKind::Native;

        let health = Orchestrator::open(config).unwrap().health_check().await;

        assert!(!health.healthy);
        assert!(!health.database_connected);
        assert!(health.database_error.is_some());
    }

    #[tokio::test]
    async fn test_health_check_reports_missing_pg_dump() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::new("postgres://app@localhost/shop", dir.path());
        config.export.pg_dump_path = PathBuf::from("/nonexistent/bin/pg_dump");

        let health = orchestrator_with(config, FakeCatalog::default(), Arc::default())
            .health_check()
            .await;

        assert!(!health.healthy);
        assert!(health.database_connected);
        assert!(health.pg_dump_error.is_some());
        let json = health.to_json().unwrap();
        assert!(json.contains("\"pg_dump_error\""));
    }

    #[test]
    fn test_dump_result_json() {
        let now = Utc::now();
        let phase = |phase| PhaseResult {
            phase,
            found: 1,
            exported: 1,
            failed: Vec::new(),
            error: None,
        };
        let result = DumpResult {
            run_id: "run-1".into(),
            started_at: now,
            completed_at: now,
            duration_seconds: 0.5,
            tables: phase(Phase::Tables),
            routines: phase(Phase::Routines),
        };

        let json: serde_json::Value = serde_json::from_str(&result.to_json().unwrap()).unwrap();
        assert_eq!(json["tables"]["phase"], "tables");
        assert_eq!(json["routines"]["exported"], 1);
        assert!(json["routines"]["error"].is_null());
    }
}

//! Bounded fan-out of export tasks.
//!
//! All tasks of a phase are spawned onto the runtime, gated by a semaphore so
//! that at most `concurrency` exports run at once. Outcomes are collected in
//! completion order. Admitted tasks always run to completion; the
//! [`FailurePolicy`] only decides what the phase reports.

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::instrument::WithSubscriber;
use tracing::{debug, error, warn, Instrument};

use crate::catalog::ObjectKind;
use crate::config::FailurePolicy;
use crate::error::DumpError;
use crate::export::Exporter;
use crate::router::ExportTask;

/// Outcome of one export task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub name: String,
    pub kind: ObjectKind,
    pub destination: PathBuf,
    /// Error message when the export failed.
    pub error: Option<String>,
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-task outcomes of one dispatch, in completion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchReport {
    pub outcomes: Vec<TaskOutcome>,
}

/// A fail-fast dispatch that saw at least one failure.
///
/// Carries the first error observed and the outcomes of every task.
#[derive(Debug)]
pub struct DispatchFailure {
    pub error: DumpError,
    pub report: DispatchReport,
}

impl From<DispatchFailure> for DumpError {
    fn from(failure: DispatchFailure) -> Self {
        failure.error
    }
}

impl DispatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> Vec<&TaskOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success()).collect()
    }
}

/// Runs export tasks under a fixed concurrency ceiling.
pub struct Dispatcher {
    exporter: Arc<dyn Exporter>,
    concurrency: usize,
}

impl Dispatcher {
    pub fn new(exporter: Arc<dyn Exporter>, concurrency: usize) -> Self {
        Self {
            exporter,
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Export every task and wait for all of them.
    ///
    /// With [`FailurePolicy::BestEffort`] this always returns the full report.
    /// With [`FailurePolicy::FailFast`] the first failure observed is returned
    /// once every task has finished.
    pub async fn run(
        &self,
        tasks: Vec<ExportTask>,
        policy: FailurePolicy,
    ) -> std::result::Result<DispatchReport, DispatchFailure> {
        let total = tasks.len();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut join_set = JoinSet::new();

        debug!(
            "Dispatching {} tasks with {} workers ({:?})",
            total, self.concurrency, policy
        );

        for task in tasks {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => unreachable!("dispatch semaphore is never closed"),
            };
            let exporter = self.exporter.clone();

            let job = async move {
                let result = AssertUnwindSafe(exporter.export(&task))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| {
                        Err(DumpError::TaskPanicked(format!(
                            "{} {}: {}",
                            task.object.kind,
                            task.object.name,
                            panic_message(payload.as_ref())
                        )))
                    });
                drop(permit);
                (task, result)
            };
            join_set.spawn(job.in_current_span().with_current_subscriber());
        }

        let mut report = DispatchReport::default();
        let mut first_error: Option<DumpError> = None;

        while let Some(joined) = join_set.join_next().await {
            let (task, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    // Panics are caught inside the task, so this is a runtime shutdown.
                    error!("Export task did not complete: {}", e);
                    first_error.get_or_insert(DumpError::TaskPanicked(e.to_string()));
                    continue;
                }
            };

            let error = match result {
                Ok(()) => None,
                Err(e) => {
                    let message = e.to_string();
                    if policy == FailurePolicy::BestEffort {
                        warn!(
                            kind = %task.object.kind,
                            name = %task.object.name,
                            "Continuing after failed export"
                        );
                    }
                    first_error.get_or_insert(e);
                    Some(message)
                }
            };

            report.outcomes.push(TaskOutcome {
                name: task.object.name,
                kind: task.object.kind,
                destination: task.destination,
                error,
            });
        }

        match (policy, first_error) {
            (FailurePolicy::FailFast, Some(error)) => Err(DispatchFailure { error, report }),
            _ => Ok(report),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// End-to-End Cleanup Run
//
// Runs the full pipeline for one configured window:
// history → drops → resolution → plan → execution → report

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, info_span};
use uuid::Uuid;

use crate::config::{CleanupConfig, ConfigError};
use crate::drops::{extract_drops, DropEvent};
use crate::execute::{DeletionExecutor, ExecutionResult, ObjectStorage, Outcome};
use crate::history::{window_start, Catalog, CatalogError, Commit, CommitHistoryReader};
use crate::plan::{build_plan, DeletionPlan};
use crate::resolve::{
    Resolution, ResolutionError, SkipReason, StoragePrefix, TableLocationResolver,
};

/// Errors that abort a run.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("catalog unavailable: {0}")]
    CatalogUnavailable(#[from] CatalogError),

    #[error("resolution error: {0}")]
    Resolution(#[from] ResolutionError),
}

/// Everything decided before storage is touched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupPlan {
    pub since: DateTime<Utc>,
    pub resolutions: Vec<(DropEvent, Resolution)>,
    pub plan: DeletionPlan,
}

/// Final state of one dropped table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TableStatus {
    Simulated { prefix: StoragePrefix, detail: String },
    Deleted { prefix: StoragePrefix, detail: String },
    Failed { prefix: StoragePrefix, error: String },
    Skipped { reason: SkipReason },
}

impl fmt::Display for TableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableStatus::Simulated { prefix, detail } => {
                write!(f, "simulated {prefix} ({detail})")
            }
            TableStatus::Deleted { prefix, detail } => write!(f, "deleted {prefix} ({detail})"),
            TableStatus::Failed { prefix, error } => write!(f, "failed {prefix}: {error}"),
            TableStatus::Skipped { reason } => write!(f, "skipped: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableReport {
    pub drop: DropEvent,
    pub status: TableStatus,
}

/// Summary of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub run_id: Uuid,
    pub since: DateTime<Utc>,
    pub dry_run: bool,
    pub tables: Vec<TableReport>,
    pub results: Vec<ExecutionResult>,
}

impl CleanupReport {
    pub fn count(&self, outcome: Outcome) -> usize {
        self.results.iter().filter(|r| r.outcome == outcome).count()
    }

    pub fn skipped(&self) -> usize {
        self.tables
            .iter()
            .filter(|t| matches!(t.status, TableStatus::Skipped { .. }))
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ExecutionResult> {
        self.results.iter().filter(|r| r.is_failure())
    }

    /// At least one directive ran and none succeeded.
    pub fn all_failed(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(ExecutionResult::is_failure)
    }
}

/// Read history, resolve every drop and build the deletion plan.
///
/// Catalog failures at any step abort; partial history is never planned.
pub fn plan_cleanup<C: Catalog + ?Sized>(
    config: &CleanupConfig,
    catalog: &C,
    now: DateTime<Utc>,
) -> Result<CleanupPlan, RunError> {
    let since = window_start(config.days, now);

    let commits = CommitHistoryReader::new(catalog)
        .fetch(config.days, now)
        .collect::<Result<Vec<Commit>, CatalogError>>()?;

    let drops = extract_drops(&commits);
    info!(
        commits = commits.len(),
        drops = drops.len(),
        since = %since,
        "scanned catalog history"
    );

    let resolver = TableLocationResolver::new(catalog, &config.storage_root);
    let mut resolutions = Vec::with_capacity(drops.len());
    for drop in drops {
        let resolution = resolver.resolve(&drop)?;
        match &resolution {
            Resolution::Resolved(location) => info!(
                table = %drop.table,
                commit = %drop.commit_id,
                prefix = %location.prefix,
                "resolved dropped table"
            ),
            Resolution::Skipped(reason) => info!(
                table = %drop.table,
                commit = %drop.commit_id,
                %reason,
                "nothing to delete"
            ),
        }
        resolutions.push((drop, resolution));
    }

    let plan = build_plan(
        resolutions
            .iter()
            .filter_map(|(_, resolution)| resolution.location().cloned()),
    );

    Ok(CleanupPlan {
        since,
        resolutions,
        plan,
    })
}

/// Run the whole pipeline and report per-table outcomes.
///
/// Directive failures are collected in the report, not returned as errors.
pub fn run_cleanup<C, S>(
    config: &CleanupConfig,
    catalog: &C,
    storage: &S,
    now: DateTime<Utc>,
) -> Result<CleanupReport, RunError>
where
    C: Catalog + ?Sized,
    S: ObjectStorage + ?Sized,
{
    let run_id = Uuid::new_v4();
    let span = info_span!("cleanup", %run_id, dry_run = config.dry_run, days = config.days);
    let _guard = span.enter();

    let CleanupPlan {
        since,
        resolutions,
        plan,
    } = plan_cleanup(config, catalog, now)?;

    info!(directives = plan.len(), "executing deletion plan");
    let results = DeletionExecutor::new(storage).execute_plan(&plan, config.dry_run);

    let tables = resolutions
        .into_iter()
        .map(|(drop, resolution)| {
            let status = table_status(&drop, resolution, &results);
            TableReport { drop, status }
        })
        .collect();

    let report = CleanupReport {
        run_id,
        since,
        dry_run: config.dry_run,
        tables,
        results,
    };

    info!(
        simulated = report.count(Outcome::Simulated),
        deleted = report.count(Outcome::Deleted),
        failed = report.count(Outcome::Failed),
        skipped = report.skipped(),
        "cleanup finished"
    );

    Ok(report)
}

fn table_status(
    drop: &DropEvent,
    resolution: Resolution,
    results: &[ExecutionResult],
) -> TableStatus {
    let location = match resolution {
        Resolution::Resolved(location) => location,
        Resolution::Skipped(reason) => return TableStatus::Skipped { reason },
    };

    let result = results.iter().find(|r| {
        r.directive
            .sources
            .iter()
            .any(|source| source.commit_id == drop.commit_id)
    });

    match result {
        Some(result) => {
            let prefix = result.directive.prefix.clone();
            match result.outcome {
                Outcome::Simulated => TableStatus::Simulated {
                    prefix,
                    detail: result.detail.clone(),
                },
                Outcome::Deleted => TableStatus::Deleted {
                    prefix,
                    detail: result.detail.clone(),
                },
                Outcome::Failed => TableStatus::Failed {
                    prefix,
                    error: result.detail.clone(),
                },
            }
        }
        // Every resolved location is planned, so this only happens if the
        // plan and the resolutions were built from different inputs.
        None => TableStatus::Failed {
            prefix: location.prefix,
            error: "no directive was executed for this table".into(),
        },
    }
}

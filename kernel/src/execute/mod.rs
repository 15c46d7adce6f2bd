// Deletion Execution
//
// Applies or simulates deletion directives against a storage backend.
// Each directive is independent: a failure is recorded and the next
// directive still runs.

use serde::Serialize;
use tracing::{error, info};

use crate::plan::{DeletionDirective, DeletionPlan};
use crate::resolve::StoragePrefix;

/// Recursive prefix deletion primitive.
///
/// Implementations MUST keep the two paths separate: `simulate_delete`
/// never mutates storage.
pub trait ObjectStorage {
    /// Report every object a recursive delete of `prefix` would remove.
    fn simulate_delete(&self, prefix: &StoragePrefix) -> Result<Vec<String>, StorageError>;

    /// Recursively delete everything under `prefix`, returning what was removed.
    fn delete_recursive(&self, prefix: &StoragePrefix) -> Result<Vec<String>, StorageError>;
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("invalid storage prefix `{0}`")]
    InvalidPrefix(String),

    #[error("storage request failed: {0}")]
    Request(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Simulated,
    Deleted,
    Failed,
}

/// Result of running one directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub directive: DeletionDirective,
    pub outcome: Outcome,

    /// Objects removed, or that would be removed in dry-run.
    pub objects: Vec<String>,
    pub detail: String,
}

impl ExecutionResult {
    pub fn is_failure(&self) -> bool {
        self.outcome == Outcome::Failed
    }
}

pub struct DeletionExecutor<'a, S: ObjectStorage + ?Sized> {
    storage: &'a S,
}

impl<'a, S: ObjectStorage + ?Sized> DeletionExecutor<'a, S> {
    pub fn new(storage: &'a S) -> Self {
        Self { storage }
    }

    /// Run a single directive. Never fails: errors become `Outcome::Failed`.
    pub fn execute(&self, directive: DeletionDirective, dry_run: bool) -> ExecutionResult {
        let prefix = &directive.prefix;

        let result = if dry_run {
            self.storage.simulate_delete(prefix)
        } else {
            self.storage.delete_recursive(prefix)
        };

        match result {
            Ok(objects) => {
                let (outcome, detail) = if dry_run {
                    (
                        Outcome::Simulated,
                        format!("would remove {} objects", objects.len()),
                    )
                } else {
                    (Outcome::Deleted, format!("removed {} objects", objects.len()))
                };
                info!(prefix = %prefix, objects = objects.len(), dry_run, "{detail}");
                ExecutionResult {
                    directive,
                    outcome,
                    objects,
                    detail,
                }
            }
            Err(err) => {
                error!(prefix = %prefix, error = %err, dry_run, "directive failed");
                ExecutionResult {
                    directive,
                    outcome: Outcome::Failed,
                    objects: Vec::new(),
                    detail: err.to_string(),
                }
            }
        }
    }

    /// Run every directive of `plan` in order, collecting all results.
    pub fn execute_plan(&self, plan: &DeletionPlan, dry_run: bool) -> Vec<ExecutionResult> {
        plan.directives
            .iter()
            .cloned()
            .map(|directive| self.execute(directive, dry_run))
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashSet;

    /// Records which path was taken for which prefix.
    #[derive(Debug, Default)]
    pub struct RecordingStorage {
        pub simulated: RefCell<Vec<String>>,
        pub deleted: RefCell<Vec<String>>,
        pub failing: HashSet<String>,
    }

    impl RecordingStorage {
        pub fn failing_on(prefixes: &[&str]) -> Self {
            Self {
                failing: prefixes.iter().map(|p| p.to_string()).collect(),
                ..Self::default()
            }
        }

        fn check(&self, prefix: &StoragePrefix) -> Result<Vec<String>, StorageError> {
            if self.failing.contains(prefix.as_str()) {
                return Err(StorageError::AccessDenied(prefix.to_string()));
            }
            Ok(vec![format!("{prefix}metadata/00001.metadata.json")])
        }
    }

    impl ObjectStorage for RecordingStorage {
        fn simulate_delete(&self, prefix: &StoragePrefix) -> Result<Vec<String>, StorageError> {
            self.simulated.borrow_mut().push(prefix.to_string());
            self.check(prefix)
        }

        fn delete_recursive(&self, prefix: &StoragePrefix) -> Result<Vec<String>, StorageError> {
            self.deleted.borrow_mut().push(prefix.to_string());
            self.check(prefix)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingStorage;
    use super::*;

    fn directive(prefix: &str) -> DeletionDirective {
        DeletionDirective {
            prefix: StoragePrefix::new(prefix),
            sources: Vec::new(),
        }
    }

    fn plan(prefixes: &[&str]) -> DeletionPlan {
        DeletionPlan {
            directives: prefixes.iter().map(|p| directive(p)).collect(),
        }
    }

    #[test]
    fn dry_run_only_simulates() {
        let storage = RecordingStorage::default();
        let results = DeletionExecutor::new(&storage).execute_plan(&plan(&["s3://b/a"]), true);

        assert_eq!(results[0].outcome, Outcome::Simulated);
        assert_eq!(storage.simulated.borrow().len(), 1);
        assert!(storage.deleted.borrow().is_empty());
    }

    #[test]
    fn live_run_never_simulates() {
        let storage = RecordingStorage::default();
        let results = DeletionExecutor::new(&storage).execute_plan(&plan(&["s3://b/a"]), false);

        assert_eq!(results[0].outcome, Outcome::Deleted);
        assert_eq!(results[0].objects.len(), 1);
        assert!(storage.simulated.borrow().is_empty());
        assert_eq!(storage.deleted.borrow().len(), 1);
    }

    #[test]
    fn failure_does_not_stop_remaining_directives() {
        let storage = RecordingStorage::failing_on(&["s3://b/a/"]);
        let results = DeletionExecutor::new(&storage)
            .execute_plan(&plan(&["s3://b/a", "s3://b/b", "s3://b/c"]), false);

        let outcomes: Vec<_> = results.iter().map(|r| r.outcome).collect();
        assert_eq!(
            outcomes,
            vec![Outcome::Failed, Outcome::Deleted, Outcome::Deleted]
        );
        assert!(results[0].detail.contains("access denied"));
        assert_eq!(storage.deleted.borrow().len(), 3);
    }
}

// Drop Event Extraction
//
// Classifies commits and keeps the ones that removed a table.
// Pure and side-effect free.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::history::{Commit, CommitId, Operation, TableIdentifier};

/// A commit that dropped a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropEvent {
    pub table: TableIdentifier,
    pub commit_id: CommitId,
    pub timestamp: DateTime<Utc>,

    /// Parent of the drop commit: the last state in which the table existed.
    pub parent: Option<CommitId>,
}

/// Return a [`DropEvent`] iff `commit` dropped a table.
pub fn extract_drop(commit: &Commit) -> Option<DropEvent> {
    match &commit.operation {
        Operation::DropTable(table) => Some(DropEvent {
            table: table.clone(),
            commit_id: commit.id.clone(),
            timestamp: commit.timestamp,
            parent: commit.parent.clone(),
        }),
        Operation::CreateTable(_) | Operation::UpdateTable(_) | Operation::Other => None,
    }
}

/// Extract every drop from `commits`, preserving order.
///
/// Repeated drops of the same table stay separate events.
pub fn extract_drops<'a, I>(commits: I) -> Vec<DropEvent>
where
    I: IntoIterator<Item = &'a Commit>,
{
    commits.into_iter().filter_map(extract_drop).collect()
}

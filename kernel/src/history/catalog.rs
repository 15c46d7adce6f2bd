// Catalog Access Abstraction
//
// Defines the read-only contract the pipeline needs from a table catalog.
// Implementations may talk HTTP, read fixtures, or hold an in-memory arena.
//
// This module defines *interfaces only*.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Commit, CommitId, TableIdentifier};

/// One page of the commit log, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitPage {
    pub commits: Vec<Commit>,

    /// Opaque token for the next (older) page, `None` when exhausted.
    pub next_page_token: Option<String>,
}

/// Table state recorded by the catalog at a given commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableContent {
    IcebergTable { metadata_location: String },

    /// Views, Delta tables, namespaces and whatever else the catalog stores.
    Other { kind: String },
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("catalog rejected credentials (HTTP {status})")]
    Unauthorized { status: u16 },

    #[error("unexpected catalog response (HTTP {status}): {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("malformed catalog response: {0}")]
    Decode(String),
}

impl CatalogError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            CatalogError::Transport(_) => true,
            CatalogError::UnexpectedStatus { status, .. } => *status == 429 || *status >= 500,
            CatalogError::Unauthorized { .. } | CatalogError::Decode(_) => false,
        }
    }
}

/// Read-only view of a catalog's history.
///
/// Implementations MUST:
/// - return commits newest first, continuing from `page_token`
/// - answer `table_content` from the state *at* the given commit,
///   never from the current head
/// - report absence of a table as `Ok(None)`, not as an error
pub trait Catalog {
    /// Fetch one page of the commit log.
    ///
    /// `since` is a hint that lets implementations narrow the query
    /// server-side; callers still truncate on their own.
    fn commit_page(
        &self,
        since: DateTime<Utc>,
        page_token: Option<&str>,
    ) -> Result<CommitPage, CatalogError>;

    /// Look up what the catalog recorded for `table` as of `commit`.
    fn table_content(
        &self,
        commit: &CommitId,
        table: &TableIdentifier,
    ) -> Result<Option<TableContent>, CatalogError>;
}

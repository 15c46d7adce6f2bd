// Commit History
//
// Normalized catalog commits, the arena graph that holds them, and the
// lazy newest-first reader that pages through a catalog's change log.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub mod catalog;
pub mod memory;

pub use catalog::{Catalog, CatalogError, CommitPage, TableContent};

/// Identifier of a catalog commit (a Nessie commit hash).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(pub String);

impl CommitId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fully qualified table name as the catalog spells it, e.g. `db.sales`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableIdentifier(pub String);

impl TableIdentifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a commit did to the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "table", rename_all = "snake_case")]
pub enum Operation {
    CreateTable(TableIdentifier),
    UpdateTable(TableIdentifier),
    DropTable(TableIdentifier),

    /// Anything that does not touch a single table (merges, namespaces, ...).
    Other,
}

impl Operation {
    /// Table affected by this operation, if any.
    pub fn table(&self) -> Option<&TableIdentifier> {
        match self {
            Operation::CreateTable(table)
            | Operation::UpdateTable(table)
            | Operation::DropTable(table) => Some(table),
            Operation::Other => None,
        }
    }
}

/// A single commit from the catalog log. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub id: CommitId,
    pub timestamp: DateTime<Utc>,
    pub operation: Operation,
    pub parent: Option<CommitId>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("commit {0} is already recorded")]
    DuplicateCommit(CommitId),

    #[error("commit {commit} references unknown parent {parent}")]
    UnknownParent { commit: CommitId, parent: CommitId },
}

/// Arena of commits keyed by id.
///
/// Ancestry is expressed as plain id lookups: a commit's parent is
/// another key in the same arena, never an owned link.
#[derive(Debug, Default, Clone)]
pub struct CommitGraph {
    commits: HashMap<CommitId, Commit>,
    head: Option<CommitId>,
}

impl CommitGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a commit and make it the new head.
    ///
    /// The parent, when present, must already be in the graph.
    pub fn insert(&mut self, commit: Commit) -> Result<(), GraphError> {
        if self.commits.contains_key(&commit.id) {
            return Err(GraphError::DuplicateCommit(commit.id));
        }

        if let Some(parent) = &commit.parent {
            if !self.commits.contains_key(parent) {
                return Err(GraphError::UnknownParent {
                    commit: commit.id,
                    parent: parent.clone(),
                });
            }
        }

        self.head = Some(commit.id.clone());
        self.commits.insert(commit.id.clone(), commit);
        Ok(())
    }

    pub fn get(&self, id: &CommitId) -> Option<&Commit> {
        self.commits.get(id)
    }

    pub fn head(&self) -> Option<&CommitId> {
        self.head.as_ref()
    }

    pub fn len(&self) -> usize {
        self.commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }

    /// Walk from `start` (inclusive) towards the root, newest first.
    pub fn ancestors<'a>(&'a self, start: &CommitId) -> Ancestors<'a> {
        Ancestors {
            graph: self,
            next: Some(start.clone()),
        }
    }
}

/// Iterator over a commit and its ancestors.
pub struct Ancestors<'a> {
    graph: &'a CommitGraph,
    next: Option<CommitId>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a Commit;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next.take()?;
        let commit = self.graph.get(&id)?;
        self.next = commit.parent.clone();
        Some(commit)
    }
}

/// Pages through a catalog's commit log, newest first.
pub struct CommitHistoryReader<'a, C: Catalog + ?Sized> {
    catalog: &'a C,
}

impl<'a, C: Catalog + ?Sized> CommitHistoryReader<'a, C> {
    pub fn new(catalog: &'a C) -> Self {
        Self { catalog }
    }

    /// Lazily yield the commits of the last `window_days` days.
    ///
    /// Every call starts again from the catalog head. Iteration stops at
    /// the first commit at or before `now - window_days`; older pages are
    /// never requested.
    pub fn fetch(&self, window_days: u32, now: DateTime<Utc>) -> CommitIter<'a, C> {
        CommitIter {
            catalog: self.catalog,
            since: window_start(window_days, now),
            buffer: VecDeque::new(),
            next_page: None,
            started: false,
            finished: false,
        }
    }
}

/// Start of the lookback window.
///
/// Saturates at the earliest representable instant instead of overflowing.
pub fn window_start(window_days: u32, now: DateTime<Utc>) -> DateTime<Utc> {
    now.checked_sub_signed(Duration::days(i64::from(window_days)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Lazy sequence of commits produced by [`CommitHistoryReader::fetch`].
///
/// A catalog failure is yielded once, after which the iterator is exhausted.
pub struct CommitIter<'a, C: Catalog + ?Sized> {
    catalog: &'a C,
    since: DateTime<Utc>,
    buffer: VecDeque<Commit>,
    next_page: Option<String>,
    started: bool,
    finished: bool,
}

impl<C: Catalog + ?Sized> Iterator for CommitIter<'_, C> {
    type Item = Result<Commit, CatalogError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.finished {
                return None;
            }

            if let Some(commit) = self.buffer.pop_front() {
                if commit.timestamp <= self.since {
                    debug!(
                        commit = %commit.id,
                        timestamp = %commit.timestamp,
                        since = %self.since,
                        "reached end of lookback window"
                    );
                    self.finished = true;
                    return None;
                }
                return Some(Ok(commit));
            }

            if self.started && self.next_page.is_none() {
                self.finished = true;
                return None;
            }

            match self
                .catalog
                .commit_page(self.since, self.next_page.as_deref())
            {
                Ok(page) => {
                    debug!(
                        commits = page.commits.len(),
                        has_more = page.next_page_token.is_some(),
                        "fetched commit page"
                    );
                    self.started = true;
                    // An empty page cannot make progress, even if it carries a token.
                    self.next_page = if page.commits.is_empty() {
                        None
                    } else {
                        page.next_page_token
                    };
                    self.buffer.extend(page.commits);
                }
                Err(err) => {
                    self.finished = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

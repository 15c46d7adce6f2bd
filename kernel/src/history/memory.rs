// In-Memory Catalog
//
// A catalog backed by a `CommitGraph` arena. Table state at any commit is
// derived by walking that commit's ancestry, which makes it a faithful
// stand-in for a versioned catalog in tests and offline runs.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::catalog::{Catalog, CatalogError, CommitPage, TableContent};
use super::{Commit, CommitGraph, CommitId, GraphError, Operation, TableIdentifier};

const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub struct InMemoryCatalog {
    graph: CommitGraph,
    /// Table content written by create/update commits.
    contents: HashMap<CommitId, TableContent>,
    page_size: usize,
    history_failure: Option<String>,
    content_failure: Option<String>,
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            graph: CommitGraph::new(),
            contents: HashMap::new(),
            page_size: page_size.max(1),
            history_failure: None,
            content_failure: None,
        }
    }

    pub fn graph(&self) -> &CommitGraph {
        &self.graph
    }

    /// Append a commit on top of the current head.
    pub fn record(
        &mut self,
        id: &str,
        timestamp: DateTime<Utc>,
        operation: Operation,
        content: Option<TableContent>,
    ) -> Result<&mut Self, GraphError> {
        let id = CommitId::new(id);
        self.graph.insert(Commit {
            id: id.clone(),
            timestamp,
            operation,
            parent: self.graph.head().cloned(),
        })?;

        if let Some(content) = content {
            self.contents.insert(id, content);
        }
        Ok(self)
    }

    pub fn create_table(
        &mut self,
        id: &str,
        timestamp: DateTime<Utc>,
        table: &str,
        metadata_location: &str,
    ) -> Result<&mut Self, GraphError> {
        self.record(
            id,
            timestamp,
            Operation::CreateTable(TableIdentifier::new(table)),
            Some(TableContent::IcebergTable {
                metadata_location: metadata_location.to_string(),
            }),
        )
    }

    pub fn update_table(
        &mut self,
        id: &str,
        timestamp: DateTime<Utc>,
        table: &str,
        metadata_location: &str,
    ) -> Result<&mut Self, GraphError> {
        self.record(
            id,
            timestamp,
            Operation::UpdateTable(TableIdentifier::new(table)),
            Some(TableContent::IcebergTable {
                metadata_location: metadata_location.to_string(),
            }),
        )
    }

    pub fn drop_table(
        &mut self,
        id: &str,
        timestamp: DateTime<Utc>,
        table: &str,
    ) -> Result<&mut Self, GraphError> {
        self.record(
            id,
            timestamp,
            Operation::DropTable(TableIdentifier::new(table)),
            None,
        )
    }

    pub fn other(&mut self, id: &str, timestamp: DateTime<Utc>) -> Result<&mut Self, GraphError> {
        self.record(id, timestamp, Operation::Other, None)
    }

    /// Make every history request fail with a transport error.
    pub fn fail_history(&mut self, reason: &str) {
        self.history_failure = Some(reason.to_string());
    }

    /// Make every table-content lookup fail with a transport error.
    pub fn fail_contents(&mut self, reason: &str) {
        self.content_failure = Some(reason.to_string());
    }
}

impl Catalog for InMemoryCatalog {
    fn commit_page(
        &self,
        _since: DateTime<Utc>,
        page_token: Option<&str>,
    ) -> Result<CommitPage, CatalogError> {
        if let Some(reason) = &self.history_failure {
            return Err(CatalogError::Transport(reason.clone()));
        }

        let start = match page_token {
            Some(token) => CommitId::new(token),
            None => match self.graph.head() {
                Some(head) => head.clone(),
                None => {
                    return Ok(CommitPage {
                        commits: Vec::new(),
                        next_page_token: None,
                    })
                }
            },
        };

        let mut walk = self.graph.ancestors(&start);
        let commits: Vec<Commit> = walk.by_ref().take(self.page_size).cloned().collect();
        let next_page_token = walk.next().map(|c| c.id.0.clone());

        Ok(CommitPage {
            commits,
            next_page_token,
        })
    }

    fn table_content(
        &self,
        commit: &CommitId,
        table: &TableIdentifier,
    ) -> Result<Option<TableContent>, CatalogError> {
        if let Some(reason) = &self.content_failure {
            return Err(CatalogError::Transport(reason.clone()));
        }

        for ancestor in self.graph.ancestors(commit) {
            match &ancestor.operation {
                Operation::DropTable(dropped) if dropped == table => return Ok(None),
                Operation::CreateTable(written) | Operation::UpdateTable(written)
                    if written == table =>
                {
                    return Ok(self.contents.get(&ancestor.id).cloned());
                }
                _ => continue,
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, hour, 0, 0).unwrap()
    }

    fn iceberg(location: &str) -> Option<TableContent> {
        Some(TableContent::IcebergTable {
            metadata_location: location.to_string(),
        })
    }

    #[test]
    fn content_reflects_state_at_commit_not_head() {
        let mut catalog = InMemoryCatalog::new();
        catalog
            .create_table("c1", at(1), "db.t", "s3://b/t/metadata/1.json")
            .unwrap();
        catalog
            .update_table("c2", at(2), "db.t", "s3://b/t/metadata/2.json")
            .unwrap();
        catalog.drop_table("c3", at(3), "db.t").unwrap();
        catalog
            .create_table("c4", at(4), "db.t", "s3://b/t-new/metadata/1.json")
            .unwrap();

        let table = TableIdentifier::new("db.t");
        assert_eq!(
            catalog.table_content(&CommitId::new("c1"), &table).unwrap(),
            iceberg("s3://b/t/metadata/1.json")
        );
        assert_eq!(
            catalog.table_content(&CommitId::new("c2"), &table).unwrap(),
            iceberg("s3://b/t/metadata/2.json")
        );
        assert_eq!(
            catalog.table_content(&CommitId::new("c3"), &table).unwrap(),
            None
        );
        assert_eq!(
            catalog.table_content(&CommitId::new("c4"), &table).unwrap(),
            iceberg("s3://b/t-new/metadata/1.json")
        );
    }

    #[test]
    fn pages_follow_ancestry_newest_first() {
        let mut catalog = InMemoryCatalog::with_page_size(2);
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            catalog.other(id, at(i as u32)).unwrap();
        }

        let first = catalog.commit_page(at(0), None).unwrap();
        assert_eq!(first.commits.len(), 2);
        assert_eq!(first.commits[0].id, CommitId::new("c"));
        assert_eq!(first.next_page_token.as_deref(), Some("a"));

        let second = catalog.commit_page(at(0), Some("a")).unwrap();
        assert_eq!(second.commits.len(), 1);
        assert!(second.next_page_token.is_none());
    }

    #[test]
    fn unknown_table_has_no_content() {
        let mut catalog = InMemoryCatalog::new();
        catalog.other("c1", at(1)).unwrap();

        let content = catalog
            .table_content(&CommitId::new("c1"), &TableIdentifier::new("db.none"))
            .unwrap();
        assert!(content.is_none());
    }
}

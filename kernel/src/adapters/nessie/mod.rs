// Nessie REST v2 Wire Format
//
// Parses Nessie history and content responses and normalizes them into
// the catalog model used by the pipeline. No I/O happens here.

use std::sync::LazyLock;

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::Deserialize;

use crate::history::{
    CatalogError, Commit, CommitId, CommitPage, Operation, TableContent, TableIdentifier,
};

/// Parent hash Nessie reports for the first commit on a branch.
pub const NO_ANCESTOR_HASH: &str =
    "2e1cfa82b035c26cbbbdae632cea070514eb8b773f616aaeaf668e2f0be8f10d";

/// Content type of an Iceberg table entry.
pub const ICEBERG_TABLE: &str = "ICEBERG_TABLE";

static TABLE_STATEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(DROP|CREATE|ALTER|UPDATE)\s+TABLE\s+(?:IF\s+(?:NOT\s+)?EXISTS\s+)?(\S.*?)\s*$")
        .expect("table statement pattern is valid")
});

/// `GET /trees/{ref}/history` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogResponse {
    #[serde(default)]
    pub log_entries: Vec<LogEntry>,

    #[serde(default)]
    pub has_more: bool,

    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub commit_meta: CommitMeta,
    pub parent_commit_hash: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitMeta {
    pub hash: Option<String>,

    #[serde(default)]
    pub message: String,

    pub commit_time: Option<DateTime<Utc>>,
}

/// `GET /trees/{ref}/contents/{key}` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentResponse {
    pub content: Content,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(rename = "type")]
    pub kind: String,
    pub metadata_location: Option<String>,
}

impl LogResponse {
    pub fn into_page(self) -> Result<CommitPage, CatalogError> {
        let commits = self
            .log_entries
            .into_iter()
            .map(LogEntry::into_commit)
            .collect::<Result<Vec<_>, _>>()?;

        let next_page_token = if self.has_more { self.token } else { None };

        Ok(CommitPage {
            commits,
            next_page_token,
        })
    }
}

impl LogEntry {
    pub fn into_commit(self) -> Result<Commit, CatalogError> {
        let hash = self
            .commit_meta
            .hash
            .ok_or_else(|| CatalogError::Decode("log entry without commit hash".into()))?;

        let timestamp = self.commit_meta.commit_time.ok_or_else(|| {
            CatalogError::Decode(format!("commit {hash} has no commitTime"))
        })?;

        let parent = self
            .parent_commit_hash
            .filter(|p| !p.is_empty() && p != NO_ANCESTOR_HASH)
            .map(CommitId);

        Ok(Commit {
            id: CommitId(hash),
            timestamp,
            operation: classify_message(&self.commit_meta.message),
            parent,
        })
    }
}

impl ContentResponse {
    pub fn into_table_content(self) -> Result<TableContent, CatalogError> {
        if self.content.kind != ICEBERG_TABLE {
            return Ok(TableContent::Other {
                kind: self.content.kind,
            });
        }

        match self.content.metadata_location {
            Some(metadata_location) if !metadata_location.is_empty() => {
                Ok(TableContent::IcebergTable { metadata_location })
            }
            _ => Err(CatalogError::Decode(
                "Iceberg table content without metadataLocation".into(),
            )),
        }
    }
}

/// Classify a commit from its message.
///
/// Only the first line is considered; the table identifier is the rest of
/// the statement, e.g. `DROP TABLE db.sales` drops `db.sales`.
pub fn classify_message(message: &str) -> Operation {
    let first_line = message.lines().next().unwrap_or_default();

    let Some(captures) = TABLE_STATEMENT.captures(first_line) else {
        return Operation::Other;
    };

    let table = TableIdentifier::new(&captures[2]);
    match captures[1].to_ascii_uppercase().as_str() {
        "DROP" => Operation::DropTable(table),
        "CREATE" => Operation::CreateTable(table),
        _ => Operation::UpdateTable(table),
    }
}

/// CEL filter narrowing history to commits newer than `since`.
pub fn history_filter(since: DateTime<Utc>) -> String {
    format!(
        "timestamp(commit.commitTime) > timestamp('{}')",
        since.to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}

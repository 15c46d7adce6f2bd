// Table Location Resolution
//
// Recovers the storage directory a dropped table occupied, using only the
// ancestry of the drop commit, and guards it against escaping the
// configured storage root.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::adapters::iceberg;
use crate::drops::DropEvent;
use crate::history::{Catalog, CatalogError, CommitId, TableContent, TableIdentifier};

/// Storage URI prefix of a directory, always ending in `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoragePrefix(String);

impl StoragePrefix {
    pub fn new(uri: &str) -> Self {
        let trimmed = uri.trim().trim_end_matches('/');
        Self(format!("{trimmed}/"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoragePrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("invalid storage root `{uri}`: {reason}")]
pub struct InvalidStorageRoot {
    pub uri: String,
    pub reason: String,
}

/// Upper bound for every deletion of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StorageRoot(StoragePrefix);

impl StorageRoot {
    /// Parse and normalize a storage root such as `s3://bucket/warehouse`.
    pub fn parse(uri: &str) -> Result<Self, InvalidStorageRoot> {
        let invalid = |reason: &str| InvalidStorageRoot {
            uri: uri.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(uri.trim()).map_err(|e| invalid(&e.to_string()))?;
        if url.cannot_be_a_base() {
            return Err(invalid("expected a hierarchical URI like s3://bucket/path"));
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(invalid("query strings and fragments are not allowed"));
        }

        let has_host = url.host_str().is_some_and(|h| !h.is_empty());
        let has_path = !url.path().trim_matches('/').is_empty();
        if !has_host && !has_path {
            return Err(invalid("root must name a bucket or directory"));
        }

        let prefix = StoragePrefix::new(uri);
        if has_relative_segments(prefix.as_str()) {
            return Err(invalid("relative path segments are not allowed"));
        }

        Ok(Self(prefix))
    }

    pub fn as_prefix(&self) -> &StoragePrefix {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Whether `prefix` is a strict descendant of this root.
    ///
    /// Both sides are compared in their parsed URL form, the same form the
    /// storage layer addresses objects by, so encoded dot segments cannot
    /// walk out of the root. The root itself is not contained: a run never
    /// removes its whole root.
    pub fn contains(&self, prefix: &StoragePrefix) -> bool {
        if has_relative_segments(prefix.as_str()) {
            return false;
        }
        let (Ok(root), Ok(candidate)) =
            (Url::parse(self.as_str()), Url::parse(prefix.as_str()))
        else {
            return false;
        };
        if root.scheme() != candidate.scheme()
            || root.host_str() != candidate.host_str()
            || root.port() != candidate.port()
            || candidate.query().is_some()
            || candidate.fragment().is_some()
        {
            return false;
        }

        let (Some(root_segments), Some(segments)) =
            (directory_segments(&root), directory_segments(&candidate))
        else {
            return false;
        };
        match segments.strip_prefix(root_segments.as_slice()) {
            Some(rest) => !rest.is_empty() && rest.iter().all(|segment| !segment.is_empty()),
            None => false,
        }
    }
}

impl fmt::Display for StorageRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Path segments of a directory URL, without the trailing empty segment.
fn directory_segments(url: &Url) -> Option<Vec<&str>> {
    let mut segments: Vec<&str> = url.path_segments()?.collect();
    if segments.last() == Some(&"") {
        segments.pop();
    }
    Some(segments)
}

/// Any `.` or `..` segment, including percent-encoded spellings like `%2e%2e`.
fn has_relative_segments(uri: &str) -> bool {
    let path = match uri.split_once("://") {
        Some((_, rest)) => rest,
        None => uri,
    };
    path.split('/').any(|segment| {
        let decoded = segment.to_ascii_lowercase().replace("%2e", ".");
        decoded == "." || decoded == ".."
    })
}

/// Directory a dropped table occupied immediately before its drop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableLocation {
    pub table: TableIdentifier,
    pub prefix: StoragePrefix,
    pub metadata_location: String,
    pub drop: DropEvent,
}

/// Why a drop contributes no deletion work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The table had no committed state before it was dropped.
    NoPriorState,

    /// The catalog held something other than an Iceberg table.
    UnsupportedContent { kind: String },

    /// The recorded location lies outside the storage root.
    OutsideStorageRoot { location: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoPriorState => f.write_str("no committed state before the drop"),
            SkipReason::UnsupportedContent { kind } => {
                write!(f, "catalog content `{kind}` is not an Iceberg table")
            }
            SkipReason::OutsideStorageRoot { location } => {
                write!(f, "location {location} is outside the storage root")
            }
        }
    }
}

/// Outcome of resolving a single drop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Resolution {
    Resolved(TableLocation),
    Skipped(SkipReason),
}

impl Resolution {
    pub fn location(&self) -> Option<&TableLocation> {
        match self {
            Resolution::Resolved(location) => Some(location),
            Resolution::Skipped(_) => None,
        }
    }
}

/// The catalog could not be reached while resolving a drop.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("failed to resolve prior location of `{table}` dropped in {commit}: {source}")]
pub struct ResolutionError {
    pub table: TableIdentifier,
    pub commit: CommitId,
    #[source]
    pub source: CatalogError,
}

/// Resolves drops to storage locations through the catalog.
pub struct TableLocationResolver<'a, C: Catalog + ?Sized> {
    catalog: &'a C,
    root: &'a StorageRoot,
}

impl<'a, C: Catalog + ?Sized> TableLocationResolver<'a, C> {
    pub fn new(catalog: &'a C, root: &'a StorageRoot) -> Self {
        Self { catalog, root }
    }

    /// Resolve the location `drop.table` had just before `drop`.
    ///
    /// State is read at the drop's parent commit, so a table re-created
    /// under the same name later never leaks its location into an
    /// earlier drop.
    pub fn resolve(&self, drop: &DropEvent) -> Result<Resolution, ResolutionError> {
        let Some(parent) = &drop.parent else {
            debug!(table = %drop.table, commit = %drop.commit_id, "drop commit has no parent");
            return Ok(Resolution::Skipped(SkipReason::NoPriorState));
        };

        let content = self
            .catalog
            .table_content(parent, &drop.table)
            .map_err(|source| ResolutionError {
                table: drop.table.clone(),
                commit: drop.commit_id.clone(),
                source,
            })?;

        let metadata_location = match content {
            None => {
                debug!(table = %drop.table, parent = %parent, "no prior table state");
                return Ok(Resolution::Skipped(SkipReason::NoPriorState));
            }
            Some(TableContent::Other { kind }) => {
                debug!(table = %drop.table, kind = %kind, "prior content is not an Iceberg table");
                return Ok(Resolution::Skipped(SkipReason::UnsupportedContent { kind }));
            }
            Some(TableContent::IcebergTable { metadata_location }) => metadata_location,
        };

        if !iceberg::is_metadata_file(&metadata_location) {
            debug!(
                table = %drop.table,
                metadata_location = %metadata_location,
                "metadata pointer does not follow the Iceberg layout"
            );
        }

        let prefix = iceberg::table_root(&metadata_location);
        if !self.root.contains(&prefix) {
            warn!(
                table = %drop.table,
                location = %prefix,
                root = %self.root,
                "refusing location outside the storage root"
            );
            return Ok(Resolution::Skipped(SkipReason::OutsideStorageRoot {
                location: prefix.as_str().to_string(),
            }));
        }

        Ok(Resolution::Resolved(TableLocation {
            table: drop.table.clone(),
            prefix,
            metadata_location,
            drop: drop.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drops::extract_drop;
    use crate::history::memory::InMemoryCatalog;
    use chrono::{TimeZone, Utc};

    fn root() -> StorageRoot {
        StorageRoot::parse("s3://bucket/warehouse").unwrap()
    }

    fn drop_of(catalog: &InMemoryCatalog, id: &str) -> DropEvent {
        let commit = catalog.graph().get(&CommitId::new(id)).unwrap();
        extract_drop(commit).unwrap()
    }

    fn at(hour: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, hour, 0, 0).unwrap()
    }

    #[test]
    fn root_containment() {
        let root = root();

        assert!(root.contains(&StoragePrefix::new("s3://bucket/warehouse/sales")));
        assert!(root.contains(&StoragePrefix::new("s3://bucket/warehouse/db/sales/")));
        assert!(!root.contains(&StoragePrefix::new("s3://bucket/warehouse")));
        assert!(!root.contains(&StoragePrefix::new("s3://bucket/warehouse2/sales")));
        assert!(!root.contains(&StoragePrefix::new("s3://other/warehouse/sales")));
        assert!(!root.contains(&StoragePrefix::new("s3://bucket/warehouse/../etc")));
        assert!(!root.contains(&StoragePrefix::new("s3://bucket/warehouse//sales")));
    }

    #[test]
    fn encoded_dot_segments_cannot_escape_root() {
        let root = StorageRoot::parse("memory:///wh").unwrap();

        for escaping in [
            "memory:///wh/%2e%2e/victim",
            "memory:///wh/%2E%2E/victim",
            "memory:///wh/.%2e/victim",
            "memory:///wh/sales/%2e%2e/%2e%2e/victim",
            "memory:///wh/%2e/",
        ] {
            assert!(!root.contains(&StoragePrefix::new(escaping)), "{escaping}");
        }
        assert!(root.contains(&StoragePrefix::new("memory:///wh/sales%2edata")));
        assert!(StorageRoot::parse("s3://bucket/%2e%2e/other").is_err());
    }

    #[test]
    fn root_parsing_rejects_bad_uris() {
        assert!(StorageRoot::parse("not a uri").is_err());
        assert!(StorageRoot::parse("s3://").is_err());
        assert!(StorageRoot::parse("s3://bucket/a/../b").is_err());
        assert_eq!(root().as_str(), "s3://bucket/warehouse/");
        assert_eq!(
            StorageRoot::parse("s3://bucket/").unwrap().as_str(),
            "s3://bucket/"
        );
    }

    #[test]
    fn resolves_location_from_parent_commit() {
        let mut catalog = InMemoryCatalog::new();
        catalog
            .create_table(
                "c1",
                at(1),
                "db.sales",
                "s3://bucket/warehouse/sales/metadata/00001.metadata.json",
            )
            .unwrap();
        catalog.drop_table("c2", at(2), "db.sales").unwrap();

        let root = root();
        let resolver = TableLocationResolver::new(&catalog, &root);
        let resolution = resolver.resolve(&drop_of(&catalog, "c2")).unwrap();

        let location = resolution.location().unwrap();
        assert_eq!(location.prefix.as_str(), "s3://bucket/warehouse/sales/");
        assert_eq!(location.drop.commit_id, CommitId::new("c2"));
    }

    #[test]
    fn recreated_table_does_not_leak_into_earlier_drop() {
        let mut catalog = InMemoryCatalog::new();
        catalog
            .create_table(
                "c1",
                at(1),
                "db.t",
                "s3://bucket/warehouse/t-old/metadata/1.metadata.json",
            )
            .unwrap();
        catalog.drop_table("c2", at(2), "db.t").unwrap();
        catalog
            .create_table(
                "c3",
                at(3),
                "db.t",
                "s3://bucket/warehouse/t-new/metadata/1.metadata.json",
            )
            .unwrap();

        let root = root();
        let resolver = TableLocationResolver::new(&catalog, &root);
        let resolution = resolver.resolve(&drop_of(&catalog, "c2")).unwrap();

        assert_eq!(
            resolution.location().unwrap().prefix.as_str(),
            "s3://bucket/warehouse/t-old/"
        );
    }

    #[test]
    fn table_without_prior_state_resolves_to_nothing() {
        let mut catalog = InMemoryCatalog::new();
        catalog.other("c1", at(1)).unwrap();
        catalog.drop_table("c2", at(2), "db.ghost").unwrap();

        let root = root();
        let resolver = TableLocationResolver::new(&catalog, &root);

        assert_eq!(
            resolver.resolve(&drop_of(&catalog, "c2")).unwrap(),
            Resolution::Skipped(SkipReason::NoPriorState)
        );
    }

    #[test]
    fn location_outside_root_is_rejected() {
        let mut catalog = InMemoryCatalog::new();
        catalog
            .create_table(
                "c1",
                at(1),
                "db.rogue",
                "s3://elsewhere/rogue/metadata/1.metadata.json",
            )
            .unwrap();
        catalog.drop_table("c2", at(2), "db.rogue").unwrap();

        let root = root();
        let resolution = TableLocationResolver::new(&catalog, &root)
            .resolve(&drop_of(&catalog, "c2"))
            .unwrap();

        assert!(matches!(
            resolution,
            Resolution::Skipped(SkipReason::OutsideStorageRoot { .. })
        ));
    }

    #[test]
    fn encoded_parent_segment_in_metadata_location_is_rejected() {
        let mut catalog = InMemoryCatalog::new();
        catalog
            .create_table(
                "c1",
                at(1),
                "db.victim",
                "s3://bucket/warehouse/%2e%2e/victim/metadata/00001.metadata.json",
            )
            .unwrap();
        catalog.drop_table("c2", at(2), "db.victim").unwrap();

        let root = root();
        let resolution = TableLocationResolver::new(&catalog, &root)
            .resolve(&drop_of(&catalog, "c2"))
            .unwrap();

        assert_eq!(
            resolution,
            Resolution::Skipped(SkipReason::OutsideStorageRoot {
                location: "s3://bucket/warehouse/%2e%2e/victim/".into()
            })
        );
    }

    #[test]
    fn non_iceberg_content_is_skipped() {
        let mut catalog = InMemoryCatalog::new();
        catalog
            .record(
                "c1",
                at(1),
                crate::history::Operation::CreateTable(TableIdentifier::new("db.view")),
                Some(TableContent::Other {
                    kind: "ICEBERG_VIEW".into(),
                }),
            )
            .unwrap();
        catalog.drop_table("c2", at(2), "db.view").unwrap();

        let root = root();
        let resolution = TableLocationResolver::new(&catalog, &root)
            .resolve(&drop_of(&catalog, "c2"))
            .unwrap();

        assert_eq!(
            resolution,
            Resolution::Skipped(SkipReason::UnsupportedContent {
                kind: "ICEBERG_VIEW".into()
            })
        );
    }

    #[test]
    fn transport_failure_is_an_error() {
        let mut catalog = InMemoryCatalog::new();
        catalog
            .create_table("c1", at(1), "db.t", "s3://bucket/warehouse/t/metadata/1.json")
            .unwrap();
        catalog.drop_table("c2", at(2), "db.t").unwrap();
        catalog.fail_contents("timed out");

        let root = root();
        let err = TableLocationResolver::new(&catalog, &root)
            .resolve(&drop_of(&catalog, "c2"))
            .unwrap_err();

        assert_eq!(err.table, TableIdentifier::new("db.t"));
        assert!(matches!(err.source, CatalogError::Transport(_)));
    }
}

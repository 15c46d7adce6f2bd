// Iceberg Layout
//
// Knowledge of how an Iceberg table lays itself out in object storage:
//
//   <table-location>/metadata/<version>.metadata.json
//   <table-location>/data/...
//
// The catalog only records the metadata pointer, so the directory that
// holds the whole table has to be derived from it.

use crate::resolve::StoragePrefix;

const METADATA_SEGMENT: &str = "/metadata/";

/// Derive the table directory from a metadata pointer.
///
/// Uses the *last* `metadata` segment so that a table living under a
/// directory that happens to be called `metadata` is not widened to
/// its parent. Pointers without such a segment fall back to their
/// containing directory.
pub fn table_root(metadata_location: &str) -> StoragePrefix {
    let trimmed = metadata_location.trim();

    let root = match trimmed.rfind(METADATA_SEGMENT) {
        Some(idx) => &trimmed[..idx],
        None => match trimmed.rsplit_once('/') {
            Some((parent, _file)) => parent,
            None => trimmed,
        },
    };

    StoragePrefix::new(root)
}

/// Whether `location` looks like an Iceberg metadata file.
pub fn is_metadata_file(location: &str) -> bool {
    location.contains(METADATA_SEGMENT) && location.ends_with(".metadata.json")
}

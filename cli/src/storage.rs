//! Object-store backed recursive prefix deletion.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt, TryStreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::azure::MicrosoftAzureBuilder;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use tokio::runtime::Handle;
use tracing::debug;
use url::Url;

use dropsweep_kernel::execute::{ObjectStorage, StorageError};
use dropsweep_kernel::resolve::{StoragePrefix, StorageRoot};

/// Create an object store for the bucket or directory behind `root`.
///
/// Cloud credentials come from the usual provider environment variables.
pub fn create_object_store(root: &StorageRoot) -> Result<Arc<dyn ObjectStore>> {
    let url = Url::parse(root.as_str())
        .with_context(|| format!("Invalid storage root '{}'", root))?;

    let store: Arc<dyn ObjectStore> = match url.scheme() {
        "s3" | "s3a" => Arc::new(
            AmazonS3Builder::from_env()
                .with_url(url.as_str())
                .build()
                .context("Failed to configure S3 store")?,
        ),
        "gs" => Arc::new(
            GoogleCloudStorageBuilder::from_env()
                .with_url(url.as_str())
                .build()
                .context("Failed to configure GCS store")?,
        ),
        "az" | "adl" | "azure" | "abfs" | "abfss" => Arc::new(
            MicrosoftAzureBuilder::from_env()
                .with_url(url.as_str())
                .build()
                .context("Failed to configure Azure store")?,
        ),
        "file" => Arc::new(LocalFileSystem::new()),
        "memory" => Arc::new(InMemory::new()),
        scheme => anyhow::bail!(
            "Unsupported storage scheme: {scheme}. Supported: s3, s3a, gs, az, abfs, abfss, file, memory"
        ),
    };

    Ok(store)
}

/// [`ObjectStorage`] over any `object_store` backend.
///
/// Every prefix is checked again against the storage root after it has been
/// parsed into an object path.
pub struct ObjectStoreStorage {
    store: Arc<dyn ObjectStore>,
    root: ObjectPath,
    runtime: Handle,
}

impl ObjectStoreStorage {
    pub fn new(store: Arc<dyn ObjectStore>, root: &StorageRoot, runtime: Handle) -> Result<Self> {
        let url = Url::parse(root.as_str())
            .with_context(|| format!("Invalid storage root '{}'", root))?;
        let root = ObjectPath::from_url_path(url.path())
            .with_context(|| format!("Invalid storage root path '{}'", url.path()))?;
        Ok(Self {
            store,
            root,
            runtime,
        })
    }

    pub fn from_root(root: &StorageRoot, runtime: Handle) -> Result<Self> {
        Self::new(create_object_store(root)?, root, runtime)
    }

    /// Object path of a prefix URI, relative to its bucket.
    fn object_path(&self, prefix: &StoragePrefix) -> Result<ObjectPath, StorageError> {
        let invalid = || StorageError::InvalidPrefix(prefix.to_string());

        let url = Url::parse(prefix.as_str()).map_err(|_| invalid())?;
        let path = ObjectPath::from_url_path(url.path()).map_err(|_| invalid())?;

        // An empty path would address the whole bucket.
        if path.as_ref().is_empty() {
            return Err(invalid());
        }
        if path == self.root || !path.prefix_matches(&self.root) {
            return Err(invalid());
        }
        Ok(path)
    }

    async fn list(&self, path: &ObjectPath) -> Result<Vec<ObjectPath>, StorageError> {
        self.store
            .list(Some(path))
            .map_ok(|meta| meta.location)
            .try_collect()
            .await
            .map_err(storage_error)
    }

    async fn delete_all(&self, paths: Vec<ObjectPath>) -> Result<Vec<ObjectPath>, StorageError> {
        let locations = stream::iter(paths.into_iter().map(Ok)).boxed();
        self.store
            .delete_stream(locations)
            .try_collect()
            .await
            .map_err(storage_error)
    }
}

impl ObjectStorage for ObjectStoreStorage {
    fn simulate_delete(&self, prefix: &StoragePrefix) -> Result<Vec<String>, StorageError> {
        let path = self.object_path(prefix)?;
        let objects = self.runtime.block_on(self.list(&path))?;

        for object in &objects {
            debug!(object = %object, "[DRY-RUN] would delete");
        }
        Ok(objects.iter().map(ToString::to_string).collect())
    }

    fn delete_recursive(&self, prefix: &StoragePrefix) -> Result<Vec<String>, StorageError> {
        let path = self.object_path(prefix)?;

        let removed = self.runtime.block_on(async {
            let objects = self.list(&path).await?;
            self.delete_all(objects).await
        })?;

        for object in &removed {
            debug!(object = %object, "deleted");
        }
        Ok(removed.iter().map(ToString::to_string).collect())
    }
}

fn storage_error(err: object_store::Error) -> StorageError {
    match err {
        object_store::Error::PermissionDenied { .. }
        | object_store::Error::Unauthenticated { .. } => {
            StorageError::AccessDenied(err.to_string())
        }
        other => StorageError::Request(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::PutPayload;

    fn storage(
        runtime: &tokio::runtime::Runtime,
        store: &Arc<dyn ObjectStore>,
    ) -> ObjectStoreStorage {
        let root = StorageRoot::parse("memory:///wh").unwrap();
        ObjectStoreStorage::new(store.clone(), &root, runtime.handle().clone()).unwrap()
    }

    fn seeded(runtime: &tokio::runtime::Runtime, paths: &[&str]) -> Arc<dyn ObjectStore> {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        runtime.block_on(async {
            for path in paths {
                store
                    .put(&ObjectPath::from(*path), PutPayload::from_static(b"data"))
                    .await
                    .unwrap();
            }
        });
        store
    }

    fn remaining(runtime: &tokio::runtime::Runtime, store: &Arc<dyn ObjectStore>) -> Vec<String> {
        let mut paths: Vec<String> = runtime.block_on(async {
            store
                .list(None)
                .map_ok(|meta| meta.location.to_string())
                .try_collect()
                .await
                .unwrap()
        });
        paths.sort();
        paths
    }

    const OBJECTS: &[&str] = &[
        "wh/sales/metadata/00001.metadata.json",
        "wh/sales/data/part-0.parquet",
        "wh/sales_archive/data/part-0.parquet",
        "victim/data/b.parquet",
    ];

    #[test]
    fn simulate_lists_without_deleting() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let store = seeded(&runtime, OBJECTS);
        let storage = storage(&runtime, &store);

        let mut objects = storage
            .simulate_delete(&StoragePrefix::new("memory:///wh/sales"))
            .unwrap();
        objects.sort();

        assert_eq!(
            objects,
            vec![
                "wh/sales/data/part-0.parquet",
                "wh/sales/metadata/00001.metadata.json"
            ]
        );
        assert_eq!(remaining(&runtime, &store).len(), 4);
    }

    #[test]
    fn delete_removes_only_the_prefix() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let store = seeded(&runtime, OBJECTS);
        let storage = storage(&runtime, &store);

        let removed = storage
            .delete_recursive(&StoragePrefix::new("memory:///wh/sales/"))
            .unwrap();

        assert_eq!(removed.len(), 2);
        assert_eq!(
            remaining(&runtime, &store),
            vec!["victim/data/b.parquet", "wh/sales_archive/data/part-0.parquet"]
        );
    }

    #[test]
    fn bucket_level_prefix_is_refused() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let store = seeded(&runtime, OBJECTS);
        let storage = storage(&runtime, &store);

        let err = storage
            .delete_recursive(&StoragePrefix::new("s3://bucket/"))
            .unwrap_err();

        assert!(matches!(err, StorageError::InvalidPrefix(_)));
    }

    #[test]
    fn prefix_resolving_outside_root_is_refused() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let store = seeded(&runtime, OBJECTS);
        let storage = storage(&runtime, &store);

        for prefix in ["memory:///wh/%2e%2e/victim/", "memory:///victim/", "memory:///wh/"] {
            let err = storage
                .delete_recursive(&StoragePrefix::new(prefix))
                .unwrap_err();
            assert!(matches!(err, StorageError::InvalidPrefix(_)), "{prefix}");
        }
        assert_eq!(remaining(&runtime, &store).len(), 4);
    }

    #[test]
    fn rejects_unknown_scheme() {
        let root = StorageRoot::parse("ftp://host/dir").unwrap();
        assert!(create_object_store(&root).is_err());
    }
}

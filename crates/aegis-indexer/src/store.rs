//! Object store door
//!
//! The appliance ships an S3-compatible object store for uploaded
//! documents; this wraps listing, fetching, and the deletion leg of
//! document fan-out.

use aegis_common::{Error, ObjectStoreConfig, Result};
use futures_util::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectMeta, ObjectStore};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct DocumentStore {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl DocumentStore {
    pub fn new(config: &ObjectStoreConfig) -> Result<Self> {
        let store = AmazonS3Builder::new()
            .with_endpoint(config.endpoint())
            .with_bucket_name(&config.bucket)
            .with_access_key_id(&config.access_key)
            .with_secret_access_key(&config.secret_key)
            .with_region("us-east-1")
            .with_allow_http(true)
            .build()
            .map_err(|e| Error::ObjectStore(format!("object store init: {e}")))?;
        info!("Object store ready (bucket: {})", config.bucket);
        Ok(DocumentStore {
            store: Arc::new(store),
            bucket: config.bucket.clone(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Recursive listing of every object in the bucket
    pub async fn list(&self) -> Result<Vec<ObjectMeta>> {
        self.store
            .list(None)
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| Error::ObjectStore(format!("list failed: {e}")))
    }

    /// Fetch the full object body
    pub async fn fetch(&self, location: &ObjectPath) -> Result<Vec<u8>> {
        let result = self
            .store
            .get(location)
            .await
            .map_err(|e| Error::ObjectStore(format!("get {location}: {e}")))?;
        let bytes = result
            .bytes()
            .await
            .map_err(|e| Error::ObjectStore(format!("read {location}: {e}")))?;
        Ok(bytes.to_vec())
    }

    /// Deletion leg of the document fan-out; missing objects only warn
    pub async fn delete(&self, path: &str) {
        let location = ObjectPath::from(path);
        if let Err(e) = self.store.delete(&location).await {
            warn!("Failed to delete {} from object store: {}", path, e);
        }
    }
}

//! Collections bind a storage and a target under one name.

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

use crate::{
    client::{Bucket, ByteStream},
    errors::Result,
    models::{resource::Resource, storage_object::StorageObject},
    services::target::Target,
};

/// Lazy sequence of a collection's stored objects.
pub type StorageObjects = BoxStream<'static, Result<StorageObject>>;

/// Anything that can hand out resource content for publishing.
#[async_trait]
pub trait ResourceStorage: Send + Sync {
    fn name(&self) -> &str;

    /// Open the content of `resource`. `None` when the object is absent.
    async fn get_stream(&self, resource: &Resource) -> Result<Option<ByteStream>>;

    /// Every stored object of `collection`; streams open only when read.
    async fn get_objects_by_collection(&self, collection: &str) -> Result<StorageObjects>;

    /// Present when the content lives in a bucket that supports server-side
    /// copy.
    fn as_locatable(&self) -> Option<&dyn SourceLocatable> {
        None
    }
}

/// Bucket identity of stored content.
#[async_trait]
pub trait SourceLocatable: Send + Sync {
    fn bucket_name(&self) -> &str;

    fn key_prefix(&self) -> &str;

    /// Full object key of the content with this hash.
    fn object_key(&self, sha1: &str) -> String;

    /// Handle of the bucket holding the content.
    async fn source_bucket(&self) -> Result<Arc<dyn Bucket>>;
}

/// A named grouping of resources with its storage and target.
#[derive(Clone)]
pub struct Collection {
    name: String,
    storage: Arc<dyn ResourceStorage>,
    target: Arc<Target>,
}

impl Collection {
    pub fn new(
        name: impl Into<String>,
        storage: Arc<dyn ResourceStorage>,
        target: Arc<Target>,
    ) -> Self {
        Self {
            name: name.into(),
            storage,
            target,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn storage(&self) -> &dyn ResourceStorage {
        self.storage.as_ref()
    }

    pub fn target(&self) -> &Target {
        self.target.as_ref()
    }

    /// Publish every resource of this collection.
    pub async fn publish(&self) -> Result<crate::services::target::SyncReport> {
        self.target.publish_collection(self).await
    }
}

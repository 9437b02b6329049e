//! Lazily opened view of a stored resource, produced when enumerating a
//! collection.

use futures::future::BoxFuture;
use std::fmt;

use crate::{client::ByteStream, errors::Result, models::resource::Resource};

type StreamOpener = Box<dyn FnOnce() -> BoxFuture<'static, Result<Option<ByteStream>>> + Send>;

/// A resource paired with a deferred way to read its content.
///
/// The content stream is only opened by [`StorageObject::open`], so
/// enumerating a large collection does not hold many connections at once.
pub struct StorageObject {
    pub resource: Resource,
    opener: StreamOpener,
}

impl StorageObject {
    pub fn new<F>(resource: Resource, opener: F) -> Self
    where
        F: FnOnce() -> BoxFuture<'static, Result<Option<ByteStream>>> + Send + 'static,
    {
        Self {
            resource,
            opener: Box::new(opener),
        }
    }

    pub fn sha1(&self) -> &str {
        &self.resource.sha1
    }

    pub fn filename(&self) -> &str {
        &self.resource.filename
    }

    /// Open the content stream. `None` when the stored object is absent.
    pub async fn open(self) -> Result<Option<ByteStream>> {
        (self.opener)().await
    }
}

impl fmt::Debug for StorageObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageObject")
            .field("sha1", &self.resource.sha1)
            .field("filename", &self.resource.filename)
            .finish()
    }
}

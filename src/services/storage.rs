//! Content-addressed storage of resources in a bucket.
//!
//! Objects live at `{keyPrefix}{sha1}`. Importing is idempotent: the key is
//! checked before uploading, so identical content is uploaded at most once.
//! Two importers racing on the same new hash both write identical bytes to
//! the same key, which is harmless.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{FutureExt, StreamExt};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{fs::File, sync::OnceCell};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::{
    catalog::{ResourceCatalog, resources_in_collection},
    client::{Bucket, BucketClient, ByteStream, ObjectMetadata, ObjectPage},
    collection::{ResourceStorage, SourceLocatable, StorageObjects},
    config::StorageOptions,
    errors::{ConnectorError, Result},
    hasher,
    models::{resource::Resource, storage_object::StorageObject},
    services::staging,
};

/// A file staged by the caller, e.g. the temporary file of an HTTP upload.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub tmp_path: PathBuf,
    pub original_filename: String,
}

pub struct Storage {
    name: String,
    options: StorageOptions,
    client: Arc<dyn BucketClient>,
    catalog: Arc<dyn ResourceCatalog>,
    bucket: OnceCell<Arc<dyn Bucket>>,
}

impl Storage {
    pub fn new(
        name: impl Into<String>,
        options: StorageOptions,
        client: Arc<dyn BucketClient>,
        catalog: Arc<dyn ResourceCatalog>,
    ) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            options: options.validate()?,
            client,
            catalog,
            bucket: OnceCell::new(),
        })
    }

    pub fn options(&self) -> &StorageOptions {
        &self.options
    }

    /// `{keyPrefix}{sha1}`.
    pub fn storage_key(&self, sha1: &str) -> String {
        format!("{}{}", self.options.key_prefix, sha1)
    }

    /// Content hash encoded in a storage key, if the key belongs here.
    pub fn hash_from_key<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(self.options.key_prefix.as_str())
            .filter(|rest| hasher::is_sha1_hex(rest))
    }

    /// Bucket handle, resolved on first use and kept for the instance's life.
    pub async fn current_bucket(&self) -> Result<Arc<dyn Bucket>> {
        self.bucket
            .get_or_try_init(|| async {
                self.client
                    .bucket(&self.options.bucket)
                    .await
                    .map_err(|err| ConnectorError::from_bucket(&self.options.bucket, "", err))
            })
            .await
            .cloned()
    }

    /// Import arbitrary content. The filename, which also sets the stored
    /// content type, defaults to the hash.
    pub async fn import_from_stream(
        &self,
        stream: ByteStream,
        filename: Option<&str>,
        collection: &str,
    ) -> Result<Resource> {
        let staging_dir = tempfile::tempdir()
            .map_err(|err| ConnectorError::import("could not create a staging directory", err))?;
        let path = staging_dir.path().join("content");
        staging::spool_stream(stream, &path)
            .await
            .map_err(|err| ConnectorError::import("could not copy the stream to a temporary file", err))?;
        self.import_temporary_file(&path, filename, collection).await
    }

    pub async fn import_from_content(
        &self,
        content: impl Into<Bytes>,
        collection: &str,
    ) -> Result<Resource> {
        let content = content.into();
        let staging_dir = tempfile::tempdir()
            .map_err(|err| ConnectorError::import("could not create a staging directory", err))?;
        let path = staging_dir.path().join("content");
        tokio::fs::write(&path, &content)
            .await
            .map_err(|err| ConnectorError::import("could not write content to a temporary file", err))?;
        self.import_temporary_file(&path, None, collection).await
    }

    /// Import a caller-staged file. It is moved into a private staging
    /// directory first so the caller's own cleanup cannot race the upload.
    pub async fn import_uploaded_file(
        &self,
        upload: &UploadedFile,
        collection: &str,
    ) -> Result<Resource> {
        if !tokio::fs::try_exists(&upload.tmp_path).await.unwrap_or(false) {
            return Err(ConnectorError::import(
                format!(
                    "uploaded file {} does not exist",
                    upload.tmp_path.display()
                ),
                io::Error::from(ErrorKind::NotFound),
            ));
        }
        let staging_dir = tempfile::tempdir()
            .map_err(|err| ConnectorError::import("could not create a staging directory", err))?;
        let path = staging_dir.path().join("upload");
        staging::relocate(&upload.tmp_path, &path).await.map_err(|err| {
            ConnectorError::import(
                format!("could not move {} into staging", upload.tmp_path.display()),
                err,
            )
        })?;
        self.import_temporary_file(&path, Some(&upload.original_filename), collection)
            .await
    }

    async fn import_temporary_file(
        &self,
        path: &Path,
        filename: Option<&str>,
        collection: &str,
    ) -> Result<Resource> {
        let digest = hasher::hash_file(path, true)
            .await
            .map_err(|err| ConnectorError::import("could not hash the staged file", err))?;
        let filename = filename
            .map(str::to_string)
            .unwrap_or_else(|| digest.sha1.clone());
        let resource =
            Resource::new(&digest.sha1, filename, digest.size, collection).with_md5(digest.md5);

        let key = self.storage_key(&resource.sha1);
        let bucket = self.current_bucket().await?;
        let exists = bucket
            .exists(&key)
            .await
            .map_err(|err| ConnectorError::from_bucket(bucket.name(), &key, err))?;
        if exists {
            debug!(key = %key, bucket = bucket.name(), "object exists, skipping upload");
            return Ok(resource);
        }

        let file = File::open(path)
            .await
            .map_err(|err| ConnectorError::import("could not reopen the staged file", err))?;
        let metadata = ObjectMetadata::with_content_type(resource.media_type.clone());
        bucket
            .upload(&key, ReaderStream::new(file).boxed(), &metadata, None)
            .await
            .map_err(|err| ConnectorError::from_bucket(bucket.name(), &key, err))?;
        info!(
            key = %key,
            bucket = bucket.name(),
            size = resource.file_size,
            "imported resource"
        );
        Ok(resource)
    }

    /// Delete the stored object. An already missing object counts as deleted.
    pub async fn delete_resource(&self, resource: &Resource) -> Result<bool> {
        let key = self.storage_key(&resource.sha1);
        self.delete_key(&key).await
    }

    /// Delete any key of this storage's bucket, tolerating absence.
    pub async fn delete_key(&self, key: &str) -> Result<bool> {
        let bucket = self.current_bucket().await?;
        match bucket.delete(key).await {
            Ok(()) => Ok(true),
            Err(err) if err.is_not_found() => {
                debug!(key = %key, "object already absent");
                Ok(true)
            }
            Err(err) => Err(ConnectorError::from_bucket(bucket.name(), key, err)),
        }
    }

    /// One page of object keys under the key prefix.
    pub async fn list_keys(&self, page_token: Option<&str>) -> Result<ObjectPage> {
        let bucket = self.current_bucket().await?;
        bucket
            .list(&self.options.key_prefix, page_token)
            .await
            .map_err(|err| ConnectorError::from_bucket(bucket.name(), &self.options.key_prefix, err))
    }
}

async fn open_object(bucket: Arc<dyn Bucket>, key: String) -> Result<Option<ByteStream>> {
    match bucket.download(&key).await {
        Ok(stream) => Ok(Some(stream)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(ConnectorError::Provider {
            bucket: bucket.name().to_string(),
            key,
            source: err,
        }),
    }
}

#[async_trait]
impl ResourceStorage for Storage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_stream(&self, resource: &Resource) -> Result<Option<ByteStream>> {
        let bucket = self.current_bucket().await?;
        open_object(bucket, self.storage_key(&resource.sha1)).await
    }

    async fn get_objects_by_collection(&self, collection: &str) -> Result<StorageObjects> {
        let bucket = self.current_bucket().await?;
        let prefix = self.options.key_prefix.clone();
        let objects = resources_in_collection(self.catalog.clone(), collection).map(move |entry| {
            entry.map(|resource| {
                let bucket = bucket.clone();
                let key = format!("{}{}", prefix, resource.sha1);
                StorageObject::new(resource, move || open_object(bucket, key).boxed())
            })
        });
        Ok(objects.boxed())
    }

    fn as_locatable(&self) -> Option<&dyn SourceLocatable> {
        Some(self)
    }
}

#[async_trait]
impl SourceLocatable for Storage {
    fn bucket_name(&self) -> &str {
        &self.options.bucket
    }

    fn key_prefix(&self) -> &str {
        &self.options.key_prefix
    }

    fn object_key(&self, sha1: &str) -> String {
        self.storage_key(sha1)
    }

    async fn source_bucket(&self) -> Result<Arc<dyn Bucket>> {
        self.current_bucket().await
    }
}

//! Publishing of stored resources to a public bucket.
//!
//! A target owns the publicly readable copy of a collection. Two layouts are
//! supported:
//!
//! * two-bucket: content is copied (or streamed, when gzip applies) from the
//!   storage into `{keyPrefix}{sha1}/{filename}` of the target bucket.
//! * one-bucket: storage and target share bucket and key prefix. The stored
//!   object is the published object; publishing only flips its ACL and
//!   metadata, and reconciliation is skipped.

pub mod gzip;
pub mod retry;
pub mod uri;

use chrono::{TimeDelta, Utc};
use serde::Serialize;
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use futures::StreamExt;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::{
    client::{self, Bucket, BucketClient, ByteStream, ObjectMetadata, PredefinedAcl},
    collection::{Collection, ResourceStorage, SourceLocatable},
    config::TargetOptions,
    errors::{ConnectorError, Result},
    messages::MessageCollector,
    models::{resource::Resource, storage_object::StorageObject},
};

use self::{
    gzip::{Compressor, GzipStaging},
    retry::RetryPolicy,
    uri::UriVariables,
};

/// Cache policy of published objects: two weeks.
pub const PUBLIC_CACHE_CONTROL: &str = "public, max-age=1209600";
pub const GZIP_ENCODING: &str = "gzip";

/// What happened to one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Server-side copy from the storage bucket.
    Copied,
    /// Streamed upload, gzip-compressed or not.
    Uploaded { gzip: bool },
    /// One-bucket setup: ACL and metadata applied in place.
    MetadataUpdated,
    /// Already present on the target.
    Skipped,
    /// Non-fatal failure, also reported to the message collector.
    Failed { reason: String },
}

impl PublishOutcome {
    pub fn is_published(&self) -> bool {
        !matches!(self, PublishOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedItem {
    pub sha1: String,
    pub filename: String,
    pub reason: String,
}

/// Summary of a collection sync.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub copied: usize,
    pub uploaded: usize,
    pub compressed: usize,
    pub skipped: usize,
    pub removed: usize,
    pub failures: Vec<FailedItem>,
}

impl SyncReport {
    pub fn published(&self) -> usize {
        self.copied + self.uploaded
    }

    fn record(&mut self, resource: &Resource, outcome: PublishOutcome) {
        match outcome {
            PublishOutcome::Copied => self.copied += 1,
            PublishOutcome::Uploaded { gzip } => {
                self.uploaded += 1;
                if gzip {
                    self.compressed += 1;
                }
            }
            PublishOutcome::MetadataUpdated => {}
            PublishOutcome::Skipped => self.skipped += 1,
            PublishOutcome::Failed { reason } => self.failures.push(FailedItem {
                sha1: resource.sha1.clone(),
                filename: resource.filename.clone(),
                reason,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Re-publish resources even when the target already has them.
    pub force: bool,
}

/// Host-supplied base URI, selected by `customBaseUriMethod`.
pub trait BaseUriProvider: Send + Sync {
    /// `None` falls back to the configured or generic base URI.
    fn base_uri(&self, target: &str, options: &TargetOptions) -> Option<String>;
}

impl<F> BaseUriProvider for F
where
    F: Fn(&str, &TargetOptions) -> Option<String> + Send + Sync,
{
    fn base_uri(&self, target: &str, options: &TargetOptions) -> Option<String> {
        self(target, options)
    }
}

/// Where the bytes of a resource come from when they have to be streamed.
enum Source<'a> {
    Storage(&'a dyn ResourceStorage),
    Object(StorageObject),
}

impl Source<'_> {
    async fn open(self, resource: &Resource) -> Result<Option<ByteStream>> {
        match self {
            Source::Storage(storage) => storage.get_stream(resource).await,
            Source::Object(object) => object.open().await,
        }
    }
}

pub struct Target {
    name: String,
    options: TargetOptions,
    client: Arc<dyn BucketClient>,
    bucket: OnceCell<Arc<dyn Bucket>>,
    gzip_media_types: HashSet<String>,
    retry: RetryPolicy,
    compressor: Compressor,
    messages: MessageCollector,
    base_uri_providers: HashMap<String, Arc<dyn BaseUriProvider>>,
    /// Keys present on the target at the start of the running sync. Entries
    /// are removed as collection members are seen; what is left is obsolete.
    existing_objects: Mutex<Option<HashSet<String>>>,
}

impl Target {
    pub fn new(
        name: impl Into<String>,
        options: TargetOptions,
        client: Arc<dyn BucketClient>,
    ) -> Result<Self> {
        let options = options.validate()?;
        let gzip_media_types = options
            .gzip_compression_media_types
            .iter()
            .map(|media_type| media_type.trim().to_ascii_lowercase())
            .collect();
        Ok(Self {
            name: name.into(),
            options,
            client,
            bucket: OnceCell::new(),
            gzip_media_types,
            retry: RetryPolicy::default(),
            compressor: gzip::compress_file,
            messages: MessageCollector::new(),
            base_uri_providers: HashMap::new(),
            existing_objects: Mutex::new(None),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the gzip routine used by [`Target::publish_file`].
    pub fn with_compressor(mut self, compressor: Compressor) -> Self {
        self.compressor = compressor;
        self
    }

    pub fn with_message_collector(mut self, messages: MessageCollector) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_base_uri_provider(
        mut self,
        method: impl Into<String>,
        provider: Arc<dyn BaseUriProvider>,
    ) -> Self {
        self.base_uri_providers.insert(method.into(), provider);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &TargetOptions {
        &self.options
    }

    pub fn messages(&self) -> &MessageCollector {
        &self.messages
    }

    /// Value for `Access-Control-Allow-Origin` on published objects.
    pub fn cors_allow_origin(&self) -> &str {
        &self.options.cors_allow_origin
    }

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

    /// Storage and target share bucket and key prefix.
    pub fn is_one_bucket_setup(&self, storage: &dyn ResourceStorage) -> bool {
        storage.as_locatable().is_some_and(|source| {
            source.bucket_name() == self.options.bucket
                && source.key_prefix() == self.options.key_prefix
        })
    }

    pub fn is_gzip_eligible(&self, media_type: &str) -> bool {
        self.gzip_media_types
            .contains(&media_type.trim().to_ascii_lowercase())
    }

    /// Path of a published resource below the key prefix.
    pub fn relative_publication_path(&self, resource: &Resource, one_bucket: bool) -> String {
        if one_bucket {
            return resource.sha1.clone();
        }
        match resource.publication_path.as_deref() {
            Some(path) if !path.trim_start_matches('/').is_empty() => {
                path.trim_start_matches('/').to_string()
            }
            _ => format!("{}/{}", resource.sha1, resource.filename),
        }
    }

    pub fn object_key(&self, relative_path: &str) -> String {
        format!("{}{}", self.options.key_prefix, relative_path)
    }

    /// Full target key of `resource` as published for `collection`.
    pub fn publication_key(&self, resource: &Resource, collection: &Collection) -> String {
        let one_bucket = self.is_one_bucket_setup(collection.storage());
        self.object_key(&self.relative_publication_path(resource, one_bucket))
    }

    fn public_metadata(&self, media_type: &str, gzip: bool) -> ObjectMetadata {
        ObjectMetadata {
            content_type: Some(media_type.to_string()),
            cache_control: Some(PUBLIC_CACHE_CONTROL.to_string()),
            content_encoding: gzip.then(|| GZIP_ENCODING.to_string()),
        }
    }

    fn record_failure(&self, resource: &Resource, reason: String) -> PublishOutcome {
        self.messages
            .warn(&resource.sha1, &resource.filename, reason.clone());
        PublishOutcome::Failed { reason }
    }

    /// Make one resource publicly available.
    ///
    /// Copy, stream and upload failures are reported as
    /// [`PublishOutcome::Failed`]. Misconfiguration and a source that would
    /// be overwritten by its own copy are errors.
    pub async fn publish_resource(
        &self,
        resource: &Resource,
        collection: &Collection,
    ) -> Result<PublishOutcome> {
        let storage = collection.storage();
        if self.is_one_bucket_setup(storage) {
            let key = self.object_key(&self.relative_publication_path(resource, true));
            self.apply_public_metadata(&key, resource).await?;
            return Ok(PublishOutcome::MetadataUpdated);
        }
        self.publish_to_target(resource, storage, Source::Storage(storage))
            .await
    }

    async fn apply_public_metadata(&self, key: &str, resource: &Resource) -> Result<()> {
        let bucket = self.current_bucket().await?;
        let metadata = self.public_metadata(&resource.media_type, false);
        self.retry
            .run(|| bucket.update_metadata(key, &metadata, Some(PredefinedAcl::PublicRead)))
            .await
            .map_err(|err| ConnectorError::from_bucket(bucket.name(), key, err))?;
        debug!(key = %key, bucket = bucket.name(), "published in place");
        Ok(())
    }

    async fn publish_to_target(
        &self,
        resource: &Resource,
        storage: &dyn ResourceStorage,
        source: Source<'_>,
    ) -> Result<PublishOutcome> {
        let relative = self.relative_publication_path(resource, false);
        let target_key = self.object_key(&relative);
        let gzip = self.is_gzip_eligible(&resource.media_type);

        if let Some(location) = storage.as_locatable() {
            let source_key = location.object_key(&resource.sha1);
            if location.bucket_name() == self.options.bucket && source_key == target_key {
                return Err(ConnectorError::Precondition(format!(
                    "publishing {} ({}) would overwrite its source {}/{}",
                    resource.sha1, resource.filename, self.options.bucket, source_key
                )));
            }
            if !gzip {
                return Ok(self
                    .copy_from_source(resource, location, &source_key, &target_key)
                    .await);
            }
        }

        match source.open(resource).await {
            Ok(Some(stream)) => self.publish_file(stream, &relative, resource).await,
            Ok(None) => Ok(self.record_failure(
                resource,
                format!(
                    "could not publish {}: no content in storage {}",
                    resource.sha1,
                    storage.name()
                ),
            )),
            Err(err) => Ok(self.record_failure(
                resource,
                format!("could not open {} for publishing: {}", resource.sha1, err),
            )),
        }
    }

    async fn copy_from_source(
        &self,
        resource: &Resource,
        location: &dyn SourceLocatable,
        source_key: &str,
        target_key: &str,
    ) -> PublishOutcome {
        let source_bucket = match location.source_bucket().await {
            Ok(bucket) => bucket,
            Err(err) => {
                return self.record_failure(
                    resource,
                    format!("could not copy {}: {}", resource.sha1, err),
                );
            }
        };
        let metadata = self.public_metadata(&resource.media_type, false);
        match source_bucket
            .copy(
                source_key,
                &self.options.bucket,
                target_key,
                &metadata,
                Some(PredefinedAcl::PublicRead),
            )
            .await
        {
            Ok(()) => {
                debug!(
                    source = %format!("{}/{}", source_bucket.name(), source_key),
                    target = %format!("{}/{}", self.options.bucket, target_key),
                    "copied resource"
                );
                PublishOutcome::Copied
            }
            Err(err) => self.record_failure(
                resource,
                format!(
                    "could not copy {}/{} to {}/{}: {}",
                    source_bucket.name(),
                    source_key,
                    self.options.bucket,
                    target_key,
                    err
                ),
            ),
        }
    }

    /// Upload `source` to `{keyPrefix}{relative_key}` with public-read
    /// access. Eligible media types are gzip-compressed through a scoped
    /// staging area first; if compression fails the original is uploaded.
    pub async fn publish_file(
        &self,
        source: ByteStream,
        relative_key: &str,
        resource: &Resource,
    ) -> Result<PublishOutcome> {
        let key = self.object_key(relative_key);
        let bucket = self.current_bucket().await?;

        let mut staging: Option<GzipStaging> = None;
        let (body, compressed) = if self.is_gzip_eligible(&resource.media_type) {
            let staged = match GzipStaging::spool(source).await {
                Ok(staged) => staged,
                Err(err) => {
                    return Ok(self.record_failure(
                        resource,
                        format!("could not read content of {}: {}", resource.sha1, err),
                    ));
                }
            };
            let opened = match staged
                .compress_with(self.compressor, self.options.gzip_compression_level)
                .await
            {
                Ok(size) => {
                    debug!(key = %key, size, "compressed for publishing");
                    staged.open_compressed().await.map(|body| (body, true))
                }
                Err(err) => {
                    self.messages.warn(
                        &resource.sha1,
                        &resource.filename,
                        format!("could not compress {}, publishing uncompressed: {}", key, err),
                    );
                    staged.open_original().await.map(|body| (body, false))
                }
            };
            staging = Some(staged);
            match opened {
                Ok(opened) => opened,
                Err(err) => {
                    return Ok(self.record_failure(
                        resource,
                        format!("could not read staged content of {}: {}", resource.sha1, err),
                    ));
                }
            }
        } else {
            (source, false)
        };

        let metadata = self.public_metadata(&resource.media_type, compressed);
        let uploaded = bucket
            .upload(&key, body, &metadata, Some(PredefinedAcl::PublicRead))
            .await;
        drop(staging);

        match uploaded {
            Ok(()) => {
                debug!(key = %key, bucket = bucket.name(), gzip = compressed, "uploaded resource");
                Ok(PublishOutcome::Uploaded { gzip: compressed })
            }
            Err(err) => Ok(self.record_failure(
                resource,
                format!("could not upload {}/{}: {}", bucket.name(), key, err),
            )),
        }
    }

    /// Remove the published copy. One-bucket setups keep the object since it
    /// is the stored content itself.
    pub async fn unpublish_resource(&self, resource: &Resource, collection: &Collection) -> Result<()> {
        if self.is_one_bucket_setup(collection.storage()) {
            debug!(sha1 = %resource.sha1, "one-bucket setup, nothing to unpublish");
            return Ok(());
        }
        let key = self.object_key(&self.relative_publication_path(resource, false));
        self.delete_published(&key).await
    }

    async fn delete_published(&self, key: &str) -> Result<()> {
        let bucket = self.current_bucket().await?;
        match bucket.delete(key).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => {
                debug!(key = %key, "published object already absent");
                Ok(())
            }
            Err(err) => Err(ConnectorError::from_bucket(bucket.name(), key, err)),
        }
    }

    /// Re-apply the media type of an already published resource.
    pub async fn update_resource_metadata(
        &self,
        resource: &Resource,
        collection: &Collection,
    ) -> Result<()> {
        let key = self.publication_key(resource, collection);
        let bucket = self.current_bucket().await?;
        let metadata = ObjectMetadata::with_content_type(resource.media_type.clone());
        bucket
            .update_metadata(&key, &metadata, None)
            .await
            .map_err(|source| ConnectorError::MetadataUpdate {
                sha1: resource.sha1.clone(),
                filename: resource.filename.clone(),
                source,
            })
    }

    fn base_uri(&self) -> Result<String> {
        if let Some(method) = self.options.custom_base_uri_method.as_deref() {
            let provider = self.base_uri_providers.get(method).ok_or_else(|| {
                ConnectorError::Configuration(format!(
                    "target {}: no base URI provider named {}",
                    self.name, method
                ))
            })?;
            if let Some(base_uri) = provider.base_uri(&self.name, &self.options) {
                return Ok(uri::with_trailing_slash(&base_uri));
            }
        }
        Ok(match self.options.base_uri.as_deref() {
            Some(base_uri) => uri::with_trailing_slash(base_uri),
            None => self.client.public_base_uri(&self.options.bucket),
        })
    }

    /// Stable public URI of `resource`, signed when signing is enabled.
    pub async fn public_persistent_resource_uri(
        &self,
        resource: &Resource,
        collection: &Collection,
    ) -> Result<String> {
        let one_bucket = self.is_one_bucket_setup(collection.storage());
        let base_uri = self.base_uri()?;
        let settings = &self.options.persistent_resource_uris;
        let pattern = settings.pattern.as_deref().unwrap_or(if one_bucket {
            uri::ONE_BUCKET_PATTERN
        } else {
            uri::DEFAULT_PATTERN
        });
        let extension = resource.file_extension();
        let vars = UriVariables {
            base_uri: &base_uri,
            bucket_name: &self.options.bucket,
            key_prefix: &self.options.key_prefix,
            sha1: &resource.sha1,
            md5: resource.md5.as_deref().unwrap_or(""),
            filename: &resource.filename,
            file_extension: &extension,
        };
        let rendered = uri::render(pattern, &vars);
        if !settings.enable_signing {
            return Ok(rendered);
        }

        let key = self.object_key(&self.relative_publication_path(resource, one_bucket));
        let expires_at = i64::try_from(settings.signature_lifetime)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or_else(|| {
                ConnectorError::Configuration(format!(
                    "target {}: signature lifetime of {} seconds is out of range",
                    self.name, settings.signature_lifetime
                ))
            })?;
        let bucket = self.current_bucket().await?;
        let signed = bucket
            .signed_url(&key, expires_at, "GET")
            .await
            .map_err(|err| ConnectorError::from_bucket(bucket.name(), &key, err))?;
        Ok(uri::append_signature(rendered, &signed))
    }

    pub async fn publish_collection(&self, collection: &Collection) -> Result<SyncReport> {
        self.publish_collection_with(collection, SyncOptions::default())
            .await
    }

    /// Bring the target in line with the collection: publish missing
    /// members, then delete target objects that belong to no member.
    pub async fn publish_collection_with(
        &self,
        collection: &Collection,
        options: SyncOptions,
    ) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        if self.is_one_bucket_setup(collection.storage()) {
            info!(
                collection = collection.name(),
                target = %self.name,
                "one-bucket setup, skipping sync"
            );
            return Ok(report);
        }

        let bucket = self.current_bucket().await?;
        let existing = client::list_all(bucket.as_ref(), &self.options.key_prefix)
            .await
            .map_err(|err| ConnectorError::from_bucket(bucket.name(), &self.options.key_prefix, err))?;
        info!(
            collection = collection.name(),
            target = %self.name,
            existing = existing.len(),
            "syncing collection"
        );
        self.set_existing_objects(Some(existing.into_iter().collect()));

        let synced = self.sync_members(collection, options, &mut report).await;
        let obsolete = self.take_existing_objects();
        synced?;

        let mut obsolete: Vec<String> = obsolete.into_iter().collect();
        obsolete.sort();
        for key in obsolete {
            match self.delete_published(&key).await {
                Ok(()) => {
                    debug!(key = %key, "removed obsolete object");
                    report.removed += 1;
                }
                Err(err) => {
                    let (sha1, filename) = self.split_publication_key(&key);
                    let reason = format!("could not remove obsolete object {}: {}", key, err);
                    self.messages.warn(&sha1, &filename, reason.clone());
                    report.failures.push(FailedItem {
                        sha1,
                        filename,
                        reason,
                    });
                }
            }
        }

        info!(
            collection = collection.name(),
            copied = report.copied,
            uploaded = report.uploaded,
            skipped = report.skipped,
            removed = report.removed,
            failed = report.failures.len(),
            "sync finished"
        );
        Ok(report)
    }

    async fn sync_members(
        &self,
        collection: &Collection,
        options: SyncOptions,
        report: &mut SyncReport,
    ) -> Result<()> {
        let storage = collection.storage();
        let copyable = storage.as_locatable().is_some();
        let mut objects = storage.get_objects_by_collection(collection.name()).await?;

        while let Some(object) = objects.next().await {
            let object = object?;
            let resource = object.resource.clone();
            let key = self.object_key(&self.relative_publication_path(&resource, false));
            // A member's key is never obsolete, even when publishing it fails.
            let present = self.forget_existing_object(&key);
            if present && copyable && !options.force {
                debug!(key = %key, "already published");
                report.record(&resource, PublishOutcome::Skipped);
                continue;
            }
            let outcome = match self
                .publish_to_target(&resource, storage, Source::Object(object))
                .await
            {
                Ok(outcome) => outcome,
                Err(ConnectorError::Precondition(reason)) => {
                    warn!(sha1 = %resource.sha1, "{}", reason);
                    self.record_failure(&resource, reason)
                }
                Err(err) => return Err(err),
            };
            report.record(&resource, outcome);
        }
        Ok(())
    }

    /// Every update is a single insert, remove or swap, so a poisoned
    /// snapshot is still consistent.
    fn existing_objects(&self) -> MutexGuard<'_, Option<HashSet<String>>> {
        self.existing_objects.lock().unwrap_or_else(|poisoned| {
            warn!(target = %self.name, "existing-object snapshot lock was poisoned");
            PoisonError::into_inner(poisoned)
        })
    }

    fn set_existing_objects(&self, keys: Option<HashSet<String>>) {
        *self.existing_objects() = keys;
    }

    fn take_existing_objects(&self) -> HashSet<String> {
        self.existing_objects().take().unwrap_or_default()
    }

    /// Drop `key` from the existing-object snapshot, reporting whether it
    /// was there.
    fn forget_existing_object(&self, key: &str) -> bool {
        self.existing_objects()
            .as_mut()
            .is_some_and(|keys| keys.remove(key))
    }

    /// Best-effort `(sha1, filename)` of a target key.
    fn split_publication_key(&self, key: &str) -> (String, String) {
        let relative = key
            .strip_prefix(self.options.key_prefix.as_str())
            .unwrap_or(key);
        match relative.split_once('/') {
            Some((sha1, filename)) => (sha1.to_string(), filename.to_string()),
            None => (relative.to_string(), String::new()),
        }
    }
}

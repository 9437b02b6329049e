//! In-memory collaborators shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use bucket_connector::{
    catalog::{ResourceCatalog, ResourcePage},
    client::{
        Bucket, BucketClient, BucketError, ByteStream, ObjectMetadata, ObjectPage, PredefinedAcl,
        bytes_stream, collect_stream,
    },
    collection::{ResourceStorage, StorageObjects},
    errors::Result,
    hasher,
    models::{resource::Resource, storage_object::StorageObject},
};
use chrono::{DateTime, Utc};
use futures::{FutureExt, StreamExt, stream};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

pub fn sha1_of(data: &[u8]) -> String {
    hasher::hash_bytes(data, false).sha1
}

#[derive(Debug, Clone, Default)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub metadata: ObjectMetadata,
    pub acl: Option<PredefinedAcl>,
}

#[derive(Debug, Default)]
pub struct Calls {
    pub upload: AtomicUsize,
    pub download: AtomicUsize,
    pub exists: AtomicUsize,
    pub delete: AtomicUsize,
    pub update_metadata: AtomicUsize,
    pub copy: AtomicUsize,
    pub list: AtomicUsize,
    pub signed_url: AtomicUsize,
}

impl Calls {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct Failures {
    transient_metadata: usize,
    always_transient_metadata: bool,
    copy_keys: HashSet<String>,
    upload_keys: HashSet<String>,
    delete_keys: HashSet<String>,
}

#[derive(Debug)]
struct Inner {
    buckets: Mutex<HashMap<String, BTreeMap<String, StoredObject>>>,
    failures: Mutex<Failures>,
    calls: Calls,
    page_size: usize,
}

/// Recording bucket provider with failure injection.
#[derive(Debug, Clone)]
pub struct MemoryBucketClient {
    inner: Arc<Inner>,
}

impl MemoryBucketClient {
    pub fn new(buckets: &[&str]) -> Self {
        Self::with_page_size(buckets, 2)
    }

    pub fn with_page_size(buckets: &[&str], page_size: usize) -> Self {
        let map = buckets
            .iter()
            .map(|name| (name.to_string(), BTreeMap::new()))
            .collect();
        Self {
            inner: Arc::new(Inner {
                buckets: Mutex::new(map),
                failures: Mutex::new(Failures::default()),
                calls: Calls::default(),
                page_size,
            }),
        }
    }

    pub fn calls(&self) -> &Calls {
        &self.inner.calls
    }

    pub fn put(&self, bucket: &str, key: &str, data: &[u8]) {
        self.inner
            .buckets
            .lock()
            .unwrap()
            .get_mut(bucket)
            .expect("bucket exists")
            .insert(
                key.to_string(),
                StoredObject {
                    data: data.to_vec(),
                    ..StoredObject::default()
                },
            );
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.inner
            .buckets
            .lock()
            .unwrap()
            .get(bucket)
            .and_then(|objects| objects.get(key).cloned())
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.inner
            .buckets
            .lock()
            .unwrap()
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Next `times` metadata updates fail with a transient error.
    pub fn fail_metadata_transiently(&self, times: usize) {
        self.inner.failures.lock().unwrap().transient_metadata = times;
    }

    pub fn always_fail_metadata_transiently(&self) {
        self.inner.failures.lock().unwrap().always_transient_metadata = true;
    }

    pub fn fail_copy_of(&self, source_key: &str) {
        self.inner
            .failures
            .lock()
            .unwrap()
            .copy_keys
            .insert(source_key.to_string());
    }

    pub fn fail_upload_of(&self, key: &str) {
        self.inner
            .failures
            .lock()
            .unwrap()
            .upload_keys
            .insert(key.to_string());
    }

    pub fn fail_delete_of(&self, key: &str) {
        self.inner
            .failures
            .lock()
            .unwrap()
            .delete_keys
            .insert(key.to_string());
    }
}

#[async_trait]
impl BucketClient for MemoryBucketClient {
    async fn bucket(&self, name: &str) -> std::result::Result<Arc<dyn Bucket>, BucketError> {
        if !self.inner.buckets.lock().unwrap().contains_key(name) {
            return Err(BucketError::BucketNotFound(name.to_string()));
        }
        Ok(Arc::new(MemoryBucket {
            name: name.to_string(),
            inner: self.inner.clone(),
        }))
    }

    fn public_base_uri(&self, bucket: &str) -> String {
        format!("https://storage.test/{}/", bucket)
    }
}

struct MemoryBucket {
    name: String,
    inner: Arc<Inner>,
}

impl MemoryBucket {
    fn not_found(&self, key: &str) -> BucketError {
        BucketError::ObjectNotFound {
            bucket: self.name.clone(),
            key: key.to_string(),
        }
    }

    fn with_objects<T>(&self, f: impl FnOnce(&mut BTreeMap<String, StoredObject>) -> T) -> T {
        let mut buckets = self.inner.buckets.lock().unwrap();
        f(buckets.get_mut(&self.name).expect("bucket exists"))
    }
}

fn merge_metadata(current: &mut ObjectMetadata, update: &ObjectMetadata) {
    if update.content_type.is_some() {
        current.content_type = update.content_type.clone();
    }
    if update.cache_control.is_some() {
        current.cache_control = update.cache_control.clone();
    }
    if update.content_encoding.is_some() {
        current.content_encoding = update.content_encoding.clone();
    }
}

#[async_trait]
impl Bucket for MemoryBucket {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upload(
        &self,
        key: &str,
        body: ByteStream,
        metadata: &ObjectMetadata,
        acl: Option<PredefinedAcl>,
    ) -> std::result::Result<(), BucketError> {
        self.inner.calls.upload.fetch_add(1, Ordering::SeqCst);
        if self.inner.failures.lock().unwrap().upload_keys.contains(key) {
            return Err(BucketError::Provider {
                message: format!("upload of {} rejected", key),
            });
        }
        let data = collect_stream(body).await?;
        self.with_objects(|objects| {
            objects.insert(
                key.to_string(),
                StoredObject {
                    data,
                    metadata: metadata.clone(),
                    acl,
                },
            )
        });
        Ok(())
    }

    async fn download(&self, key: &str) -> std::result::Result<ByteStream, BucketError> {
        self.inner.calls.download.fetch_add(1, Ordering::SeqCst);
        let data = self.with_objects(|objects| objects.get(key).map(|object| object.data.clone()));
        data.map(bytes_stream).ok_or_else(|| self.not_found(key))
    }

    async fn exists(&self, key: &str) -> std::result::Result<bool, BucketError> {
        self.inner.calls.exists.fetch_add(1, Ordering::SeqCst);
        Ok(self.with_objects(|objects| objects.contains_key(key)))
    }

    async fn delete(&self, key: &str) -> std::result::Result<(), BucketError> {
        self.inner.calls.delete.fetch_add(1, Ordering::SeqCst);
        if self.inner.failures.lock().unwrap().delete_keys.contains(key) {
            return Err(BucketError::Provider {
                message: format!("delete of {} rejected", key),
            });
        }
        self.with_objects(|objects| objects.remove(key))
            .map(|_| ())
            .ok_or_else(|| self.not_found(key))
    }

    async fn update_metadata(
        &self,
        key: &str,
        metadata: &ObjectMetadata,
        acl: Option<PredefinedAcl>,
    ) -> std::result::Result<(), BucketError> {
        self.inner.calls.update_metadata.fetch_add(1, Ordering::SeqCst);
        {
            let mut failures = self.inner.failures.lock().unwrap();
            if failures.always_transient_metadata || failures.transient_metadata > 0 {
                failures.transient_metadata = failures.transient_metadata.saturating_sub(1);
                return Err(BucketError::Transient {
                    message: "rate limited".into(),
                });
            }
        }
        self.with_objects(|objects| match objects.get_mut(key) {
            Some(object) => {
                merge_metadata(&mut object.metadata, metadata);
                if acl.is_some() {
                    object.acl = acl;
                }
                Ok(())
            }
            None => Err(()),
        })
        .map_err(|()| self.not_found(key))
    }

    async fn copy(
        &self,
        key: &str,
        dest_bucket: &str,
        dest_key: &str,
        metadata: &ObjectMetadata,
        acl: Option<PredefinedAcl>,
    ) -> std::result::Result<(), BucketError> {
        self.inner.calls.copy.fetch_add(1, Ordering::SeqCst);
        if self.inner.failures.lock().unwrap().copy_keys.contains(key) {
            return Err(BucketError::Provider {
                message: format!("copy of {} rejected", key),
            });
        }
        let mut buckets = self.inner.buckets.lock().unwrap();
        let mut copied = buckets
            .get(&self.name)
            .and_then(|objects| objects.get(key).cloned())
            .ok_or_else(|| self.not_found(key))?;
        merge_metadata(&mut copied.metadata, metadata);
        copied.acl = acl;
        buckets
            .get_mut(dest_bucket)
            .ok_or_else(|| BucketError::BucketNotFound(dest_bucket.to_string()))?
            .insert(dest_key.to_string(), copied);
        Ok(())
    }

    async fn list(
        &self,
        prefix: &str,
        page_token: Option<&str>,
    ) -> std::result::Result<ObjectPage, BucketError> {
        self.inner.calls.list.fetch_add(1, Ordering::SeqCst);
        let start = page_token
            .and_then(|token| token.parse::<usize>().ok())
            .unwrap_or(0);
        let matching: Vec<String> = self.with_objects(|objects| {
            objects
                .keys()
                .filter(|key| key.starts_with(prefix))
                .cloned()
                .collect()
        });
        let end = (start + self.inner.page_size).min(matching.len());
        Ok(ObjectPage {
            names: matching[start.min(end)..end].to_vec(),
            next_page_token: (end < matching.len()).then(|| end.to_string()),
        })
    }

    async fn signed_url(
        &self,
        key: &str,
        expires_at: DateTime<Utc>,
        method: &str,
    ) -> std::result::Result<String, BucketError> {
        self.inner.calls.signed_url.fetch_add(1, Ordering::SeqCst);
        Ok(format!(
            "https://storage.test/{}/{}?method={}&expires={}&signature=test",
            self.name,
            key,
            method,
            expires_at.timestamp()
        ))
    }
}

/// Catalog over a vector, paging two resources at a time.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    resources: Mutex<Vec<Resource>>,
}

impl MemoryCatalog {
    pub fn new(resources: Vec<Resource>) -> Self {
        Self {
            resources: Mutex::new(resources),
        }
    }

    pub fn add(&self, resource: Resource) {
        self.resources.lock().unwrap().push(resource);
    }
}

#[async_trait]
impl ResourceCatalog for MemoryCatalog {
    async fn resolve(&self, sha1: &str) -> Result<Option<Resource>> {
        Ok(self
            .resources
            .lock()
            .unwrap()
            .iter()
            .find(|resource| resource.sha1 == sha1)
            .cloned())
    }

    async fn list_by_collection(
        &self,
        collection: &str,
        cursor: Option<&str>,
    ) -> Result<ResourcePage> {
        let start = cursor.and_then(|c| c.parse::<usize>().ok()).unwrap_or(0);
        let members: Vec<Resource> = self
            .resources
            .lock()
            .unwrap()
            .iter()
            .filter(|resource| resource.collection == collection)
            .cloned()
            .collect();
        let end = (start + 2).min(members.len());
        Ok(ResourcePage {
            resources: members[start.min(end)..end].to_vec(),
            next_cursor: (end < members.len()).then(|| end.to_string()),
        })
    }

    async fn list_by_hash(
        &self,
        collection: &str,
        after_sha1: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Resource>> {
        let mut members: Vec<Resource> = self
            .resources
            .lock()
            .unwrap()
            .iter()
            .filter(|resource| resource.collection == collection)
            .filter(|resource| after_sha1.is_none_or(|after| resource.sha1.as_str() > after))
            .cloned()
            .collect();
        members.sort_by(|a, b| a.sha1.cmp(&b.sha1).then(a.filename.cmp(&b.filename)));
        members.truncate(limit);
        Ok(members)
    }

    async fn known_hashes(&self, candidates: &[String]) -> Result<HashSet<String>> {
        let resources = self.resources.lock().unwrap();
        Ok(candidates
            .iter()
            .filter(|sha1| resources.iter().any(|resource| &resource.sha1 == *sha1))
            .cloned()
            .collect())
    }
}

/// Storage that can only stream content, with no bucket identity.
#[derive(Debug, Default)]
pub struct StreamOnlyStorage {
    resources: Vec<Resource>,
    contents: HashMap<String, Vec<u8>>,
}

impl StreamOnlyStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, filename: &str, data: &[u8], collection: &str) -> Self {
        let sha1 = sha1_of(data);
        self.resources.push(Resource::new(
            &sha1,
            filename,
            data.len() as u64,
            collection,
        ));
        self.contents.insert(sha1, data.to_vec());
        self
    }

    /// Catalog entry without stored content.
    pub fn with_missing(mut self, filename: &str, sha1: &str, collection: &str) -> Self {
        self.resources
            .push(Resource::new(sha1, filename, 0, collection));
        self
    }

    pub fn resource(&self, filename: &str) -> Resource {
        self.resources
            .iter()
            .find(|resource| resource.filename == filename)
            .cloned()
            .expect("resource registered")
    }
}

#[async_trait]
impl ResourceStorage for StreamOnlyStorage {
    fn name(&self) -> &str {
        "stream-only"
    }

    async fn get_stream(&self, resource: &Resource) -> Result<Option<ByteStream>> {
        Ok(self.contents.get(&resource.sha1).cloned().map(bytes_stream))
    }

    async fn get_objects_by_collection(&self, collection: &str) -> Result<StorageObjects> {
        let objects: Vec<Result<StorageObject>> = self
            .resources
            .iter()
            .filter(|resource| resource.collection == collection)
            .map(|resource| {
                let content = self.contents.get(&resource.sha1).cloned();
                Ok(StorageObject::new(resource.clone(), move || {
                    async move { Ok(content.map(bytes_stream)) }.boxed()
                }))
            })
            .collect();
        Ok(stream::iter(objects).boxed())
    }
}

//! src/services/local_store.rs
//!
//! LocalObjectStore: a `BucketClient` backed by SQLite for object metadata
//! and local disk for object payloads sharded beneath
//! `base_path/{bucket}/{shard}/{shard}/{key}`. It lets the connector run
//! end to end (and be served by `bucket-connector serve`) without a cloud
//! account.

use crate::{
    client::{
        Bucket as BucketHandle, BucketClient, BucketError, ByteStream, ObjectMetadata, ObjectPage,
        PredefinedAcl,
    },
    models::{bucket::Bucket, object::Object},
    services::target::uri::encode_path,
};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt, pin_mut};
use hmac::{Hmac, Mac};
use md5::Context;
use sha2::Sha256;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum LocalStoreError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{0}` already exists")]
    BucketAlreadyExists(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("no signing secret configured")]
    SigningDisabled,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type LocalStoreResult<T> = Result<T, LocalStoreError>;

impl From<LocalStoreError> for BucketError {
    fn from(err: LocalStoreError) -> Self {
        match err {
            LocalStoreError::BucketNotFound(name) => BucketError::BucketNotFound(name),
            LocalStoreError::ObjectNotFound { bucket, key } => {
                BucketError::ObjectNotFound { bucket, key }
            }
            LocalStoreError::Io(err) => BucketError::Io(err),
            LocalStoreError::Sqlx(sqlx::Error::PoolTimedOut) => BucketError::Transient {
                message: "database pool timed out".into(),
            },
            other => BucketError::Provider {
                message: other.to_string(),
            },
        }
    }
}

/// One page of keys plus the key to continue after.
#[derive(Debug)]
pub struct KeyPage {
    pub keys: Vec<String>,
    pub next_continuation_token: Option<String>,
}

/// LocalObjectStore provides the object operations the connector needs:
/// - Write an object from a byte stream (disk payload + metadata row)
/// - Read, update metadata, copy and soft-delete objects
/// - List keys by prefix with continuation tokens
/// - Sign and verify time-limited URLs
#[derive(Clone)]
pub struct LocalObjectStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    /// Public HTTP endpoint serving the buckets, without trailing slash.
    pub public_endpoint: String,

    signing_secret: Option<Arc<Vec<u8>>>,
}

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;
pub const LIST_PAGE_SIZE: usize = 1000;

impl LocalObjectStore {
    /// Create a new store backed by the provided SQLite pool and using
    /// `base_path` as the root directory for object payloads.
    pub fn new(
        db: Arc<SqlitePool>,
        base_path: impl Into<PathBuf>,
        public_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            public_endpoint: public_endpoint.into().trim_end_matches('/').to_string(),
            signing_secret: None,
        }
    }

    pub fn with_signing_secret(mut self, secret: impl AsRef<[u8]>) -> Self {
        self.signing_secret = Some(Arc::new(secret.as_ref().to_vec()));
        self
    }

    /// Basic key validation to avoid trivial path traversal vectors.
    fn ensure_key_safe(&self, key: &str) -> LocalStoreResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(LocalStoreError::InvalidObjectKey);
        }
        if key.starts_with('/') || key.split('/').any(|segment| segment == "..") {
            return Err(LocalStoreError::InvalidObjectKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(LocalStoreError::InvalidObjectKey);
        }
        Ok(())
    }

    /// Validate bucket name format.
    ///
    /// Enforces S3-like naming rules:
    /// - 3–63 characters
    /// - lowercase letters, digits, dots, hyphens only
    /// - cannot start/end with dot or hyphen
    /// - cannot contain consecutive dots or dot-hyphen patterns
    /// - cannot look like an IPv4 address
    fn ensure_bucket_name_safe(&self, name: &str) -> LocalStoreResult<()> {
        let invalid = |reason: &str| LocalStoreError::InvalidBucketName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        let len = name.len();
        if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
            return Err(invalid("must be between 3 and 63 characters"));
        }
        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
        {
            return Err(invalid(
                "allowed characters are lowercase letters, digits, dots, and hyphens",
            ));
        }
        if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
            return Err(invalid("must start and end with a lowercase letter or digit"));
        }
        if name.contains("..") || name.contains("-.") || name.contains(".-") {
            return Err(invalid(
                "cannot contain consecutive dots or dot-hyphen combinations",
            ));
        }
        if is_ipv4_like(name) {
            return Err(invalid("must not be formatted like an IP address"));
        }
        Ok(())
    }

    fn bucket_root(&self, bucket_name: &str) -> PathBuf {
        self.base_path.join(bucket_name)
    }

    /// Two-level shard identifiers from MD5(bucket/key), as lowercase hex.
    fn object_shards(bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// base_path/bucket/{shard}/{shard}/{key}. Parent directories may not exist yet.
    fn object_path(&self, bucket_name: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket_name, key);
        let mut path = self.bucket_root(bucket_name);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    async fn fetch_bucket(&self, bucket: &str) -> LocalStoreResult<Bucket> {
        self.ensure_bucket_name_safe(bucket)?;
        sqlx::query_as::<Sqlite, Bucket>("SELECT id, name, created_at FROM buckets WHERE name = ?")
            .bind(bucket)
            .fetch_one(&*self.db)
            .await
            .map_err(|err| match err {
                sqlx::Error::RowNotFound => LocalStoreError::BucketNotFound(bucket.to_string()),
                other => LocalStoreError::Sqlx(other),
            })
    }

    /// Fetch a non-deleted object metadata record.
    async fn fetch_object(&self, bucket: &Bucket, key: &str) -> LocalStoreResult<Object> {
        sqlx::query_as::<_, Object>(
            "SELECT id, bucket_id, key, content_type, cache_control, content_encoding, acl,
                    size_bytes, etag, last_modified, is_deleted
             FROM objects
             WHERE key = ? AND bucket_id = ? AND is_deleted = 0",
        )
        .bind(key)
        .bind(bucket.id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => LocalStoreError::ObjectNotFound {
                bucket: bucket.name.clone(),
                key: key.to_string(),
            },
            other => LocalStoreError::Sqlx(other),
        })
    }

    /// Stream an object to disk and upsert its metadata.
    ///
    /// - Writes bytes incrementally to a temporary file.
    /// - Computes the MD5 etag and size while streaming.
    /// - Atomically renames into final location.
    /// - Upserts metadata row (overwrite semantics).
    pub async fn write_object_stream<S>(
        &self,
        bucket: &str,
        key: &str,
        metadata: &ObjectMetadata,
        acl: PredefinedAcl,
        stream: S,
    ) -> LocalStoreResult<Object>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let file_path = self.object_path(&bucket_rec.name, key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            LocalStoreError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = self
            .bucket_root(&bucket_rec.name)
            .join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(LocalStoreError::Io(err));
                }
            };
            size_bytes += chunk.len() as i64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(LocalStoreError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(LocalStoreError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(LocalStoreError::Io(err));
        }
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(LocalStoreError::Io(err));
            }
        }

        let etag = format!("{:x}", digest.compute());

        let row = sqlx::query_as::<_, Object>(
            r#"
            INSERT INTO objects (
                id, bucket_id, key, content_type, cache_control, content_encoding,
                acl, size_bytes, etag, last_modified, is_deleted
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
            ON CONFLICT(bucket_id, key) DO UPDATE SET
                content_type = excluded.content_type,
                cache_control = excluded.cache_control,
                content_encoding = excluded.content_encoding,
                acl = excluded.acl,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified,
                is_deleted = 0
            RETURNING id, bucket_id, key, content_type, cache_control, content_encoding,
                      acl, size_bytes, etag, last_modified, is_deleted
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(bucket_rec.id)
        .bind(key)
        .bind(metadata.content_type.clone())
        .bind(metadata.cache_control.clone())
        .bind(metadata.content_encoding.clone())
        .bind(acl.as_str())
        .bind(size_bytes)
        .bind(&etag)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await;

        match row {
            Ok(obj) => Ok(obj),
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(LocalStoreError::Sqlx(err))
            }
        }
    }

    /// Metadata and an opened File handle ready for streaming out.
    pub async fn get_object_reader(
        &self,
        bucket: &str,
        key: &str,
    ) -> LocalStoreResult<(Object, File)> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let object = self.fetch_object(&bucket_rec, key).await?;

        let file_path = self.object_path(&bucket_rec.name, key);
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                LocalStoreError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                }
            } else {
                LocalStoreError::Io(err)
            }
        })?;

        Ok((object, file))
    }

    pub async fn get_object_metadata(&self, bucket: &str, key: &str) -> LocalStoreResult<Object> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        self.fetch_object(&bucket_rec, key).await
    }

    /// Replace the HTTP metadata (and optionally the ACL) of an object.
    pub async fn update_object_metadata(
        &self,
        bucket: &str,
        key: &str,
        metadata: &ObjectMetadata,
        acl: Option<PredefinedAcl>,
    ) -> LocalStoreResult<Object> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let current = self.fetch_object(&bucket_rec, key).await?;

        let acl = acl.map(|acl| acl.as_str().to_string()).unwrap_or(current.acl);
        let updated = sqlx::query_as::<_, Object>(
            r#"
            UPDATE objects
            SET content_type = ?, cache_control = ?, content_encoding = ?, acl = ?,
                last_modified = ?
            WHERE key = ? AND bucket_id = ? AND is_deleted = 0
            RETURNING id, bucket_id, key, content_type, cache_control, content_encoding,
                      acl, size_bytes, etag, last_modified, is_deleted
            "#,
        )
        .bind(metadata.content_type.clone().or(current.content_type))
        .bind(metadata.cache_control.clone().or(current.cache_control))
        .bind(metadata.content_encoding.clone().or(current.content_encoding))
        .bind(acl)
        .bind(Utc::now())
        .bind(key)
        .bind(bucket_rec.id)
        .fetch_one(&*self.db)
        .await?;

        Ok(updated)
    }

    /// Copy an object's payload into another (or the same) bucket.
    ///
    /// Metadata not given in `metadata` is carried over from the source.
    pub async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dest_bucket: &str,
        dest_key: &str,
        metadata: &ObjectMetadata,
        acl: Option<PredefinedAcl>,
    ) -> LocalStoreResult<Object> {
        let (source, file) = self.get_object_reader(src_bucket, src_key).await?;
        let merged = ObjectMetadata {
            content_type: metadata.content_type.clone().or(source.content_type.clone()),
            cache_control: metadata.cache_control.clone().or(source.cache_control.clone()),
            content_encoding: metadata
                .content_encoding
                .clone()
                .or(source.content_encoding.clone()),
        };
        let acl = acl
            .or_else(|| PredefinedAcl::parse(&source.acl))
            .unwrap_or(PredefinedAcl::Private);
        self.write_object_stream(dest_bucket, dest_key, &merged, acl, ReaderStream::new(file))
            .await
    }

    /// List non-deleted keys under `prefix` in lexicographical order.
    pub async fn list_keys(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<&str>,
        max_keys: usize,
    ) -> LocalStoreResult<KeyPage> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let max_keys = max_keys.clamp(1, LIST_PAGE_SIZE);
        let fetch_limit = max_keys + 1;

        let mut builder =
            QueryBuilder::<Sqlite>::new("SELECT key FROM objects WHERE bucket_id = ");
        builder.push_bind(bucket_rec.id);
        builder.push(" AND is_deleted = 0");
        if !prefix.is_empty() {
            builder.push(" AND substr(key, 1, ");
            builder.push_bind(prefix.chars().count() as i64);
            builder.push(") = ");
            builder.push_bind(prefix);
        }
        if let Some(token) = continuation_token {
            builder.push(" AND key > ");
            builder.push_bind(token);
        }
        builder.push(" ORDER BY key ASC LIMIT ");
        builder.push_bind(fetch_limit as i64);

        let mut keys: Vec<String> = builder
            .build_query_scalar::<String>()
            .fetch_all(&*self.db)
            .await?;

        let mut next_continuation_token = None;
        if keys.len() == fetch_limit {
            keys.pop();
            next_continuation_token = keys.last().cloned();
        }

        Ok(KeyPage {
            keys,
            next_continuation_token,
        })
    }

    /// Soft-delete an object and remove its payload.
    ///
    /// Returns ObjectNotFound if the object is absent or already deleted.
    pub async fn delete_object(&self, bucket: &str, key: &str) -> LocalStoreResult<Object> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let object = self.fetch_object(&bucket_rec, key).await?;

        let result =
            sqlx::query("UPDATE objects SET is_deleted = 1 WHERE key = ? AND bucket_id = ?")
                .bind(key)
                .bind(bucket_rec.id)
                .execute(&*self.db)
                .await?;

        if result.rows_affected() == 0 {
            return Err(LocalStoreError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }

        let file_path = self.object_path(&bucket_rec.name, key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(LocalStoreError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            let bucket_root = self.bucket_root(&bucket_rec.name);
            self.prune_empty_dirs(parent, &bucket_root).await;
        }

        Ok(object)
    }

    /// Create a bucket and initialize its directory.
    pub async fn create_bucket(&self, name: &str) -> LocalStoreResult<Bucket> {
        self.ensure_bucket_name_safe(name)?;
        fs::create_dir_all(self.bucket_root(name)).await?;

        let bucket = Bucket {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: Utc::now(),
        };

        match sqlx::query("INSERT INTO buckets (id, name, created_at) VALUES (?, ?, ?)")
            .bind(bucket.id)
            .bind(&bucket.name)
            .bind(bucket.created_at)
            .execute(&*self.db)
            .await
        {
            Ok(_) => Ok(bucket),
            Err(err) if is_unique_violation(&err) => {
                Err(LocalStoreError::BucketAlreadyExists(name.to_string()))
            }
            Err(err) => Err(LocalStoreError::Sqlx(err)),
        }
    }

    fn signature(
        &self,
        method: &str,
        bucket: &str,
        key: &str,
        expires: i64,
    ) -> LocalStoreResult<HmacSha256> {
        let secret = self
            .signing_secret
            .as_ref()
            .ok_or(LocalStoreError::SigningDisabled)?;
        let mut mac =
            HmacSha256::new_from_slice(secret).map_err(|_| LocalStoreError::SigningDisabled)?;
        let payload = format!(
            "{}\n{}/{}\n{}",
            method.to_ascii_uppercase(),
            bucket,
            key,
            expires
        );
        mac.update(payload.as_bytes());
        Ok(mac)
    }

    /// `{endpoint}/{bucket}/{key}?expires={epoch}&signature={hex}`.
    pub fn sign_url(
        &self,
        bucket: &str,
        key: &str,
        expires_at: DateTime<Utc>,
        method: &str,
    ) -> LocalStoreResult<String> {
        let expires = expires_at.timestamp();
        let signature = hex::encode(
            self.signature(method, bucket, key, expires)?
                .finalize()
                .into_bytes(),
        );
        Ok(format!(
            "{}/{}/{}?expires={}&signature={}",
            self.public_endpoint,
            bucket,
            encode_path(key),
            expires,
            signature
        ))
    }

    /// True when `signature` is valid for the request and not yet expired.
    pub fn verify_signature(
        &self,
        method: &str,
        bucket: &str,
        key: &str,
        expires: i64,
        signature: &str,
    ) -> bool {
        if expires < Utc::now().timestamp() {
            return false;
        }
        let Ok(provided) = hex::decode(signature) else {
            return false;
        };
        match self.signature(method, bucket, key, expires) {
            Ok(mac) => mac.verify_slice(&provided).is_ok(),
            Err(_) => false,
        }
    }

    /// Recursively remove empty directories up to bucket root.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl BucketClient for LocalObjectStore {
    async fn bucket(&self, name: &str) -> Result<Arc<dyn BucketHandle>, BucketError> {
        let record = self.fetch_bucket(name).await?;
        Ok(Arc::new(LocalBucket {
            store: self.clone(),
            record,
        }))
    }

    fn public_base_uri(&self, bucket: &str) -> String {
        format!("{}/{}/", self.public_endpoint, bucket)
    }
}

/// Handle to one bucket of a [`LocalObjectStore`].
pub struct LocalBucket {
    store: LocalObjectStore,
    record: Bucket,
}

#[async_trait]
impl BucketHandle for LocalBucket {
    fn name(&self) -> &str {
        &self.record.name
    }

    async fn upload(
        &self,
        key: &str,
        body: ByteStream,
        metadata: &ObjectMetadata,
        acl: Option<PredefinedAcl>,
    ) -> Result<(), BucketError> {
        self.store
            .write_object_stream(
                &self.record.name,
                key,
                metadata,
                acl.unwrap_or(PredefinedAcl::Private),
                body,
            )
            .await?;
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<ByteStream, BucketError> {
        let (_, file) = self.store.get_object_reader(&self.record.name, key).await?;
        Ok(ReaderStream::new(file).boxed())
    }

    async fn exists(&self, key: &str) -> Result<bool, BucketError> {
        match self.store.fetch_object(&self.record, key).await {
            Ok(_) => Ok(true),
            Err(LocalStoreError::ObjectNotFound { .. }) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), BucketError> {
        self.store.delete_object(&self.record.name, key).await?;
        Ok(())
    }

    async fn update_metadata(
        &self,
        key: &str,
        metadata: &ObjectMetadata,
        acl: Option<PredefinedAcl>,
    ) -> Result<(), BucketError> {
        self.store
            .update_object_metadata(&self.record.name, key, metadata, acl)
            .await?;
        Ok(())
    }

    async fn copy(
        &self,
        key: &str,
        dest_bucket: &str,
        dest_key: &str,
        metadata: &ObjectMetadata,
        acl: Option<PredefinedAcl>,
    ) -> Result<(), BucketError> {
        self.store
            .copy_object(&self.record.name, key, dest_bucket, dest_key, metadata, acl)
            .await?;
        Ok(())
    }

    async fn list(
        &self,
        prefix: &str,
        page_token: Option<&str>,
    ) -> Result<ObjectPage, BucketError> {
        let after = page_token.map(decode_continuation_token);
        let page = self
            .store
            .list_keys(&self.record.name, prefix, after.as_deref(), LIST_PAGE_SIZE)
            .await?;
        Ok(ObjectPage {
            names: page.keys,
            next_page_token: page
                .next_continuation_token
                .as_deref()
                .map(encode_continuation_token),
        })
    }

    async fn signed_url(
        &self,
        key: &str,
        expires_at: DateTime<Utc>,
        method: &str,
    ) -> Result<String, BucketError> {
        Ok(self
            .store
            .sign_url(&self.record.name, key, expires_at, method)?)
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

fn encode_continuation_token(token: &str) -> String {
    general_purpose::STANDARD.encode(token)
}

fn decode_continuation_token(token: &str) -> String {
    general_purpose::STANDARD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| token.to_string())
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}

//! Bucket client capability consumed by `Storage` and `Target`.
//!
//! A [`BucketClient`] is an already-authenticated handle to a cloud object
//! store. It hands out [`Bucket`] handles which perform the object level
//! operations. Implementations decide how credentials are loaded; the core
//! only ever sees these two traits.

use std::{fmt, io, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream::BoxStream};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Owned, sendable stream of object bytes.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Wrap an in-memory buffer as a [`ByteStream`].
pub fn bytes_stream(data: impl Into<Bytes>) -> ByteStream {
    let data = data.into();
    futures::stream::once(async move { Ok(data) }).boxed()
}

/// Drain a [`ByteStream`] into memory.
pub async fn collect_stream(mut stream: ByteStream) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk?);
    }
    Ok(out)
}

/// Canned access control applied to an object on write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PredefinedAcl {
    PublicRead,
    Private,
}

impl PredefinedAcl {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredefinedAcl::PublicRead => "publicRead",
            PredefinedAcl::Private => "private",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "publicRead" => Some(PredefinedAcl::PublicRead),
            "private" => Some(PredefinedAcl::Private),
            _ => None,
        }
    }
}

/// HTTP-visible metadata stored alongside an object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    pub content_encoding: Option<String>,
}

impl ObjectMetadata {
    pub fn with_content_type(content_type: impl Into<String>) -> Self {
        Self {
            content_type: Some(content_type.into()),
            ..Self::default()
        }
    }
}

/// One page of a prefix listing.
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    pub names: Vec<String>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Error)]
pub enum BucketError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("transient provider error: {message}")]
    Transient { message: String },
    #[error("provider error: {message}")]
    Provider { message: String },
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl BucketError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BucketError::ObjectNotFound { .. })
    }

    /// Errors worth another attempt after a pause.
    pub fn is_transient(&self) -> bool {
        match self {
            BucketError::Transient { .. } => true,
            BucketError::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }
}

/// Authenticated access to an object store.
#[async_trait]
pub trait BucketClient: Send + Sync {
    /// Resolve a handle for the named bucket.
    async fn bucket(&self, name: &str) -> Result<Arc<dyn Bucket>, BucketError>;

    /// Generic public endpoint for objects of `bucket`, ending with `/`.
    fn public_base_uri(&self, bucket: &str) -> String;
}

/// Object level operations on one bucket.
#[async_trait]
pub trait Bucket: Send + Sync {
    fn name(&self) -> &str;

    async fn upload(
        &self,
        key: &str,
        body: ByteStream,
        metadata: &ObjectMetadata,
        acl: Option<PredefinedAcl>,
    ) -> Result<(), BucketError>;

    async fn download(&self, key: &str) -> Result<ByteStream, BucketError>;

    async fn exists(&self, key: &str) -> Result<bool, BucketError>;

    /// Remove an object. A missing object yields `ObjectNotFound`.
    async fn delete(&self, key: &str) -> Result<(), BucketError>;

    async fn update_metadata(
        &self,
        key: &str,
        metadata: &ObjectMetadata,
        acl: Option<PredefinedAcl>,
    ) -> Result<(), BucketError>;

    /// Server-side copy of `key` into `dest_bucket/dest_key`.
    async fn copy(
        &self,
        key: &str,
        dest_bucket: &str,
        dest_key: &str,
        metadata: &ObjectMetadata,
        acl: Option<PredefinedAcl>,
    ) -> Result<(), BucketError>;

    async fn list(&self, prefix: &str, page_token: Option<&str>)
    -> Result<ObjectPage, BucketError>;

    /// Full URL granting `method` access to `key` until `expires_at`.
    async fn signed_url(
        &self,
        key: &str,
        expires_at: DateTime<Utc>,
        method: &str,
    ) -> Result<String, BucketError>;
}

impl fmt::Debug for dyn Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bucket").field("name", &self.name()).finish()
    }
}

/// Follow continuation tokens until every object name under `prefix` is read.
pub async fn list_all(bucket: &dyn Bucket, prefix: &str) -> Result<Vec<String>, BucketError> {
    let mut names = Vec::new();
    let mut token: Option<String> = None;
    loop {
        let page = bucket.list(prefix, token.as_deref()).await?;
        names.extend(page.names);
        match page.next_page_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }
    Ok(names)
}

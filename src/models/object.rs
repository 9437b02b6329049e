//! Represents an object (file) stored in a local bucket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::client::PredefinedAcl;

/// Metadata row of a single object within a local bucket.
///
/// The `Object` struct stores its metadata, not the actual content bytes.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Object {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Foreign key linking to the parent bucket.
    pub bucket_id: Uuid,

    /// Object key (path-like identifier within the bucket).
    pub key: String,

    /// Content type (MIME type).
    pub content_type: Option<String>,

    pub cache_control: Option<String>,

    /// `gzip` when the payload is stored compressed.
    pub content_encoding: Option<String>,

    /// Canned ACL name, see `PredefinedAcl::as_str`.
    pub acl: String,

    /// Size in bytes.
    pub size_bytes: i64,

    /// MD5 of the stored payload.
    pub etag: Option<String>,

    /// Timestamp when object was last modified.
    pub last_modified: DateTime<Utc>,

    /// Whether the object is marked as deleted (soft delete).
    pub is_deleted: bool,
}

impl Object {
    pub fn is_public(&self) -> bool {
        PredefinedAcl::parse(&self.acl) == Some(PredefinedAcl::PublicRead)
    }
}

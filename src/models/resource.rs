//! Content-addressed resource as tracked by the resource catalog.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::media_types::{file_extension, media_type_from_filename};

/// An immutable binary asset.
///
/// Identity for storage purposes is the SHA-1 digest: two resources with the
/// same content share one stored object whatever their filenames.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// Lowercase hex SHA-1 of the content.
    pub sha1: String,

    /// Legacy MD5 digest, when the catalog still records it.
    pub md5: Option<String>,

    /// User-facing filename including extension.
    pub filename: String,

    /// IANA media type, derived from the filename extension.
    pub media_type: String,

    pub file_size: i64,

    /// Logical collection this resource belongs to.
    pub collection: String,

    /// Overrides the default `{sha1}/{filename}` publication path.
    pub publication_path: Option<String>,
}

impl Resource {
    pub fn new(
        sha1: impl Into<String>,
        filename: impl Into<String>,
        file_size: u64,
        collection: impl Into<String>,
    ) -> Self {
        let filename = filename.into();
        Self {
            sha1: sha1.into(),
            md5: None,
            media_type: media_type_from_filename(&filename).to_string(),
            filename,
            file_size: file_size as i64,
            collection: collection.into(),
            publication_path: None,
        }
    }

    /// Rename the resource, re-deriving the media type.
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self.media_type = media_type_from_filename(&self.filename).to_string();
        self
    }

    pub fn with_md5(mut self, md5: Option<String>) -> Self {
        self.md5 = md5;
        self
    }

    pub fn with_publication_path(mut self, path: impl Into<String>) -> Self {
        self.publication_path = Some(path.into());
        self
    }

    pub fn file_extension(&self) -> String {
        file_extension(&self.filename)
    }
}

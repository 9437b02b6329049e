//! Resource catalog capability and its SQLite implementation.
//!
//! The catalog is owned by the host application. The connector only reads
//! from it: enumerate a collection, resolve a hash, walk hashes in order for
//! maintenance, and check which hashes are still referenced.

use async_trait::async_trait;
use futures::{StreamExt, stream::BoxStream};
use sqlx::{FromRow, QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{
    collections::{HashSet, VecDeque},
    sync::Arc,
};

use crate::{errors::Result, models::resource::Resource};

pub const DEFAULT_PAGE_SIZE: usize = 500;

/// One page of a collection listing.
#[derive(Debug, Clone, Default)]
pub struct ResourcePage {
    pub resources: Vec<Resource>,
    /// Opaque cursor for the next page, `None` on the last page.
    pub next_cursor: Option<String>,
}

#[async_trait]
pub trait ResourceCatalog: Send + Sync {
    /// First resource with this content hash, if any.
    async fn resolve(&self, sha1: &str) -> Result<Option<Resource>>;

    /// Resources of `collection` in catalog order, one page at a time.
    async fn list_by_collection(&self, collection: &str, cursor: Option<&str>)
    -> Result<ResourcePage>;

    /// Resources of `collection` ordered by ascending sha1, strictly after
    /// `after_sha1`.
    async fn list_by_hash(
        &self,
        collection: &str,
        after_sha1: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Resource>>;

    /// Subset of `candidates` referenced by at least one resource.
    async fn known_hashes(&self, candidates: &[String]) -> Result<HashSet<String>>;
}

struct PageState {
    catalog: Arc<dyn ResourceCatalog>,
    collection: String,
    cursor: Option<String>,
    buffered: VecDeque<Resource>,
    exhausted: bool,
}

/// Lazily page through a collection. Only one page is held in memory.
pub fn resources_in_collection(
    catalog: Arc<dyn ResourceCatalog>,
    collection: impl Into<String>,
) -> BoxStream<'static, Result<Resource>> {
    let state = PageState {
        catalog,
        collection: collection.into(),
        cursor: None,
        buffered: VecDeque::new(),
        exhausted: false,
    };
    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(resource) = state.buffered.pop_front() {
                return Some((Ok(resource), state));
            }
            if state.exhausted {
                return None;
            }
            let page = state
                .catalog
                .list_by_collection(&state.collection, state.cursor.as_deref())
                .await;
            match page {
                Ok(page) => {
                    state.buffered.extend(page.resources);
                    state.exhausted = page.next_cursor.is_none();
                    state.cursor = page.next_cursor;
                }
                Err(err) => {
                    state.exhausted = true;
                    return Some((Err(err), state));
                }
            }
        }
    })
    .boxed()
}

#[derive(FromRow)]
struct ResourceRow {
    id: i64,
    #[sqlx(flatten)]
    resource: Resource,
}

const RESOURCE_COLUMNS: &str =
    "id, sha1, md5, filename, media_type, file_size, collection, publication_path";

/// Catalog backed by the `resources` table.
#[derive(Clone)]
pub struct SqliteCatalog {
    db: Arc<SqlitePool>,
    page_size: usize,
}

impl SqliteCatalog {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self {
            db,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Record a resource. Re-registering the same (collection, sha1,
    /// filename) is a no-op.
    pub async fn register(&self, resource: &Resource) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO resources (
                sha1, md5, filename, media_type, file_size, collection, publication_path
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(collection, sha1, filename) DO NOTHING
            "#,
        )
        .bind(&resource.sha1)
        .bind(&resource.md5)
        .bind(&resource.filename)
        .bind(&resource.media_type)
        .bind(resource.file_size)
        .bind(&resource.collection)
        .bind(&resource.publication_path)
        .execute(&*self.db)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ResourceCatalog for SqliteCatalog {
    async fn resolve(&self, sha1: &str) -> Result<Option<Resource>> {
        let row = sqlx::query_as::<_, ResourceRow>(&format!(
            "SELECT {} FROM resources WHERE sha1 = ? ORDER BY id LIMIT 1",
            RESOURCE_COLUMNS
        ))
        .bind(sha1)
        .fetch_optional(&*self.db)
        .await?;
        Ok(row.map(|row| row.resource))
    }

    async fn list_by_collection(
        &self,
        collection: &str,
        cursor: Option<&str>,
    ) -> Result<ResourcePage> {
        let after_id = cursor
            .and_then(|cursor| cursor.parse::<i64>().ok())
            .unwrap_or(0);
        let rows = sqlx::query_as::<_, ResourceRow>(&format!(
            "SELECT {} FROM resources WHERE collection = ? AND id > ? ORDER BY id LIMIT ?",
            RESOURCE_COLUMNS
        ))
        .bind(collection)
        .bind(after_id)
        .bind(self.page_size as i64)
        .fetch_all(&*self.db)
        .await?;

        let next_cursor = if rows.len() == self.page_size {
            rows.last().map(|row| row.id.to_string())
        } else {
            None
        };
        Ok(ResourcePage {
            resources: rows.into_iter().map(|row| row.resource).collect(),
            next_cursor,
        })
    }

    async fn list_by_hash(
        &self,
        collection: &str,
        after_sha1: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Resource>> {
        let rows = sqlx::query_as::<_, ResourceRow>(&format!(
            "SELECT {} FROM resources WHERE collection = ? AND sha1 > ? ORDER BY sha1, id LIMIT ?",
            RESOURCE_COLUMNS
        ))
        .bind(collection)
        .bind(after_sha1.unwrap_or(""))
        .bind(limit.max(1) as i64)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows.into_iter().map(|row| row.resource).collect())
    }

    async fn known_hashes(&self, candidates: &[String]) -> Result<HashSet<String>> {
        if candidates.is_empty() {
            return Ok(HashSet::new());
        }
        let mut builder =
            QueryBuilder::<Sqlite>::new("SELECT DISTINCT sha1 FROM resources WHERE sha1 IN (");
        let mut separated = builder.separated(", ");
        for candidate in candidates {
            separated.push_bind(candidate);
        }
        separated.push_unseparated(")");

        let found: Vec<String> = builder
            .build_query_scalar::<String>()
            .fetch_all(&*self.db)
            .await?;
        Ok(found.into_iter().collect())
    }
}

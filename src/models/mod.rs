//! Core data models.
//!
//! `Resource` and `StorageObject` describe content-addressed assets as the
//! connector sees them. `Bucket` and `Object` are the rows of the bundled
//! local backend and map to database tables via `sqlx::FromRow`.

pub mod bucket;
pub mod object;
pub mod resource;
pub mod storage_object;

//! Connector between content-addressed resource storage and public object
//! buckets.
//!
//! [`services::storage::Storage`] imports content under its SHA-1 hash,
//! uploading each distinct content once. [`services::target::Target`]
//! publishes a [`collection::Collection`] to a public bucket, either by
//! server-side copy, by streamed upload with optional gzip transcoding, or in
//! place when storage and target share a bucket. Provider access goes through
//! [`client::BucketClient`]; [`services::local_store::LocalObjectStore`] is
//! the bundled SQLite and filesystem implementation.

pub mod catalog;
pub mod client;
pub mod collection;
pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod hasher;
pub mod media_types;
pub mod messages;
pub mod models;
pub mod routes;
pub mod services;

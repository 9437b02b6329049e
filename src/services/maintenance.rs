//! Operator tasks: connectivity probe, forced republish, metadata repair and
//! orphan detection.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{
    catalog::ResourceCatalog,
    client::{BucketClient, ObjectMetadata, bytes_stream, collect_stream},
    collection::Collection,
    errors::{ConnectorError, Result},
    services::{
        storage::Storage,
        target::{FailedItem, SyncOptions, SyncReport},
    },
};

pub const PROBE_OBJECT_NAME: &str = "connectivity-test.txt";
pub const PROBE_CONTENT: &str = "bucket-connector connectivity test\n";
pub const ORPHAN_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeStep {
    pub step: &'static str,
    pub ok: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectivityReport {
    pub steps: Vec<ProbeStep>,
}

impl ConnectivityReport {
    pub fn succeeded(&self) -> bool {
        !self.steps.is_empty() && self.steps.iter().all(|step| step.ok)
    }

    fn push(&mut self, step: &'static str, result: std::result::Result<String, String>) -> bool {
        let ok = result.is_ok();
        let detail = result.unwrap_or_else(|err| err);
        if ok {
            debug!(step, "{}", detail);
        } else {
            warn!(step, "{}", detail);
        }
        self.steps.push(ProbeStep { step, ok, detail });
        ok
    }
}

/// Write, read back and delete a probe object under `key_prefix`. Stops at
/// the first failing step.
pub async fn connectivity_test(
    client: &dyn BucketClient,
    bucket_name: &str,
    key_prefix: &str,
) -> ConnectivityReport {
    let mut report = ConnectivityReport::default();
    let bucket = match client.bucket(bucket_name).await {
        Ok(bucket) => bucket,
        Err(err) => {
            report.push("connect", Err(format!("bucket {}: {}", bucket_name, err)));
            return report;
        }
    };
    report.push("connect", Ok(format!("bucket {} reachable", bucket_name)));

    let key = format!("{}{}", key_prefix, PROBE_OBJECT_NAME);
    let metadata = ObjectMetadata::with_content_type("text/plain");
    let uploaded = bucket
        .upload(&key, bytes_stream(PROBE_CONTENT), &metadata, None)
        .await
        .map(|()| format!("wrote {}", key))
        .map_err(|err| format!("could not write {}: {}", key, err));
    if !report.push("upload", uploaded) {
        return report;
    }

    let downloaded = match bucket.download(&key).await {
        Ok(stream) => match collect_stream(stream).await {
            Ok(body) if body == PROBE_CONTENT.as_bytes() => Ok(format!("read back {}", key)),
            Ok(body) => Err(format!(
                "content of {} differs ({} bytes read)",
                key,
                body.len()
            )),
            Err(err) => Err(format!("could not read {}: {}", key, err)),
        },
        Err(err) => Err(format!("could not open {}: {}", key, err)),
    };
    let read_ok = report.push("download", downloaded);

    let deleted = bucket
        .delete(&key)
        .await
        .map(|()| format!("deleted {}", key))
        .map_err(|err| format!("could not delete {}: {}", key, err));
    if read_ok {
        report.push("delete", deleted);
    }
    report
}

/// Full sync of a collection, optionally re-transferring present objects.
pub async fn republish_collection(collection: &Collection, force: bool) -> Result<SyncReport> {
    info!(collection = collection.name(), force, "republishing collection");
    collection
        .target()
        .publish_collection_with(collection, SyncOptions { force })
        .await
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairReport {
    pub updated: usize,
    pub failures: Vec<FailedItem>,
    /// Hash to pass as `from` to resume after this run.
    pub last_sha1: Option<String>,
}

/// Re-apply published metadata to every resource of `collection` in
/// ascending hash order, starting after `from_sha1`. Resources sharing a
/// hash are visited once.
pub async fn repair_metadata(
    collection: &Collection,
    catalog: &dyn ResourceCatalog,
    from_sha1: Option<&str>,
    page_size: usize,
) -> Result<RepairReport> {
    if page_size == 0 {
        return Err(ConnectorError::Configuration(
            "page size must be greater than zero".into(),
        ));
    }
    let target = collection.target();
    let mut report = RepairReport {
        last_sha1: from_sha1.map(str::to_string),
        ..RepairReport::default()
    };

    loop {
        let page = catalog
            .list_by_hash(collection.name(), report.last_sha1.as_deref(), page_size)
            .await?;
        if page.is_empty() {
            break;
        }
        for resource in &page {
            if report.last_sha1.as_deref() == Some(resource.sha1.as_str()) {
                continue;
            }
            match target.update_resource_metadata(resource, collection).await {
                Ok(()) => report.updated += 1,
                Err(err) => {
                    let reason = err.to_string();
                    target
                        .messages()
                        .warn(&resource.sha1, &resource.filename, reason.clone());
                    report.failures.push(FailedItem {
                        sha1: resource.sha1.clone(),
                        filename: resource.filename.clone(),
                        reason,
                    });
                }
            }
            report.last_sha1 = Some(resource.sha1.clone());
        }
        if page.len() < page_size {
            break;
        }
    }

    info!(
        collection = collection.name(),
        updated = report.updated,
        failed = report.failures.len(),
        last = ?report.last_sha1,
        "metadata repair finished"
    );
    Ok(report)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrphanMode {
    /// Report only.
    Audit,
    /// Report and delete.
    Delete,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrphanReport {
    pub scanned: usize,
    /// Storage keys whose hash no resource references.
    pub orphans: Vec<String>,
    pub deleted: usize,
    /// Orphans whose deletion failed; the remaining ones are still deleted.
    pub failures: Vec<OrphanFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanFailure {
    pub key: String,
    pub reason: String,
}

/// Find stored objects that no catalog entry references.
pub async fn audit_orphans(
    storage: &Storage,
    catalog: Arc<dyn ResourceCatalog>,
    mode: OrphanMode,
) -> Result<OrphanReport> {
    let mut report = OrphanReport::default();
    let mut token: Option<String> = None;
    loop {
        let page = storage.list_keys(token.as_deref()).await?;
        report.scanned += page.names.len();

        let candidates: Vec<(String, String)> = page
            .names
            .iter()
            .filter_map(|key| {
                storage
                    .hash_from_key(key)
                    .map(|sha1| (key.clone(), sha1.to_string()))
            })
            .collect();
        for batch in candidates.chunks(ORPHAN_BATCH_SIZE) {
            let hashes: Vec<String> = batch.iter().map(|(_, sha1)| sha1.clone()).collect();
            let known = catalog.known_hashes(&hashes).await?;
            report.orphans.extend(
                batch
                    .iter()
                    .filter(|(_, sha1)| !known.contains(sha1))
                    .map(|(key, _)| key.clone()),
            );
        }

        match page.next_page_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }

    if mode == OrphanMode::Delete {
        for key in &report.orphans {
            match storage.delete_key(key).await {
                Ok(_) => report.deleted += 1,
                Err(err) => {
                    warn!(key = %key, "could not delete orphan: {}", err);
                    report.failures.push(OrphanFailure {
                        key: key.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }
    }
    info!(
        scanned = report.scanned,
        orphans = report.orphans.len(),
        deleted = report.deleted,
        failed = report.failures.len(),
        "orphan audit finished"
    );
    Ok(report)
}

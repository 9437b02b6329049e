mod common;

use bucket_connector::{
    client::PredefinedAcl,
    collection::Collection,
    config::{StorageOptions, TargetOptions},
    models::resource::Resource,
    services::{
        maintenance::{self, OrphanMode, PROBE_OBJECT_NAME},
        storage::Storage,
        target::Target,
    },
};
use common::{Calls, MemoryBucketClient, MemoryCatalog, sha1_of};
use std::sync::Arc;

struct Fixture {
    client: MemoryBucketClient,
    catalog: Arc<MemoryCatalog>,
    storage: Arc<Storage>,
    collection: Collection,
}

fn fixture() -> Fixture {
    let client = MemoryBucketClient::new(&["store", "public"]);
    let catalog = Arc::new(MemoryCatalog::default());
    let storage = Arc::new(
        Storage::new(
            "store",
            StorageOptions::new("store").with_key_prefix("res/"),
            Arc::new(client.clone()),
            catalog.clone(),
        )
        .unwrap(),
    );
    let target = Target::new(
        "public",
        TargetOptions::new("public"),
        Arc::new(client.clone()),
    )
    .unwrap();
    let collection = Collection::new("assets", storage.clone(), Arc::new(target));
    Fixture {
        client,
        catalog,
        storage,
        collection,
    }
}

async fn import(fx: &Fixture, filename: &str, body: &str) -> Resource {
    let resource = fx
        .storage
        .import_from_content(body.to_string(), "assets")
        .await
        .unwrap()
        .with_filename(filename);
    fx.catalog.add(resource.clone());
    resource
}

#[tokio::test]
async fn connectivity_probe_cleans_up() {
    let fx = fixture();
    let report = maintenance::connectivity_test(&fx.client, "store", "res/").await;

    assert!(report.succeeded());
    let steps: Vec<_> = report.steps.iter().map(|step| step.step).collect();
    assert_eq!(steps, ["connect", "upload", "download", "delete"]);
    assert!(fx.client.object("store", &format!("res/{}", PROBE_OBJECT_NAME)).is_none());
}

#[tokio::test]
async fn connectivity_probe_reports_missing_bucket() {
    let fx = fixture();
    let report = maintenance::connectivity_test(&fx.client, "nope", "").await;

    assert!(!report.succeeded());
    assert_eq!(report.steps.len(), 1);
    assert!(report.steps[0].detail.contains("nope"));
}

#[tokio::test]
async fn forced_republish_transfers_present_objects() {
    let fx = fixture();
    let logo = import(&fx, "logo.png", "png").await;
    let key = format!("{}/logo.png", logo.sha1);
    fx.client.put("public", &key, b"stale");

    let plain = maintenance::republish_collection(&fx.collection, false)
        .await
        .unwrap();
    assert_eq!(plain.skipped, 1);
    assert_eq!(fx.client.object("public", &key).unwrap().data, b"stale");

    let forced = maintenance::republish_collection(&fx.collection, true)
        .await
        .unwrap();
    assert_eq!(forced.copied, 1);
    let published = fx.client.object("public", &key).unwrap();
    assert_eq!(published.data, b"png");
    assert_eq!(published.acl, Some(PredefinedAcl::PublicRead));
}

#[tokio::test]
async fn repair_walks_hashes_in_order_and_resumes() {
    let fx = fixture();
    let mut resources = Vec::new();
    for (name, body) in [("a.png", "1"), ("b.png", "2"), ("c.png", "3"), ("d.png", "4")] {
        let resource = import(&fx, name, body).await;
        fx.collection
            .target()
            .publish_resource(&resource, &fx.collection)
            .await
            .unwrap();
        resources.push(resource);
    }
    // Same content under a second name: visited once.
    let twin = resources[0].clone().with_filename("z-copy.png");
    fx.catalog.add(twin);
    resources.sort_by(|a, b| a.sha1.cmp(&b.sha1));

    let first = maintenance::repair_metadata(&fx.collection, fx.catalog.as_ref(), None, 2)
        .await
        .unwrap();
    assert_eq!(first.updated, 4);
    assert!(first.failures.is_empty());
    assert_eq!(first.last_sha1.as_deref(), Some(resources[3].sha1.as_str()));

    let updates = Calls::get(&fx.client.calls().update_metadata);
    let resumed = maintenance::repair_metadata(
        &fx.collection,
        fx.catalog.as_ref(),
        Some(&resources[1].sha1),
        2,
    )
    .await
    .unwrap();
    assert_eq!(resumed.updated, 2);
    assert_eq!(Calls::get(&fx.client.calls().update_metadata), updates + 2);
}

#[tokio::test]
async fn repair_records_failures_and_continues() {
    let fx = fixture();
    let published = import(&fx, "a.png", "published").await;
    fx.collection
        .target()
        .publish_resource(&published, &fx.collection)
        .await
        .unwrap();
    let unpublished = import(&fx, "b.png", "never published").await;

    let report = maintenance::repair_metadata(&fx.collection, fx.catalog.as_ref(), None, 10)
        .await
        .unwrap();

    assert_eq!(report.updated, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].sha1, unpublished.sha1);
    assert_eq!(report.failures[0].filename, "b.png");
}

#[tokio::test]
async fn orphans_are_reported_and_optionally_deleted() {
    let fx = fixture();
    let kept = import(&fx, "kept.png", "kept").await;
    for body in ["orphan one", "orphan two", "orphan three"] {
        fx.storage
            .import_from_content(body.to_string(), "assets")
            .await
            .unwrap();
    }
    fx.client.put("store", &format!("res/{}", PROBE_OBJECT_NAME), b"probe");

    let audit = maintenance::audit_orphans(&fx.storage, fx.catalog.clone(), OrphanMode::Audit)
        .await
        .unwrap();
    assert_eq!(audit.scanned, 5);
    assert_eq!(audit.orphans.len(), 3);
    assert_eq!(audit.deleted, 0);
    assert_eq!(fx.client.keys("store").len(), 5);

    let delete = maintenance::audit_orphans(&fx.storage, fx.catalog.clone(), OrphanMode::Delete)
        .await
        .unwrap();
    assert_eq!(delete.deleted, 3);
    let mut remaining = fx.client.keys("store");
    remaining.sort();
    let mut expected = vec![
        format!("res/{}", PROBE_OBJECT_NAME),
        format!("res/{}", kept.sha1),
    ];
    expected.sort();
    assert_eq!(remaining, expected);
    assert!(!delete.orphans.contains(&format!("res/{}", sha1_of(b"kept"))));
}

#[tokio::test]
async fn orphan_cleanup_continues_past_a_failed_delete() {
    let fx = fixture();
    let mut keys = Vec::new();
    for body in ["orphan one", "orphan two", "orphan three"] {
        let resource = fx
            .storage
            .import_from_content(body.to_string(), "assets")
            .await
            .unwrap();
        keys.push(format!("res/{}", resource.sha1));
    }
    keys.sort();
    fx.client.fail_delete_of(&keys[0]);

    let report = maintenance::audit_orphans(&fx.storage, fx.catalog.clone(), OrphanMode::Delete)
        .await
        .unwrap();

    assert_eq!(report.orphans.len(), 3);
    assert_eq!(report.deleted, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].key, keys[0]);
    assert!(report.failures[0].reason.contains("rejected"));
    assert_eq!(fx.client.keys("store"), vec![keys[0].clone()]);
}

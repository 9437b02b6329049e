mod common;

use bucket_connector::{
    collection::Collection,
    config::{StorageOptions, TargetOptions},
    errors::ConnectorError,
    models::resource::Resource,
    services::{storage::Storage, target::Target},
};
use common::{Calls, MemoryBucketClient, MemoryCatalog};
use std::sync::Arc;

const SHA1: &str = "abc123";

fn collection(
    client: &MemoryBucketClient,
    storage: StorageOptions,
    target: Target,
) -> Collection {
    let storage = Storage::new(
        "store",
        storage,
        Arc::new(client.clone()),
        Arc::new(MemoryCatalog::default()),
    )
    .unwrap();
    Collection::new("assets", Arc::new(storage), Arc::new(target))
}

fn target(client: &MemoryBucketClient, options: TargetOptions) -> Target {
    Target::new("public", options, Arc::new(client.clone())).unwrap()
}

fn logo() -> Resource {
    Resource::new(SHA1, "logo.svg", 10, "assets")
}

async fn uri_for(collection: &Collection, resource: &Resource) -> String {
    collection
        .target()
        .public_persistent_resource_uri(resource, collection)
        .await
        .unwrap()
}

#[tokio::test]
async fn renders_configured_pattern() {
    let client = MemoryBucketClient::new(&["store", "public"]);
    let mut options = TargetOptions::new("public").with_base_uri("https://cdn.example/");
    options.persistent_resource_uris.pattern = Some("{baseUri}{sha1}/{filename}".into());
    let collection = collection(&client, StorageOptions::new("store"), target(&client, options));

    assert_eq!(
        uri_for(&collection, &logo()).await,
        "https://cdn.example/abc123/logo.svg"
    );
}

#[tokio::test]
async fn default_pattern_includes_key_prefix() {
    let client = MemoryBucketClient::new(&["store", "public"]);
    let options = TargetOptions::new("public")
        .with_key_prefix("site/")
        .with_base_uri("https://cdn.example");
    let collection = collection(&client, StorageOptions::new("store"), target(&client, options));
    let resource = Resource::new(SHA1, "my logo.svg", 10, "assets");

    assert_eq!(
        uri_for(&collection, &resource).await,
        "https://cdn.example/site/abc123/my%20logo.svg"
    );
}

#[tokio::test]
async fn falls_back_to_the_provider_endpoint() {
    let client = MemoryBucketClient::new(&["store", "public"]);
    let collection = collection(
        &client,
        StorageOptions::new("store"),
        target(&client, TargetOptions::new("public")),
    );

    assert_eq!(
        uri_for(&collection, &logo()).await,
        "https://storage.test/public/abc123/logo.svg"
    );
}

#[tokio::test]
async fn one_bucket_uri_points_at_the_stored_object() {
    let client = MemoryBucketClient::new(&["store"]);
    let collection = collection(
        &client,
        StorageOptions::new("store").with_key_prefix("res/"),
        target(
            &client,
            TargetOptions::new("store")
                .with_key_prefix("res/")
                .with_base_uri("https://cdn.example/"),
        ),
    );

    assert_eq!(
        uri_for(&collection, &logo()).await,
        "https://cdn.example/res/abc123"
    );
}

#[tokio::test]
async fn signed_uris_carry_the_provider_signature() {
    let client = MemoryBucketClient::new(&["store", "public"]);
    let mut options = TargetOptions::new("public").with_base_uri("https://cdn.example/");
    options.persistent_resource_uris.enable_signing = true;
    options.persistent_resource_uris.signature_lifetime = 60;
    let collection = collection(&client, StorageOptions::new("store"), target(&client, options));

    let before = chrono::Utc::now().timestamp();
    let uri = uri_for(&collection, &logo()).await;

    let (path, query) = uri.split_once('?').unwrap();
    assert_eq!(path, "https://cdn.example/abc123/logo.svg");
    assert!(query.starts_with("method=GET&expires="));
    assert!(query.ends_with("&signature=test"));
    let expires: i64 = query
        .trim_start_matches("method=GET&expires=")
        .trim_end_matches("&signature=test")
        .parse()
        .unwrap();
    assert!(expires >= before + 60 && expires <= before + 62);
    assert_eq!(Calls::get(&client.calls().signed_url), 1);
}

#[tokio::test]
async fn unsigned_uris_never_call_the_provider() {
    let client = MemoryBucketClient::new(&["store", "public"]);
    let collection = collection(
        &client,
        StorageOptions::new("store"),
        target(&client, TargetOptions::new("public").with_base_uri("https://cdn.example/")),
    );
    uri_for(&collection, &logo()).await;
    assert_eq!(Calls::get(&client.calls().signed_url), 0);
}

#[tokio::test]
async fn custom_base_uri_provider_wins() {
    let client = MemoryBucketClient::new(&["store", "public"]);
    let mut options = TargetOptions::new("public").with_base_uri("https://cdn.example/");
    options.custom_base_uri_method = Some("tenant".into());
    let target = target(&client, options).with_base_uri_provider(
        "tenant",
        Arc::new(|name: &str, _: &TargetOptions| Some(format!("https://{}.tenant.example", name))),
    );
    let collection = collection(&client, StorageOptions::new("store"), target);

    assert_eq!(
        uri_for(&collection, &logo()).await,
        "https://public.tenant.example/abc123/logo.svg"
    );
}

#[tokio::test]
async fn unknown_base_uri_provider_is_a_configuration_error() {
    let client = MemoryBucketClient::new(&["store", "public"]);
    let mut options = TargetOptions::new("public");
    options.custom_base_uri_method = Some("missing".into());
    let collection = collection(&client, StorageOptions::new("store"), target(&client, options));

    let err = collection
        .target()
        .public_persistent_resource_uri(&logo(), &collection)
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectorError::Configuration(_)));
}

#[test]
fn out_of_range_signature_lifetime_is_rejected() {
    let client = MemoryBucketClient::new(&["public"]);
    let mut options = TargetOptions::new("public");
    options.persistent_resource_uris.enable_signing = true;
    options.persistent_resource_uris.signature_lifetime = 10_000_000_000_000_000;

    let err = Target::new("public", options, Arc::new(client))
        .err()
        .unwrap();
    assert!(matches!(err, ConnectorError::Configuration(_)));
}

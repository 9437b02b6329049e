use axum::{
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use bucket_connector::{
    catalog::{ResourceCatalog, SqliteCatalog},
    client::{BucketClient, PredefinedAcl, collect_stream},
    collection::{Collection, ResourceStorage, SourceLocatable},
    config::{StorageOptions, TargetOptions},
    db,
    handlers::{
        AppState,
        object_handlers::{SignatureQuery, get_object, head_object},
    },
    services::{local_store::LocalObjectStore, storage::Storage, target::Target},
};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tempfile::TempDir;

struct Backend {
    _dir: TempDir,
    store: LocalObjectStore,
    catalog: Arc<SqliteCatalog>,
}

async fn backend() -> Backend {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::run_migrations(&pool).await.unwrap();
    let pool = Arc::new(pool);
    let dir = tempfile::tempdir().unwrap();
    let store = LocalObjectStore::new(pool.clone(), dir.path(), "http://localhost:3000/")
        .with_signing_secret("test-secret");
    store.create_bucket("private-store").await.unwrap();
    store.create_bucket("public-assets").await.unwrap();
    Backend {
        _dir: dir,
        store,
        catalog: Arc::new(SqliteCatalog::new(pool).with_page_size(2)),
    }
}

fn collection(backend: &Backend, target_options: TargetOptions) -> (Arc<Storage>, Collection) {
    let client: Arc<dyn BucketClient> = Arc::new(backend.store.clone());
    let storage = Arc::new(
        Storage::new(
            "private",
            StorageOptions::new("private-store").with_key_prefix("res/"),
            client.clone(),
            backend.catalog.clone(),
        )
        .unwrap(),
    );
    let target = Target::new("public", target_options, client).unwrap();
    let collection = Collection::new("assets", storage.clone(), Arc::new(target));
    (storage, collection)
}

fn state(backend: &Backend) -> AppState {
    AppState {
        store: backend.store.clone(),
        cors_allow_origin: "https://app.example".into(),
    }
}

#[tokio::test]
async fn imports_publish_and_serve_end_to_end() {
    let backend = backend().await;
    let (storage, collection) = collection(&backend, TargetOptions::new("public-assets"));

    let style = storage
        .import_from_content("h1 { color: teal }\n".repeat(50), "assets")
        .await
        .unwrap()
        .with_filename("site.css");
    let logo = storage
        .import_from_content(&b"\x89PNG fake"[..], "assets")
        .await
        .unwrap()
        .with_filename("logo.png");
    backend.catalog.register(&style).await.unwrap();
    backend.catalog.register(&logo).await.unwrap();
    backend.catalog.register(&logo).await.unwrap();

    let report = collection.publish().await.unwrap();
    assert_eq!(report.copied, 1);
    assert_eq!(report.compressed, 1);
    assert!(report.failures.is_empty());

    let key = format!("{}/site.css", style.sha1);
    let response = get_object(
        State(state(&backend)),
        Path(("public-assets".to_string(), key.clone())),
        Query(SignatureQuery::default()),
    )
    .await
    .unwrap()
    .into_response();
    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers[header::CONTENT_TYPE], "text/css");
    assert_eq!(headers[header::CONTENT_ENCODING], "gzip");
    assert_eq!(headers[header::CACHE_CONTROL], "public, max-age=1209600");
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "https://app.example");

    let again = collection.publish().await.unwrap();
    assert_eq!(again.skipped, 2);
    assert_eq!(again.removed, 0);
}

#[tokio::test]
async fn private_objects_need_a_valid_signature() {
    let backend = backend().await;
    let (storage, collection) = collection(&backend, TargetOptions::new("public-assets"));
    let doc = storage
        .import_from_content(&b"%PDF-1.7"[..], "assets")
        .await
        .unwrap()
        .with_filename("doc.pdf");
    let key = format!("res/{}", doc.sha1);

    let denied = head_object(
        State(state(&backend)),
        Path(("private-store".to_string(), key.clone())),
        Query(SignatureQuery::default()),
    )
    .await;
    assert!(denied.is_err());

    let bucket = collection.storage().as_locatable().unwrap().source_bucket().await.unwrap();
    let signed = bucket
        .signed_url(&key, chrono::Utc::now() + chrono::Duration::seconds(60), "GET")
        .await
        .unwrap();
    assert!(signed.starts_with(&format!("http://localhost:3000/private-store/{}?expires=", key)));
    let query: String = signed.split_once('?').unwrap().1.to_string();
    let params: Vec<(&str, &str)> = query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .collect();
    let expires = params[0].1.parse::<i64>().unwrap();
    let signature = params[1].1.to_string();

    let response = get_object(
        State(state(&backend)),
        Path(("private-store".to_string(), key.clone())),
        Query(SignatureQuery {
            expires: Some(expires),
            signature: Some(signature.clone()),
        }),
    )
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let tampered = get_object(
        State(state(&backend)),
        Path(("private-store".to_string(), key)),
        Query(SignatureQuery {
            expires: Some(expires + 1),
            signature: Some(signature),
        }),
    )
    .await;
    assert!(tampered.is_err());
}

#[tokio::test]
async fn one_bucket_publish_flips_the_acl() {
    let backend = backend().await;
    let (storage, collection) = collection(
        &backend,
        TargetOptions::new("private-store").with_key_prefix("res/"),
    );
    let logo = storage
        .import_from_content(&b"png"[..], "assets")
        .await
        .unwrap()
        .with_filename("logo.png");
    let key = format!("res/{}", logo.sha1);
    let before = backend.store.get_object_metadata("private-store", &key).await.unwrap();
    assert_eq!(before.acl, PredefinedAcl::Private.as_str());

    collection
        .target()
        .publish_resource(&logo, &collection)
        .await
        .unwrap();

    let after = backend.store.get_object_metadata("private-store", &key).await.unwrap();
    assert!(after.is_public());
    assert_eq!(after.content_type.as_deref(), Some("image/png"));
    let uri = collection
        .target()
        .public_persistent_resource_uri(&logo, &collection)
        .await
        .unwrap();
    assert_eq!(uri, format!("http://localhost:3000/private-store/{}", key));
}

#[tokio::test]
async fn catalog_pages_through_a_collection() {
    let backend = backend().await;
    let (storage, _) = collection(&backend, TargetOptions::new("public-assets"));
    for n in 0..5 {
        let resource = storage
            .import_from_content(format!("item {}", n), "assets")
            .await
            .unwrap()
            .with_filename(format!("{}.txt", n));
        backend.catalog.register(&resource).await.unwrap();
    }

    let first = backend.catalog.list_by_collection("assets", None).await.unwrap();
    assert_eq!(first.resources.len(), 2);
    let cursor = first.next_cursor.unwrap();
    let second = backend
        .catalog
        .list_by_collection("assets", Some(&cursor))
        .await
        .unwrap();
    assert_eq!(second.resources[0].filename, "2.txt");

    let stream = storage
        .get_stream(&second.resources[0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(collect_stream(stream).await.unwrap(), b"item 2");
}

use anyhow::{Context, Result, bail};
use axum::Router;
use bucket_connector::{
    catalog::{DEFAULT_PAGE_SIZE, ResourceCatalog, SqliteCatalog},
    client::BucketClient,
    collection::Collection,
    config::{AppConfig, Command, ConnectorSettings, DEFAULT_CORS_ALLOW_ORIGIN},
    db,
    handlers::AppState,
    messages::Severity,
    routes,
    services::{
        local_store::LocalObjectStore,
        maintenance::{self, OrphanMode},
        storage::Storage,
        target::Target,
    },
};
use futures::StreamExt;
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let (cfg, command) = AppConfig::from_env_and_args()?;
    tracing::debug!("Starting bucket-connector with config: {:?}", cfg);

    if !Path::new(&cfg.data_dir).exists() {
        fs::create_dir_all(&cfg.data_dir)?;
        tracing::info!("Created data directory at {}", cfg.data_dir);
    }
    ensure_database_dir(&cfg.database_url)?;

    let pool = Arc::new(
        db::connect(&cfg.database_url, 5)
            .await
            .with_context(|| format!("connecting to {}", cfg.database_url))?,
    );

    if matches!(command, Command::Migrate) {
        db::run_migrations(&pool).await?;
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    let mut store = LocalObjectStore::new(pool.clone(), &cfg.data_dir, &cfg.public_endpoint);
    if let Some(secret) = cfg.signing_secret.as_deref() {
        store = store.with_signing_secret(secret);
    }
    let catalog = Arc::new(SqliteCatalog::new(pool.clone()));

    match command {
        Command::Migrate => Ok(()),
        Command::CreateBucket { name } => {
            let bucket = store.create_bucket(&name).await?;
            println!("created bucket {}", bucket.name);
            Ok(())
        }
        Command::Serve => serve(&cfg, store).await,
        command => {
            let settings = ConnectorSettings::load(Path::new(&cfg.settings_path)).await?;
            run_connector_command(command, &settings, Arc::new(store), catalog).await
        }
    }
}

/// SQLite does not create missing parent directories of its database file.
fn ensure_database_dir(database_url: &str) -> Result<()> {
    let db_path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    if db_path.starts_with(':') {
        return Ok(());
    }
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }
    // sqlx only creates the file itself with `mode=rwc`.
    if !Path::new(db_path).exists() {
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(db_path)
            .with_context(|| format!("creating database file {}", db_path))?;
    }
    Ok(())
}

struct Connector {
    storage: Arc<Storage>,
    collection: Collection,
}

fn build_collection(
    settings: &ConnectorSettings,
    name: &str,
    client: Arc<dyn BucketClient>,
    catalog: Arc<dyn ResourceCatalog>,
) -> Result<Connector> {
    let Some(binding) = settings.collections.get(name) else {
        bail!("unknown collection `{}`", name);
    };
    let storage_options = settings
        .storages
        .get(&binding.storage)
        .with_context(|| format!("unknown storage `{}`", binding.storage))?;
    let target_options = settings
        .targets
        .get(&binding.target)
        .with_context(|| format!("unknown target `{}`", binding.target))?;

    let storage = Arc::new(Storage::new(
        &binding.storage,
        storage_options.clone(),
        client.clone(),
        catalog,
    )?);
    let target = Arc::new(Target::new(&binding.target, target_options.clone(), client)?);
    let collection = Collection::new(name, storage.clone(), target);
    Ok(Connector {
        storage,
        collection,
    })
}

async fn run_connector_command(
    command: Command,
    settings: &ConnectorSettings,
    store: Arc<LocalObjectStore>,
    catalog: Arc<SqliteCatalog>,
) -> Result<()> {
    let client: Arc<dyn BucketClient> = store;
    let dyn_catalog: Arc<dyn ResourceCatalog> = catalog.clone();
    let connector = |name: &str| build_collection(settings, name, client.clone(), dyn_catalog.clone());

    match command {
        Command::Import { collection, file } => {
            let Connector { storage, .. } = connector(&collection)?;
            let path = Path::new(&file);
            let filename = path
                .file_name()
                .and_then(|name| name.to_str())
                .with_context(|| format!("`{}` has no usable file name", file))?;
            let handle = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening {}", file))?;
            let resource = storage
                .import_from_stream(ReaderStream::new(handle).boxed(), Some(filename), &collection)
                .await?;
            catalog.register(&resource).await?;
            println!("{}\t{}\t{}", resource.sha1, resource.media_type, resource.filename);
        }
        Command::Publish { collection } => {
            let Connector { collection, .. } = connector(&collection)?;
            let report = collection.publish().await?;
            print_json(&report)?;
            report_messages(&collection);
        }
        Command::Republish { collection, force } => {
            let Connector { collection, .. } = connector(&collection)?;
            let report = maintenance::republish_collection(&collection, force).await?;
            print_json(&report)?;
            report_messages(&collection);
        }
        Command::Connect { collection } => {
            let Connector { storage, .. } = connector(&collection)?;
            let options = storage.options();
            let report =
                maintenance::connectivity_test(client.as_ref(), &options.bucket, &options.key_prefix)
                    .await;
            print_json(&report)?;
            if !report.succeeded() {
                bail!("connectivity test failed for bucket {}", options.bucket);
            }
        }
        Command::RepairMetadata { collection, from } => {
            let Connector { collection, .. } = connector(&collection)?;
            let report = maintenance::repair_metadata(
                &collection,
                catalog.as_ref(),
                from.as_deref(),
                DEFAULT_PAGE_SIZE,
            )
            .await?;
            print_json(&report)?;
        }
        Command::Orphans {
            collection,
            export,
            delete,
        } => {
            let Connector { storage, .. } = connector(&collection)?;
            let mode = if delete {
                OrphanMode::Delete
            } else {
                OrphanMode::Audit
            };
            let report = maintenance::audit_orphans(&storage, dyn_catalog.clone(), mode).await?;
            match export {
                Some(path) => {
                    let mut listing = report.orphans.join("\n");
                    listing.push('\n');
                    tokio::fs::write(&path, listing)
                        .await
                        .with_context(|| format!("writing {}", path))?;
                    println!("{} orphans written to {}", report.orphans.len(), path);
                }
                None => print_json(&report)?,
            }
            if !report.failures.is_empty() {
                bail!("{} orphans could not be deleted", report.failures.len());
            }
        }
        Command::Uri { collection, sha1 } => {
            let Connector { collection, .. } = connector(&collection)?;
            let Some(resource) = dyn_catalog.resolve(&sha1).await? else {
                bail!("no resource with sha1 {}", sha1);
            };
            let uri = collection
                .target()
                .public_persistent_resource_uri(&resource, &collection)
                .await?;
            println!("{}", uri);
        }
        Command::Migrate | Command::CreateBucket { .. } | Command::Serve => {}
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn report_messages(collection: &Collection) {
    let messages = collection.target().messages();
    let warnings = messages.count(Severity::Warning) + messages.count(Severity::Error);
    if warnings > 0 {
        tracing::warn!("{} resources reported problems", warnings);
    }
}

async fn serve(cfg: &AppConfig, store: LocalObjectStore) -> Result<()> {
    let cors_allow_origin = match ConnectorSettings::load(Path::new(&cfg.settings_path)).await {
        Ok(settings) => settings
            .targets
            .values()
            .next()
            .map(|target| target.cors_allow_origin.clone())
            .unwrap_or_else(|| DEFAULT_CORS_ALLOW_ORIGIN.to_string()),
        Err(err) => {
            tracing::debug!("no connector settings ({}), using default CORS origin", err);
            DEFAULT_CORS_ALLOW_ORIGIN.to_string()
        }
    };
    let state = AppState {
        store,
        cors_allow_origin,
    };
    let app: Router = routes::routes::routes().with_state(state);

    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Serving buckets on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

//! Configuration: typed storage/target options, the connector settings file,
//! and the process configuration of the `bucket-connector` binary.

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, env, path::Path};

use crate::errors::{ConnectorError, Result};

pub const DEFAULT_SIGNATURE_LIFETIME_SECS: u64 = 600;
/// Longest accepted signed-URI lifetime: seven days.
pub const MAX_SIGNATURE_LIFETIME_SECS: u64 = 7 * 24 * 60 * 60;
pub const DEFAULT_GZIP_LEVEL: u32 = 9;
pub const DEFAULT_CORS_ALLOW_ORIGIN: &str = "*";
pub const DEFAULT_GZIP_MEDIA_TYPES: [&str; 6] = [
    "text/plain",
    "text/css",
    "text/javascript",
    "application/javascript",
    "application/json",
    "image/svg+xml",
];

fn normalize_key_prefix(prefix: &str) -> String {
    prefix.trim_start_matches('/').to_string()
}

fn ensure_bucket(kind: &str, bucket: &str) -> Result<()> {
    if bucket.trim().is_empty() {
        return Err(ConnectorError::Configuration(format!(
            "{} option `bucket` must not be empty",
            kind
        )));
    }
    Ok(())
}

/// Options of a content-addressed storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StorageOptions {
    pub bucket: String,
    #[serde(default)]
    pub key_prefix: String,
}

impl StorageOptions {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key_prefix: String::new(),
        }
    }

    pub fn with_key_prefix(mut self, prefix: &str) -> Self {
        self.key_prefix = prefix.to_string();
        self
    }

    /// Check required fields and normalize the key prefix.
    pub fn validate(mut self) -> Result<Self> {
        ensure_bucket("storage", &self.bucket)?;
        self.key_prefix = normalize_key_prefix(&self.key_prefix);
        Ok(self)
    }
}

/// How public URIs of published resources are built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PersistentResourceUris {
    /// Template; placeholders are `{baseUri} {bucketName} {keyPrefix}
    /// {sha1} {md5} {filename} {fileExtension}`.
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub enable_signing: bool,
    /// Seconds a signed URI stays valid.
    #[serde(default = "default_signature_lifetime")]
    pub signature_lifetime: u64,
}

impl Default for PersistentResourceUris {
    fn default() -> Self {
        Self {
            pattern: None,
            enable_signing: false,
            signature_lifetime: DEFAULT_SIGNATURE_LIFETIME_SECS,
        }
    }
}

fn default_signature_lifetime() -> u64 {
    DEFAULT_SIGNATURE_LIFETIME_SECS
}

fn default_cors_allow_origin() -> String {
    DEFAULT_CORS_ALLOW_ORIGIN.to_string()
}

fn default_gzip_level() -> u32 {
    DEFAULT_GZIP_LEVEL
}

fn default_gzip_media_types() -> Vec<String> {
    DEFAULT_GZIP_MEDIA_TYPES
        .iter()
        .map(|media_type| media_type.to_string())
        .collect()
}

/// Options of a publication target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TargetOptions {
    pub bucket: String,
    #[serde(default)]
    pub key_prefix: String,
    #[serde(default)]
    pub base_uri: Option<String>,
    #[serde(default)]
    pub persistent_resource_uris: PersistentResourceUris,
    #[serde(default = "default_cors_allow_origin")]
    pub cors_allow_origin: String,
    #[serde(default = "default_gzip_level")]
    pub gzip_compression_level: u32,
    #[serde(default = "default_gzip_media_types")]
    pub gzip_compression_media_types: Vec<String>,
    /// Name of a registered base URI provider.
    #[serde(default)]
    pub custom_base_uri_method: Option<String>,
}

impl TargetOptions {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key_prefix: String::new(),
            base_uri: None,
            persistent_resource_uris: PersistentResourceUris::default(),
            cors_allow_origin: default_cors_allow_origin(),
            gzip_compression_level: DEFAULT_GZIP_LEVEL,
            gzip_compression_media_types: default_gzip_media_types(),
            custom_base_uri_method: None,
        }
    }

    pub fn with_key_prefix(mut self, prefix: &str) -> Self {
        self.key_prefix = prefix.to_string();
        self
    }

    pub fn with_base_uri(mut self, base_uri: impl Into<String>) -> Self {
        self.base_uri = Some(base_uri.into());
        self
    }

    pub fn validate(mut self) -> Result<Self> {
        ensure_bucket("target", &self.bucket)?;
        if !(1..=9).contains(&self.gzip_compression_level) {
            return Err(ConnectorError::Configuration(format!(
                "gzipCompressionLevel must be between 1 and 9, got {}",
                self.gzip_compression_level
            )));
        }
        if self.persistent_resource_uris.enable_signing
            && self.persistent_resource_uris.signature_lifetime == 0
        {
            return Err(ConnectorError::Configuration(
                "persistentResourceUris.signatureLifetime must be positive when signing is enabled"
                    .into(),
            ));
        }
        if self.persistent_resource_uris.signature_lifetime > MAX_SIGNATURE_LIFETIME_SECS {
            return Err(ConnectorError::Configuration(format!(
                "persistentResourceUris.signatureLifetime must not exceed {} seconds, got {}",
                MAX_SIGNATURE_LIFETIME_SECS, self.persistent_resource_uris.signature_lifetime
            )));
        }
        self.key_prefix = normalize_key_prefix(&self.key_prefix);
        Ok(self)
    }
}

/// Binding of one collection to a storage and a target by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectionSettings {
    pub storage: String,
    pub target: String,
}

/// Contents of the connector settings file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectorSettings {
    #[serde(default)]
    pub storages: BTreeMap<String, StorageOptions>,
    #[serde(default)]
    pub targets: BTreeMap<String, TargetOptions>,
    #[serde(default)]
    pub collections: BTreeMap<String, CollectionSettings>,
}

impl ConnectorSettings {
    pub fn from_json(raw: &str) -> Result<Self> {
        let settings: ConnectorSettings = serde_json::from_str(raw)
            .map_err(|err| ConnectorError::Configuration(err.to_string()))?;
        settings.validate()
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|err| {
            ConnectorError::Configuration(format!(
                "cannot read settings file {}: {}",
                path.display(),
                err
            ))
        })?;
        Self::from_json(&raw)
    }

    fn validate(mut self) -> Result<Self> {
        self.storages = self
            .storages
            .into_iter()
            .map(|(name, options)| options.validate().map(|options| (name, options)))
            .collect::<Result<_>>()?;
        self.targets = self
            .targets
            .into_iter()
            .map(|(name, options)| options.validate().map(|options| (name, options)))
            .collect::<Result<_>>()?;
        for (name, binding) in &self.collections {
            if !self.storages.contains_key(&binding.storage) {
                return Err(ConnectorError::Configuration(format!(
                    "collection `{}` refers to unknown storage `{}`",
                    name, binding.storage
                )));
            }
            if !self.targets.contains_key(&binding.target) {
                return Err(ConnectorError::Configuration(format!(
                    "collection `{}` refers to unknown target `{}`",
                    name, binding.target
                )));
            }
        }
        Ok(self)
    }
}

/// Centralized process configuration of the binary.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: String,
    pub database_url: String,
    pub settings_path: String,
    pub public_endpoint: String,
    /// Secret for signed URLs of the local backend.
    pub signing_secret: Option<String>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Publish content-addressed resources to object storage buckets")]
pub struct Args {
    /// Host to bind to (overrides BUCKET_CONNECTOR_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides BUCKET_CONNECTOR_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where local bucket payloads live (overrides BUCKET_CONNECTOR_DATA_DIR)
    #[arg(long)]
    pub data_dir: Option<String>,

    /// Database URL (overrides BUCKET_CONNECTOR_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Connector settings file (overrides BUCKET_CONNECTOR_SETTINGS)
    #[arg(long)]
    pub settings: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run migrations and exit
    Migrate,
    /// Create a bucket in the local backend
    CreateBucket { name: String },
    /// Import a file into a collection's storage and register it
    Import { collection: String, file: String },
    /// Publish every resource of a collection to its target
    Publish { collection: String },
    /// Upload, download and delete a probe object in the collection's storage
    Connect { collection: String },
    /// Republish a collection; with --force, re-transfer existing objects
    Republish {
        collection: String,
        #[arg(long)]
        force: bool,
    },
    /// Re-apply target metadata, ordered by hash and resumable
    RepairMetadata {
        collection: String,
        /// Continue after this sha1
        #[arg(long)]
        from: Option<String>,
    },
    /// Find storage objects no catalog entry refers to
    Orphans {
        collection: String,
        /// Write orphan keys to this file (never deletes)
        #[arg(long)]
        export: Option<String>,
        #[arg(long, conflicts_with = "export")]
        delete: bool,
    },
    /// Print the public URI of a resource
    Uri { collection: String, sha1: String },
    /// Serve local buckets over HTTP
    Serve,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the command.
    pub fn from_env_and_args() -> anyhow::Result<(Self, Command)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("BUCKET_CONNECTOR_HOST").unwrap_or_else(|_| "127.0.0.1".into());
        let env_port = match env::var("BUCKET_CONNECTOR_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing BUCKET_CONNECTOR_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 3000,
            Err(err) => return Err(err).context("reading BUCKET_CONNECTOR_PORT"),
        };
        let env_data =
            env::var("BUCKET_CONNECTOR_DATA_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_db = env::var("BUCKET_CONNECTOR_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/connector.db".into());
        let env_settings =
            env::var("BUCKET_CONNECTOR_SETTINGS").unwrap_or_else(|_| "./connector.json".into());
        let signing_secret = env::var("BUCKET_CONNECTOR_SIGNING_SECRET").ok();

        // --- Merge ---
        let host = args.host.unwrap_or(env_host);
        let port = args.port.unwrap_or(env_port);
        let public_endpoint = env::var("BUCKET_CONNECTOR_PUBLIC_ENDPOINT")
            .unwrap_or_else(|_| format!("http://{}:{}", host, port));
        let cfg = Self {
            host,
            port,
            data_dir: args.data_dir.unwrap_or(env_data),
            database_url: args.database_url.unwrap_or(env_db),
            settings_path: args.settings.unwrap_or(env_settings),
            public_endpoint,
            signing_secret,
        };

        Ok((cfg, args.command))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

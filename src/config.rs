use crate::services::retrieval::{Delivery, PARTIAL_WINDOW};
use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, ValueEnum};
use std::{env, fmt, str::FromStr};

/// Which object store the relay commits to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    /// SQLite metadata plus payloads on local disk.
    #[default]
    Local,
    /// Remote blob REST service.
    Http,
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Directory holding in-progress upload buffers.
    pub scratch_dir: String,
    pub backend: StoreBackend,
    pub storage_dir: String,
    pub database_url: String,
    /// Prefix for URLs of locally stored objects.
    pub public_base_url: Option<String>,
    pub blob_api_url: String,
    pub blob_token: Option<String>,
    pub delivery: Delivery,
    /// Extension an object needs to be considered by `/latest`.
    pub latest_extension: String,
    pub partial_window: usize,
    pub strict_chunk_order: bool,
    /// Sessions that receive no chunk for this long are released by the
    /// sweeper. Zero disables sweeping.
    pub session_max_age_secs: u64,
    pub max_body_bytes: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Chunked archive upload relay")]
pub struct Args {
    /// Host to bind to (overrides ARCHIVE_RELAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides ARCHIVE_RELAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory for upload scratch buffers (overrides ARCHIVE_RELAY_SCRATCH_DIR)
    #[arg(long)]
    pub scratch_dir: Option<String>,

    /// Object store backend (overrides ARCHIVE_RELAY_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<StoreBackend>,

    /// Directory where local objects are stored (overrides ARCHIVE_RELAY_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL for local object metadata (overrides ARCHIVE_RELAY_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// URL prefix for local objects (overrides ARCHIVE_RELAY_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Blob service API endpoint (overrides ARCHIVE_RELAY_BLOB_API_URL)
    #[arg(long)]
    pub blob_api_url: Option<String>,

    /// How full downloads are delivered (overrides ARCHIVE_RELAY_DELIVERY)
    #[arg(long, value_enum)]
    pub delivery: Option<Delivery>,

    /// Extension considered by /latest (overrides ARCHIVE_RELAY_LATEST_EXTENSION)
    #[arg(long)]
    pub latest_extension: Option<String>,

    /// Byte window served by /latest/partial (overrides ARCHIVE_RELAY_PARTIAL_WINDOW)
    #[arg(long)]
    pub partial_window: Option<usize>,

    /// Reject chunks whose number is not the next expected one
    #[arg(long)]
    pub strict_chunk_order: bool,

    /// Release sessions older than this many seconds (overrides ARCHIVE_RELAY_SESSION_MAX_AGE_SECS)
    #[arg(long)]
    pub session_max_age_secs: Option<u64>,

    /// Maximum request body size (overrides ARCHIVE_RELAY_MAX_BODY_BYTES)
    #[arg(long)]
    pub max_body_bytes: Option<usize>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            scratch_dir: env::temp_dir().join("uploads").display().to_string(),
            backend: StoreBackend::Local,
            storage_dir: "./data/objects".into(),
            database_url: "sqlite://./data/meta/archive_relay.db".into(),
            public_base_url: None,
            blob_api_url: "https://blob.vercel-storage.com".into(),
            blob_token: None,
            delivery: Delivery::Proxy,
            latest_extension: ".zip".into(),
            partial_window: PARTIAL_WINDOW,
            strict_chunk_order: false,
            session_max_age_secs: 60 * 60,
            max_body_bytes: 16 * 1024 * 1024,
        }
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::merge(Args::parse())
    }

    /// Merge parsed CLI args over the environment, over defaults.
    pub fn merge(args: Args) -> Result<Self> {
        let defaults = Self::default();

        // --- Environment fallback ---
        let env_host = env_or("ARCHIVE_RELAY_HOST", defaults.host);
        let env_port = env_parse("ARCHIVE_RELAY_PORT", defaults.port)?;
        let env_scratch = env_or("ARCHIVE_RELAY_SCRATCH_DIR", defaults.scratch_dir);
        let env_backend = env_enum("ARCHIVE_RELAY_BACKEND", defaults.backend)?;
        let env_storage = env_or("ARCHIVE_RELAY_STORAGE_DIR", defaults.storage_dir);
        let env_db = env_or("ARCHIVE_RELAY_DATABASE_URL", defaults.database_url);
        let env_public = env::var("ARCHIVE_RELAY_PUBLIC_BASE_URL").ok();
        let env_blob_api = env_or("ARCHIVE_RELAY_BLOB_API_URL", defaults.blob_api_url);
        let env_delivery = env_enum("ARCHIVE_RELAY_DELIVERY", defaults.delivery)?;
        let env_extension = env_or("ARCHIVE_RELAY_LATEST_EXTENSION", defaults.latest_extension);
        let env_window = env_parse("ARCHIVE_RELAY_PARTIAL_WINDOW", defaults.partial_window)?;
        let env_strict =
            env_parse("ARCHIVE_RELAY_STRICT_CHUNK_ORDER", defaults.strict_chunk_order)?;
        let env_max_age =
            env_parse("ARCHIVE_RELAY_SESSION_MAX_AGE_SECS", defaults.session_max_age_secs)?;
        let env_max_body = env_parse("ARCHIVE_RELAY_MAX_BODY_BYTES", defaults.max_body_bytes)?;

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            scratch_dir: args.scratch_dir.unwrap_or(env_scratch),
            backend: args.backend.unwrap_or(env_backend),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            public_base_url: args.public_base_url.or(env_public),
            blob_api_url: args.blob_api_url.unwrap_or(env_blob_api),
            blob_token: env::var("BLOB_READ_WRITE_TOKEN").ok().filter(|t| !t.is_empty()),
            delivery: args.delivery.unwrap_or(env_delivery),
            latest_extension: args.latest_extension.unwrap_or(env_extension),
            partial_window: args.partial_window.unwrap_or(env_window),
            strict_chunk_order: args.strict_chunk_order || env_strict,
            session_max_age_secs: args.session_max_age_secs.unwrap_or(env_max_age),
            max_body_bytes: args.max_body_bytes.unwrap_or(env_max_body),
        };

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.partial_window == 0 {
            bail!("partial window must be at least one byte");
        }
        if self.max_body_bytes == 0 {
            bail!("max body size must be at least one byte");
        }
        if self.backend == StoreBackend::Http && self.blob_token.is_none() {
            bail!("the http backend requires BLOB_READ_WRITE_TOKEN");
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Prefix for local object URLs; defaults to this server's `/blobs`.
    pub fn public_base_url(&self) -> String {
        match &self.public_base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => {
                let host = match self.host.as_str() {
                    "0.0.0.0" | "::" => "127.0.0.1",
                    other => other,
                };
                format!("http://{}:{}/blobs", host, self.port)
            }
        }
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("scratch_dir", &self.scratch_dir)
            .field("backend", &self.backend)
            .field("storage_dir", &self.storage_dir)
            .field("database_url", &self.database_url)
            .field("public_base_url", &self.public_base_url)
            .field("blob_api_url", &self.blob_api_url)
            .field("blob_token", &self.blob_token.as_ref().map(|_| "<redacted>"))
            .field("delivery", &self.delivery)
            .field("latest_extension", &self.latest_extension)
            .field("partial_window", &self.partial_window)
            .field("strict_chunk_order", &self.strict_chunk_order)
            .field("session_max_age_secs", &self.session_max_age_secs)
            .field("max_body_bytes", &self.max_body_bytes)
            .finish()
    }
}

fn env_or(key: &str, default: String) -> String {
    env::var(key).unwrap_or(default)
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}

fn env_enum<T: ValueEnum>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(value) => T::from_str(&value, true)
            .map_err(|err| anyhow!("parsing {} value `{}`: {}", key, value, err)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}

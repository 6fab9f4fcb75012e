use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Bucket holding thumbnails and their manifests.
    pub thumbs_bucket: String,
    pub allow_resize: bool,
    pub upscale: bool,
    /// Largest permitted upscale in percent, 0 for unlimited.
    pub upscale_threshold: u32,
    pub lock_timeout: Option<Duration>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "IIIF thumbnail layout service")]
pub struct Args {
    /// Host to bind to (overrides THUMBS_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides THUMBS_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where objects are stored (overrides THUMBS_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides THUMBS_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Bucket for thumbnails (overrides THUMBS_BUCKET)
    #[arg(long)]
    pub thumbs_bucket: Option<String>,

    /// Serve resized derivatives when no exact match exists (overrides THUMBS_ALLOW_RESIZE)
    #[arg(long)]
    pub allow_resize: Option<bool>,

    /// Allow enlarging a smaller derivative (overrides THUMBS_UPSCALE)
    #[arg(long)]
    pub upscale: Option<bool>,

    /// Maximum upscale percentage, 0 = unlimited (overrides THUMBS_UPSCALE_THRESHOLD)
    #[arg(long)]
    pub upscale_threshold: Option<u32>,

    /// Seconds to wait for a busy asset before giving up (overrides THUMBS_LOCK_TIMEOUT_SECS)
    #[arg(long)]
    pub lock_timeout_secs: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

/// Read and parse an optional environment variable.
fn env_parsed<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::from_args(args)?, migrate))
    }

    /// Merge already-parsed CLI args over the environment and defaults.
    pub fn from_args(args: Args) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = env::var("THUMBS_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_parsed::<u16>("THUMBS_PORT")?.unwrap_or(3000);
        let env_storage = env::var("THUMBS_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_db = env::var("THUMBS_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/thumbs.db".into());
        let env_bucket = env::var("THUMBS_BUCKET").unwrap_or_else(|_| "thumbs".into());
        let env_allow_resize = env_parsed::<bool>("THUMBS_ALLOW_RESIZE")?.unwrap_or(true);
        let env_upscale = env_parsed::<bool>("THUMBS_UPSCALE")?.unwrap_or(false);
        let env_threshold = env_parsed::<u32>("THUMBS_UPSCALE_THRESHOLD")?.unwrap_or(0);
        let env_lock_timeout = env_parsed::<u64>("THUMBS_LOCK_TIMEOUT_SECS")?;

        // --- Merge ---
        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            thumbs_bucket: args.thumbs_bucket.unwrap_or(env_bucket),
            allow_resize: args.allow_resize.unwrap_or(env_allow_resize),
            upscale: args.upscale.unwrap_or(env_upscale),
            upscale_threshold: args.upscale_threshold.unwrap_or(env_threshold),
            lock_timeout: args
                .lock_timeout_secs
                .or(env_lock_timeout)
                .map(Duration::from_secs),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

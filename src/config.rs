use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub upload_dir: String,
    pub trash_dir: String,
    pub database_url: String,
    pub max_upload_bytes: usize,
    pub timeout_secs: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Minimal file storage service")]
pub struct Args {
    /// Host to bind to (overrides FILE_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILE_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory for active file blobs (overrides FILE_STORE_UPLOAD_DIR)
    #[arg(long)]
    pub upload_dir: Option<String>,

    /// Directory soft-deleted blobs are moved to (overrides FILE_STORE_TRASH_DIR)
    #[arg(long)]
    pub trash_dir: Option<String>,

    /// Database URL (overrides FILE_STORE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Largest accepted request body in bytes (overrides FILE_STORE_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Deadline for metadata and blob calls (overrides FILE_STORE_TIMEOUT_SECS)
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::merge(args)?, migrate))
    }

    /// CLI values win over environment values, which win over defaults.
    fn merge(args: Args) -> Result<Self> {
        let env_host = env::var("FILE_STORE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_parse("FILE_STORE_PORT", 8080u16)?;
        let env_upload = env::var("FILE_STORE_UPLOAD_DIR")
            .unwrap_or_else(|_| "./file_path/upload_file_dir".into());
        let env_trash = env::var("FILE_STORE_TRASH_DIR")
            .unwrap_or_else(|_| "./file_path/deleted_file_dir".into());
        let env_db = env::var("FILE_STORE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/file_store.db".into());
        let env_max_upload = env_parse("FILE_STORE_MAX_UPLOAD_BYTES", 80usize << 20)?;
        let env_timeout = env_parse("FILE_STORE_TIMEOUT_SECS", 5u64)?;

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            upload_dir: args.upload_dir.unwrap_or(env_upload),
            trash_dir: args.trash_dir.unwrap_or(env_trash),
            database_url: args.database_url.unwrap_or(env_db),
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_upload),
            timeout_secs: args.timeout_secs.unwrap_or(env_timeout),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
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

use anyhow::{Context, Result};
use axum::Router;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::{fs, net::TcpListener};
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

use services::{
    blob_store::BlobStore, file_service::FileService, metadata_store::SqliteMetadataStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting file-store with config: {:?}", cfg);

    // --- Ensure upload + trash directories exist ---
    let blobs = BlobStore::new(&cfg.upload_dir, &cfg.trash_dir);
    blobs
        .ensure_dirs()
        .await
        .context("creating upload and trash directories")?;
    tracing::info!(
        "Storing uploads in {} and deleted files in {}",
        blobs.upload_dir().display(),
        blobs.trash_dir().display()
    );

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).await?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let connect_options = SqliteConnectOptions::from_str(db_url)
        .with_context(|| format!("parsing database URL `{}`", db_url))?
        .create_if_missing(true);
    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await
            .with_context(|| format!("connecting to {}", db_url))?,
    );

    // --- Migrations (idempotent, always applied) ---
    services::metadata_store::run_migrations(&db).await?;
    tracing::info!("Database schema is up to date.");
    if migrate {
        return Ok(());
    }

    // --- Initialize core service ---
    let metadata = Arc::new(SqliteMetadataStore::new(db.clone()));
    let service = FileService::new(metadata, blobs, cfg.timeout());

    // --- Build router ---
    let app: Router = routes::routes::routes(cfg.max_upload_bytes).with_state(service);

    // --- Start server ---
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

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

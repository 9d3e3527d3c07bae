use anyhow::Result;
use axum::Router;
use clap::Parser;
use photo_vault::{
    client,
    config::{AppConfig, Args, Command, RemoteConfig},
    routes,
    services::{
        bucket_router::PathCategory,
        context::ServiceContext,
        key_ledger::KeyLedger,
        layout::PublicLayout,
        metadata_store::MetadataStore,
        remote::{DiskBucketStore, HttpBucketStore, RemoteStore},
    },
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    // --- Client mode ---
    if let Some(Command::Edit { server, path, kind }) = &args.command {
        let descriptor = client::request_edit(server, path, kind).await?;
        tracing::info!("{} available at {}", descriptor.image, descriptor.path);
        return Ok(());
    }

    // --- Parse config (missing buckets abort here) ---
    let cfg = AppConfig::from_env_and_args(&args)?;
    tracing::info!("Starting photo-vault with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    let db_path = cfg
        .database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let connect = SqliteConnectOptions::from_str(&cfg.database_url)?.create_if_missing(true);
    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect)
            .await?,
    );
    let metadata = MetadataStore::new(db);
    metadata.migrate().await?;

    // --- Handle migration mode ---
    if args.migrate {
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    // --- Local working set ---
    let layout = PublicLayout::new(&cfg.public_dir);
    layout.ensure_dirs().await?;

    // --- Remote store ---
    let remote: Arc<dyn RemoteStore> = match &cfg.remote {
        RemoteConfig::Disk(dir) => {
            let store = DiskBucketStore::new(dir);
            for category in PathCategory::ALL {
                store.ensure_bucket(cfg.buckets.bucket(category)).await?;
            }
            tracing::info!("Using directory-backed remote store at {}", dir.display());
            Arc::new(store)
        }
        RemoteConfig::Http(url) => {
            tracing::info!("Using HTTP remote store at {}", url);
            Arc::new(HttpBucketStore::new(url.clone()))
        }
    };

    // --- Initialize core services ---
    let ledger = Arc::new(KeyLedger::open(&cfg.keyring_path, metadata.clone()).await?);
    let ctx = ServiceContext::new(
        metadata,
        ledger,
        remote,
        cfg.buckets.clone(),
        layout,
        cfg.scripts_dir.clone(),
        cfg.edit_log.clone(),
    );

    // --- Rebuild keys + files before serving ---
    if args.skip_rehydrate {
        tracing::warn!("Skipping startup rehydration");
    } else {
        let report = ctx.rehydrator().rehydrate().await?;
        tracing::info!(
            "Rehydrated {} files ({} failed, {} keys)",
            report.restored,
            report.failed,
            report.keys
        );
    }

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(ctx);

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

use crate::services::bucket_router::BucketMapping;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{env, path::PathBuf};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub public_dir: PathBuf,
    pub keyring_path: PathBuf,
    pub scripts_dir: PathBuf,
    pub edit_log: PathBuf,
    pub remote: RemoteConfig,
    pub buckets: BucketMapping,
}

/// Which remote store backs the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteConfig {
    /// Directory-backed store, one sub-directory per bucket.
    Disk(PathBuf),
    /// S3-compatible HTTP object store.
    Http(String),
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Encrypted photo archive service")]
pub struct Args {
    /// Host to bind to (overrides PHOTO_VAULT_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides PHOTO_VAULT_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides PHOTO_VAULT_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Public working directory (overrides PHOTO_VAULT_PUBLIC_DIR)
    #[arg(long)]
    pub public_dir: Option<PathBuf>,

    /// Local key-ring file (overrides PHOTO_VAULT_KEYRING)
    #[arg(long)]
    pub keyring: Option<PathBuf>,

    /// Directory holding the transform scripts (overrides PHOTO_VAULT_SCRIPTS_DIR)
    #[arg(long)]
    pub scripts_dir: Option<PathBuf>,

    /// Append-only log for transform output (overrides PHOTO_VAULT_EDIT_LOG)
    #[arg(long)]
    pub edit_log: Option<PathBuf>,

    /// Base URL of an S3-compatible remote store (overrides PHOTO_VAULT_REMOTE_URL)
    #[arg(long, conflicts_with = "remote_dir")]
    pub remote_url: Option<String>,

    /// Directory-backed remote store (overrides PHOTO_VAULT_REMOTE_DIR)
    #[arg(long)]
    pub remote_dir: Option<PathBuf>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,

    /// Skip restoring files from the remote store at startup
    #[arg(long)]
    pub skip_rehydrate: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Request a derivative edit from a running server and poll until it is ready
    Edit {
        /// Server base URL
        #[arg(long, default_value = "http://127.0.0.1:8081")]
        server: String,

        /// Source image path relative to the public directory
        #[arg(long)]
        path: String,

        /// Transform kind (basic, paint, paint_v2, draw, draw_v2, sepia)
        #[arg(long, default_value = "basic")]
        kind: String,
    },
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.into())
}

impl AppConfig {
    /// Merge parsed CLI args with the environment.
    ///
    /// Fails fast when any of the six bucket identifiers is missing.
    pub fn from_env_and_args(args: &Args) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = env_or("PHOTO_VAULT_HOST", "0.0.0.0");
        let env_port = match env::var("PHOTO_VAULT_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing PHOTO_VAULT_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 8081,
            Err(err) => return Err(err).context("reading PHOTO_VAULT_PORT"),
        };
        let env_db = env_or(
            "PHOTO_VAULT_DATABASE_URL",
            "sqlite://./data/meta/photo_vault.db",
        );

        let remote = match (&args.remote_url, &args.remote_dir) {
            (Some(url), _) => RemoteConfig::Http(url.clone()),
            (None, Some(dir)) => RemoteConfig::Disk(dir.clone()),
            (None, None) => match env::var("PHOTO_VAULT_REMOTE_URL") {
                Ok(url) if !url.trim().is_empty() => RemoteConfig::Http(url),
                _ => RemoteConfig::Disk(env_or("PHOTO_VAULT_REMOTE_DIR", "./data/remote").into()),
            },
        };

        let buckets = BucketMapping::from_lookup(|category| env::var(category.env_var()).ok())
            .context("loading bucket configuration")?;

        // --- Merge ---
        Ok(Self {
            host: args.host.clone().unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            database_url: args.database_url.clone().unwrap_or(env_db),
            public_dir: args
                .public_dir
                .clone()
                .unwrap_or_else(|| env_or("PHOTO_VAULT_PUBLIC_DIR", "./public").into()),
            keyring_path: args
                .keyring
                .clone()
                .unwrap_or_else(|| env_or("PHOTO_VAULT_KEYRING", "./key.ring").into()),
            scripts_dir: args
                .scripts_dir
                .clone()
                .unwrap_or_else(|| env_or("PHOTO_VAULT_SCRIPTS_DIR", "./bin").into()),
            edit_log: args
                .edit_log
                .clone()
                .unwrap_or_else(|| env_or("PHOTO_VAULT_EDIT_LOG", "./edit-image.log").into()),
            remote,
            buckets,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edit_subcommand_parses() {
        let args = Args::parse_from([
            "photo-vault",
            "edit",
            "--path",
            "uploads/orig/a.jpg",
            "--kind",
            "paint",
        ]);
        match args.command {
            Some(Command::Edit { server, path, kind }) => {
                assert_eq!(server, "http://127.0.0.1:8081");
                assert_eq!(path, "uploads/orig/a.jpg");
                assert_eq!(kind, "paint");
            }
            None => panic!("expected edit subcommand"),
        }
    }

    #[test]
    fn remote_url_conflicts_with_remote_dir() {
        let result = Args::try_parse_from([
            "photo-vault",
            "--remote-url",
            "http://store",
            "--remote-dir",
            "/tmp/x",
        ]);
        assert!(result.is_err());
    }
}

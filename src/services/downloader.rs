//! EncryptedDownloader: restore one remote object to a local plaintext file.
//!
//! The ciphertext is decrypted chunk by chunk as it arrives and written
//! straight to the target. If the stream fails part-way, the target is
//! removed so no truncated plaintext is left behind. Nothing is retried.
//!
//! The restored bytes are not checked against any digest: a stream that ends
//! cleanly is taken as a complete restore.

use crate::services::{
    cipher,
    key_ledger::KeyLedger,
    remote::{RemoteError, RemoteStore},
};
use std::{
    io::{self, ErrorKind},
    path::Path,
    sync::Arc,
};
use thiserror::Error;
use tokio::{fs, fs::File};
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("no key recorded for object `{0}`")]
    MissingKey(String),
    #[error("opening object `{id}` in bucket `{bucket}`: {source}")]
    Open {
        bucket: String,
        id: String,
        source: RemoteError,
    },
    #[error("creating {path}: {source}")]
    Create { path: String, source: io::Error },
    #[error("streaming object `{id}` into {path}: {source}")]
    Stream {
        id: String,
        path: String,
        source: io::Error,
    },
}

pub type DownloadResult<T> = Result<T, DownloadError>;

#[derive(Clone)]
pub struct EncryptedDownloader {
    remote: Arc<dyn RemoteStore>,
    ledger: Arc<KeyLedger>,
    exclude: Vec<String>,
}

impl EncryptedDownloader {
    pub fn new(remote: Arc<dyn RemoteStore>, ledger: Arc<KeyLedger>) -> Self {
        Self {
            remote,
            ledger,
            exclude: Vec::new(),
        }
    }

    /// Shards the store should skip when serving reads.
    pub fn with_excluded_shards(mut self, exclude: Vec<String>) -> Self {
        self.exclude = exclude;
        self
    }

    /// Decrypt `object_id` from `bucket` into `target`, returning plaintext bytes written.
    pub async fn download(&self, object_id: &str, bucket: &str, target: &Path) -> DownloadResult<u64> {
        let Some(secret) = self.ledger.get(object_id) else {
            warn!("missing key for object {}; skipping {}", object_id, target.display());
            return Err(DownloadError::MissingKey(object_id.to_string()));
        };

        let stream = self
            .remote
            .open_download(bucket, object_id, &self.exclude)
            .await
            .map_err(|source| {
                warn!("createFileStream error for {}/{}: {}", bucket, object_id, source);
                DownloadError::Open {
                    bucket: bucket.to_string(),
                    id: object_id.to_string(),
                    source,
                }
            })?;

        let create_err = |source: io::Error| DownloadError::Create {
            path: target.display().to_string(),
            source,
        };
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(create_err)?;
        }
        let mut file = File::create(target).await.map_err(create_err)?;

        let result = match cipher::decrypt_stream(&secret, stream, &mut file).await {
            Ok(written) => file.sync_all().await.map(|_| written),
            Err(err) => Err(err),
        };
        drop(file);

        match result {
            Ok(written) => {
                debug!("restored {} ({} bytes)", target.display(), written);
                Ok(written)
            }
            Err(source) => {
                warn!(
                    "download of {}/{} failed: {}; removing {}",
                    bucket,
                    object_id,
                    source,
                    target.display()
                );
                match fs::remove_file(target).await {
                    Ok(()) => {}
                    Err(err) if err.kind() == ErrorKind::NotFound => {}
                    Err(err) => warn!("could not remove partial {}: {}", target.display(), err),
                }
                Err(DownloadError::Stream {
                    id: object_id.to_string(),
                    path: target.display().to_string(),
                    source,
                })
            }
        }
    }
}

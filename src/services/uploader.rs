//! EncryptedUploader: encrypt a local file and push it to a remote bucket.
//!
//! Order of operations per file:
//! 1. fresh secret
//! 2. stream-encrypt into `<path>.crypt`
//! 3. single-use push token for the bucket
//! 4. push the ciphertext, receive the object id
//! 5. ciphertext temp file removed
//! 6. `(object id -> secret)` made durable in the ledger
//!
//! The plaintext source is never touched. A failed token request or push
//! leaves no ledger entry behind.

use crate::{
    models::image::RemotePath,
    services::{
        bucket_router::PathCategory,
        cipher::{self, Secret},
        key_ledger::{KeyLedger, LedgerError},
        remote::{RemoteError, RemoteStore},
    },
};
use std::{
    ffi::OsString,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("encrypting {path}: {source}")]
    Encrypt { path: String, source: io::Error },
    #[error("requesting push token for bucket `{bucket}`: {source}")]
    Token { bucket: String, source: RemoteError },
    #[error("pushing {path} to bucket `{bucket}`: {source}")]
    Push {
        path: String,
        bucket: String,
        source: RemoteError,
    },
    #[error("recording key for object `{object_id}`: {source}")]
    Ledger {
        object_id: String,
        source: LedgerError,
    },
}

pub type UploadResult<T> = Result<T, UploadError>;

/// One successfully archived file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub category: Option<PathCategory>,
    pub local_path: PathBuf,
    pub bucket: String,
    pub object_id: String,
    pub filename: String,
    /// Ciphertext size as reported by the store.
    pub size: u64,
}

impl RemoteObject {
    pub fn remote_path(&self) -> RemotePath {
        RemotePath {
            path: self.local_path.to_string_lossy().into_owned(),
            bucket: self.bucket.clone(),
            id: self.object_id.clone(),
        }
    }
}

/// `<path>.crypt`, next to the plaintext.
pub fn ciphertext_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".crypt");
    PathBuf::from(name)
}

#[derive(Clone)]
pub struct EncryptedUploader {
    remote: Arc<dyn RemoteStore>,
    ledger: Arc<KeyLedger>,
}

impl EncryptedUploader {
    pub fn new(remote: Arc<dyn RemoteStore>, ledger: Arc<KeyLedger>) -> Self {
        Self { remote, ledger }
    }

    pub async fn upload(&self, local_path: &Path, bucket: &str) -> UploadResult<RemoteObject> {
        let secret = Secret::generate();
        let tmp_path = ciphertext_path(local_path);

        if let Err(source) = cipher::encrypt_file(&secret, local_path, &tmp_path).await {
            warn!("encrypt failed for {}: {}", local_path.display(), source);
            discard_ciphertext(&tmp_path).await;
            return Err(UploadError::Encrypt {
                path: local_path.display().to_string(),
                source,
            });
        }

        let token = match self.remote.create_push_token(bucket).await {
            Ok(token) => token,
            Err(source) => {
                warn!("createToken error for bucket {}: {}", bucket, source);
                discard_ciphertext(&tmp_path).await;
                return Err(UploadError::Token {
                    bucket: bucket.to_string(),
                    source,
                });
            }
        };

        let stored = match self.remote.store_file(bucket, &token, &tmp_path).await {
            Ok(stored) => stored,
            Err(source) => {
                warn!("store error for {} in bucket {}: {}", tmp_path.display(), bucket, source);
                discard_ciphertext(&tmp_path).await;
                return Err(UploadError::Push {
                    path: tmp_path.display().to_string(),
                    bucket: bucket.to_string(),
                    source,
                });
            }
        };

        discard_ciphertext(&tmp_path).await;

        if let Err(source) = self.ledger.set(&stored.id, secret).await {
            warn!("key for object {} not recorded: {}", stored.id, source);
            return Err(UploadError::Ledger {
                object_id: stored.id,
                source,
            });
        }

        info!(
            "archived {} as {}/{} ({} bytes)",
            local_path.display(),
            bucket,
            stored.id,
            stored.size
        );

        Ok(RemoteObject {
            category: PathCategory::classify(local_path),
            local_path: local_path.to_path_buf(),
            bucket: bucket.to_string(),
            object_id: stored.id,
            filename: local_path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or(stored.filename),
            size: stored.size,
        })
    }
}

/// Remove a ciphertext temp file; failures are logged and otherwise ignored.
async fn discard_ciphertext(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => warn!("tmp file delete error for {}: {}", path.display(), err),
    }
}

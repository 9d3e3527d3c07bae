//! Remote object store seam.
//!
//! The archive only needs three operations from a bucketed store: mint a
//! single-use push token, push a file under that token, and open a streaming
//! read of an object. Everything else about the store stays behind this trait.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::{io, path::Path};
use thiserror::Error;

pub mod disk;
pub mod http;

pub use disk::DiskBucketStore;
pub use http::HttpBucketStore;

/// Raw (still encrypted) object bytes as they arrive from the store.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("object `{id}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, id: String },
    #[error("push token rejected for bucket `{0}`")]
    InvalidToken(String),
    #[error("invalid identifier `{0}`")]
    InvalidIdentifier(String),
    #[error("remote store returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// A single-use, bucket-scoped write grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushToken {
    pub token: String,
    pub bucket: String,
}

/// What the store reports back after a successful push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    /// Remote object identifier.
    pub id: String,
    pub filename: String,
    pub size: u64,
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn create_push_token(&self, bucket: &str) -> RemoteResult<PushToken>;

    /// Push `path` into `bucket`, consuming `token`.
    async fn store_file(
        &self,
        bucket: &str,
        token: &PushToken,
        path: &Path,
    ) -> RemoteResult<StoredFile>;

    /// Open a streaming read of an object, skipping the listed shards.
    async fn open_download(
        &self,
        bucket: &str,
        id: &str,
        exclude: &[String],
    ) -> RemoteResult<ByteStream>;
}

/// Reject identifiers that could escape a bucket directory or URL segment.
pub(crate) fn ensure_identifier_safe(value: &str) -> RemoteResult<()> {
    let unsafe_char = value
        .bytes()
        .any(|b| b.is_ascii_control() || matches!(b, b'/' | b'\\' | b'?' | b'#' | b'%'));
    if value.is_empty() || value.len() > 255 || value.contains("..") || unsafe_char {
        return Err(RemoteError::InvalidIdentifier(value.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_cannot_traverse() {
        assert!(ensure_identifier_safe("3f2a9c").is_ok());
        assert!(ensure_identifier_safe("uploads-orig").is_ok());
        for bad in ["", "..", "a/b", "a\\b", "x?y", "a\0"] {
            assert!(ensure_identifier_safe(bad).is_err(), "{bad:?}");
        }
    }
}

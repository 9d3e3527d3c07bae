//! DiskBucketStore: a directory-backed remote store.
//!
//! Objects live beneath `base_path/{bucket}/{shard}/{shard}/{id}`, sharded by
//! MD5 so no single directory grows unbounded. Push tokens are held in memory
//! and consumed by the first push that presents them.

use super::{
    ByteStream, PushToken, RemoteError, RemoteResult, RemoteStore, StoredFile,
    ensure_identifier_safe,
};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::fs::{self, File};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

pub struct DiskBucketStore {
    /// Base directory holding one sub-directory per bucket.
    base_path: PathBuf,

    /// Outstanding push tokens -> the bucket they were issued for.
    tokens: DashMap<String, String>,
}

impl DiskBucketStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            tokens: DashMap::new(),
        }
    }

    /// Create the bucket directory if it does not exist yet.
    pub async fn ensure_bucket(&self, bucket: &str) -> RemoteResult<()> {
        ensure_identifier_safe(bucket)?;
        fs::create_dir_all(self.bucket_root(bucket)).await?;
        Ok(())
    }

    fn bucket_root(&self, bucket: &str) -> PathBuf {
        self.base_path.join(bucket)
    }

    /// Two-level shard identifiers: first two bytes of MD5(bucket/id) as hex.
    fn object_shards(bucket: &str, id: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket, id));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, bucket: &str, id: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket, id);
        let mut path = self.bucket_root(bucket);
        path.push(shard_a);
        path.push(shard_b);
        path.push(id);
        path
    }

    async fn ensure_bucket_exists(&self, bucket: &str) -> RemoteResult<()> {
        ensure_identifier_safe(bucket)?;
        match fs::metadata(self.bucket_root(bucket)).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(RemoteError::BucketNotFound(bucket.to_string())),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(RemoteError::BucketNotFound(bucket.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl RemoteStore for DiskBucketStore {
    async fn create_push_token(&self, bucket: &str) -> RemoteResult<PushToken> {
        self.ensure_bucket_exists(bucket).await?;
        let token = Uuid::new_v4().simple().to_string();
        self.tokens.insert(token.clone(), bucket.to_string());
        Ok(PushToken {
            token,
            bucket: bucket.to_string(),
        })
    }

    async fn store_file(
        &self,
        bucket: &str,
        token: &PushToken,
        path: &Path,
    ) -> RemoteResult<StoredFile> {
        match self.tokens.remove(&token.token) {
            Some((_, issued_for)) if issued_for == bucket => {}
            _ => return Err(RemoteError::InvalidToken(bucket.to_string())),
        }

        let id = Uuid::new_v4().simple().to_string();
        let file_path = self.object_path(bucket, &id);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            RemoteError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let copy = async {
            let mut source = File::open(path).await?;
            let mut dest = File::create(&tmp_path).await?;
            let size = tokio::io::copy(&mut source, &mut dest).await?;
            dest.sync_all().await?;
            fs::rename(&tmp_path, &file_path).await?;
            Ok::<u64, io::Error>(size)
        }
        .await;

        let size = match copy {
            Ok(size) => size,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(RemoteError::Io(err));
            }
        };

        debug!("stored {} as {}/{}", path.display(), bucket, id);
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(StoredFile { id, filename, size })
    }

    async fn open_download(
        &self,
        bucket: &str,
        id: &str,
        _exclude: &[String],
    ) -> RemoteResult<ByteStream> {
        ensure_identifier_safe(bucket)?;
        ensure_identifier_safe(id)?;
        let file = File::open(self.object_path(bucket, id))
            .await
            .map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    RemoteError::ObjectNotFound {
                        bucket: bucket.to_string(),
                        id: id.to_string(),
                    }
                } else {
                    RemoteError::Io(err)
                }
            })?;
        Ok(ReaderStream::new(file).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskBucketStore::new(dir.path().join("remote"));
        store.ensure_bucket("uploads-orig").await.unwrap();

        let src = dir.path().join("blob.crypt");
        fs::write(&src, b"ciphertext").await.unwrap();

        let token = store.create_push_token("uploads-orig").await.unwrap();
        let stored = store.store_file("uploads-orig", &token, &src).await.unwrap();
        assert_eq!(stored.size, 10);
        assert_eq!(stored.filename, "blob.crypt");

        let mut stream = store
            .open_download("uploads-orig", &stored.id, &[])
            .await
            .unwrap();
        let mut body = Vec::new();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(body, b"ciphertext");
    }

    #[tokio::test]
    async fn tokens_are_single_use_and_bucket_scoped() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskBucketStore::new(dir.path());
        store.ensure_bucket("a-bucket").await.unwrap();
        store.ensure_bucket("b-bucket").await.unwrap();
        let src = dir.path().join("x");
        fs::write(&src, b"x").await.unwrap();

        let token = store.create_push_token("a-bucket").await.unwrap();
        assert!(matches!(
            store.store_file("b-bucket", &token, &src).await,
            Err(RemoteError::InvalidToken(_))
        ));

        let token = store.create_push_token("a-bucket").await.unwrap();
        store.store_file("a-bucket", &token, &src).await.unwrap();
        assert!(matches!(
            store.store_file("a-bucket", &token, &src).await,
            Err(RemoteError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn unknown_bucket_refuses_token() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskBucketStore::new(dir.path());
        assert!(matches!(
            store.create_push_token("missing").await,
            Err(RemoteError::BucketNotFound(_))
        ));
    }
}

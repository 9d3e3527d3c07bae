//! HttpBucketStore: talks to an S3-compatible object store over HTTP.
//!
//! - `GET /{bucket}?max-keys=1` validates the bucket before a token is minted
//! - `PUT /{bucket}/{key}` streams the ciphertext up
//! - `GET /{bucket}/{key}` streams it back down
//!
//! S3-style stores have no push tokens, so the token is a fresh object key
//! reserved for exactly one push into the validated bucket.

use super::{
    ByteStream, PushToken, RemoteError, RemoteResult, RemoteStore, StoredFile,
    ensure_identifier_safe,
};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Body, Client, Response, StatusCode, header};
use std::{io, path::Path};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

#[derive(Clone)]
pub struct HttpBucketStore {
    client: Client,
    base_url: String,
}

impl HttpBucketStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn bucket_url(&self, bucket: &str) -> String {
        format!("{}/{}", self.base_url, bucket)
    }

    fn object_url(&self, bucket: &str, id: &str) -> String {
        format!("{}/{}/{}", self.base_url, bucket, id)
    }
}

/// Map a non-success response onto a `RemoteError`.
async fn check_status(response: Response, bucket: &str, id: Option<&str>) -> RemoteResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(match id {
            Some(id) => RemoteError::ObjectNotFound {
                bucket: bucket.to_string(),
                id: id.to_string(),
            },
            None => RemoteError::BucketNotFound(bucket.to_string()),
        });
    }
    let message = response.text().await.unwrap_or_default();
    Err(RemoteError::Status {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl RemoteStore for HttpBucketStore {
    async fn create_push_token(&self, bucket: &str) -> RemoteResult<PushToken> {
        ensure_identifier_safe(bucket)?;
        let response = self
            .client
            .get(self.bucket_url(bucket))
            .query(&[("max-keys", "1")])
            .send()
            .await?;
        check_status(response, bucket, None).await?;

        Ok(PushToken {
            token: Uuid::new_v4().simple().to_string(),
            bucket: bucket.to_string(),
        })
    }

    async fn store_file(
        &self,
        bucket: &str,
        token: &PushToken,
        path: &Path,
    ) -> RemoteResult<StoredFile> {
        if token.bucket != bucket {
            return Err(RemoteError::InvalidToken(bucket.to_string()));
        }
        ensure_identifier_safe(&token.token)?;

        let file = File::open(path).await?;
        let size = file.metadata().await?.len();
        let body = Body::wrap_stream(ReaderStream::new(file));

        let response = self
            .client
            .put(self.object_url(bucket, &token.token))
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header(header::CONTENT_LENGTH, size)
            .body(body)
            .send()
            .await?;
        check_status(response, bucket, None).await?;

        debug!("pushed {} to {}", path.display(), self.object_url(bucket, &token.token));
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(StoredFile {
            id: token.token.clone(),
            filename,
            size,
        })
    }

    async fn open_download(
        &self,
        bucket: &str,
        id: &str,
        exclude: &[String],
    ) -> RemoteResult<ByteStream> {
        ensure_identifier_safe(bucket)?;
        ensure_identifier_safe(id)?;

        let mut request = self.client.get(self.object_url(bucket, id));
        if !exclude.is_empty() {
            request = request.query(&[("exclude", exclude.join(","))]);
        }
        let response = check_status(request.send().await?, bucket, Some(id)).await?;

        Ok(response
            .bytes_stream()
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))
            .boxed())
    }
}

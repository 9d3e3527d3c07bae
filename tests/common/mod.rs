#![allow(dead_code)]

use photo_vault::services::{
    bucket_router::{BucketMapping, PathCategory},
    context::ServiceContext,
    key_ledger::KeyLedger,
    layout::PublicLayout,
    metadata_store::MetadataStore,
    remote::{DiskBucketStore, RemoteStore},
};
use sqlx::sqlite::SqlitePoolOptions;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tempfile::TempDir;

pub struct Harness {
    pub dir: TempDir,
    pub layout: PublicLayout,
    pub metadata: MetadataStore,
    pub ledger: Arc<KeyLedger>,
    pub remote: Arc<DiskBucketStore>,
    pub buckets: BucketMapping,
}

/// `UPLOADS_ORIG`, `EDITS_THUMBS`, ...
pub fn buckets() -> BucketMapping {
    BucketMapping::from_lookup(|c| {
        Some(c.env_var().trim_start_matches("PHOTO_VAULT_").to_string())
    })
    .unwrap()
}

pub async fn memory_metadata() -> MetadataStore {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = MetadataStore::new(Arc::new(pool));
    store.migrate().await.unwrap();
    store
}

impl Harness {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let layout = PublicLayout::new(dir.path().join("public"));
        layout.ensure_dirs().await.unwrap();

        let buckets = buckets();
        let remote = Arc::new(DiskBucketStore::new(dir.path().join("remote")));
        for category in PathCategory::ALL {
            remote.ensure_bucket(buckets.bucket(category)).await.unwrap();
        }

        let metadata = memory_metadata().await;
        let ledger = Arc::new(
            KeyLedger::open(dir.path().join("key.ring"), metadata.clone())
                .await
                .unwrap(),
        );

        Self {
            dir,
            layout,
            metadata,
            ledger,
            remote,
            buckets,
        }
    }

    pub fn keyring_path(&self) -> PathBuf {
        self.dir.path().join("key.ring")
    }

    pub fn scripts_dir(&self) -> PathBuf {
        self.dir.path().join("bin")
    }

    pub fn context(&self) -> ServiceContext {
        let remote: Arc<dyn RemoteStore> = self.remote.clone();
        ServiceContext::new(
            self.metadata.clone(),
            self.ledger.clone(),
            remote,
            self.buckets.clone(),
            self.layout.clone(),
            self.scripts_dir(),
            self.dir.path().join("edit-image.log"),
        )
    }

    /// Write `bytes` under the public root and return the full path.
    pub async fn write_public(&self, relative: &str, bytes: &[u8]) -> PathBuf {
        let path = self.layout.root().join(relative);
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, bytes).await.unwrap();
        path
    }
}

/// Deterministic, non-repeating-looking test content.
pub fn photo_bytes(seed: u8, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u32).wrapping_mul(2_654_435_761).rotate_left(seed as u32 % 31) as u8 ^ seed)
        .collect()
}

#[cfg(unix)]
pub async fn write_script(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;

    tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
    tokio::fs::write(path, format!("#!/bin/sh\nset -e\n{body}\n"))
        .await
        .unwrap();
    let mut perms = tokio::fs::metadata(path).await.unwrap().permissions();
    perms.set_mode(0o755);
    tokio::fs::set_permissions(path, perms).await.unwrap();
}

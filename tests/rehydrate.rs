mod common;

use common::{Harness, photo_bytes};
use photo_vault::{
    models::image::{Collection, ImageMeta, ImageRecord, RemotePath},
    services::{key_ledger::KeyLedger, uploader::EncryptedUploader},
};
use std::{path::PathBuf, sync::Arc};

async fn archive_one(
    h: &Harness,
    uploader: &EncryptedUploader,
    relative: &str,
    collection: Collection,
    seed: u8,
) -> (PathBuf, Vec<u8>) {
    let bytes = photo_bytes(seed, 4_096 + seed as usize * 311);
    let path = h.write_public(relative, &bytes).await;
    let (_, bucket) = h.buckets.route(&path).unwrap();
    let object = uploader.upload(&path, bucket).await.unwrap();

    let meta = ImageMeta {
        image: object.filename.clone(),
        size: Some(bytes.len() as i64),
        timestamp: "10-19-2026 12:00:00".into(),
        ..Default::default()
    };
    h.metadata
        .insert(collection, &ImageRecord::new(meta, object.remote_path()))
        .await
        .unwrap();
    (path, bytes)
}

#[tokio::test]
async fn wiped_host_comes_back_from_the_archive() {
    let h = Harness::new().await;
    let uploader = EncryptedUploader::new(h.remote.clone(), h.ledger.clone());

    let mut expected = Vec::new();
    for i in 0..5u8 {
        let relative = format!("uploads/orig/photo{i}.jpg");
        expected.push(archive_one(&h, &uploader, &relative, Collection::Images, i + 1).await);
    }
    for i in 0..5u8 {
        let relative = format!("edits/orig/pedit-photo{i}.jpg");
        expected.push(archive_one(&h, &uploader, &relative, Collection::Edits, i + 11).await);
    }

    for (path, _) in &expected {
        tokio::fs::remove_file(path).await.unwrap();
    }
    tokio::fs::remove_file(h.keyring_path()).await.unwrap();

    let ledger = Arc::new(
        KeyLedger::open(h.keyring_path(), h.metadata.clone())
            .await
            .unwrap(),
    );

    let mut ctx = h.context();
    ctx.ledger = ledger.clone();
    let report = ctx.rehydrator().rehydrate().await.unwrap();

    assert_eq!(report.keys, 10);
    assert_eq!(report.restored, 10);
    assert_eq!(report.failed, 0);
    assert_eq!(ledger.len(), 10);
    assert!(h.keyring_path().exists());
    for (path, bytes) in &expected {
        assert_eq!(&tokio::fs::read(path).await.unwrap(), bytes, "{}", path.display());
    }
}

#[tokio::test]
async fn record_without_key_is_skipped() {
    let h = Harness::new().await;
    let uploader = EncryptedUploader::new(h.remote.clone(), h.ledger.clone());
    let (good, bytes) =
        archive_one(&h, &uploader, "uploads/orig/keep.jpg", Collection::Images, 5).await;

    let orphan = h.layout.root().join("uploads/orig/orphan.jpg");
    let record = ImageRecord::new(
        ImageMeta {
            image: "orphan.jpg".into(),
            timestamp: "10-19-2026 12:00:00".into(),
            ..Default::default()
        },
        RemotePath {
            path: orphan.display().to_string(),
            bucket: "UPLOADS_ORIG".into(),
            id: "no-such-key".into(),
        },
    );
    h.metadata.insert(Collection::Images, &record).await.unwrap();

    tokio::fs::remove_file(&good).await.unwrap();
    let report = h.context().rehydrator().rehydrate().await.unwrap();

    assert_eq!(report.restored, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(tokio::fs::read(&good).await.unwrap(), bytes);
    assert!(!orphan.exists());
}

#[tokio::test]
async fn rehydrate_twice_overwrites_local_edits() {
    let h = Harness::new().await;
    let ctx = h.context();
    let uploader = ctx.uploader();
    let (path, bytes) =
        archive_one(&h, &uploader, "edits/orig/dedit-cove.jpg", Collection::Edits, 21).await;

    tokio::fs::write(&path, b"locally modified").await.unwrap();
    let first = ctx.rehydrator().rehydrate().await.unwrap();
    assert_eq!(first.restored, 1);
    assert_eq!(tokio::fs::read(&path).await.unwrap(), bytes);

    tokio::fs::write(&path, b"modified again").await.unwrap();
    let second = ctx.rehydrator().rehydrate().await.unwrap();
    assert_eq!(second.restored, 1);
    assert_eq!(second.failed, 0);
    assert_eq!(tokio::fs::read(&path).await.unwrap(), bytes);
}

#[tokio::test]
async fn corrupt_keyring_file_does_not_block_rehydration() {
    let h = Harness::new().await;
    let uploader = h.context().uploader();
    let (path, bytes) =
        archive_one(&h, &uploader, "uploads/orig/reef.jpg", Collection::Images, 17).await;

    tokio::fs::remove_file(&path).await.unwrap();
    tokio::fs::write(h.keyring_path(), br#"{"entr"#).await.unwrap();

    let ledger = Arc::new(
        KeyLedger::open(h.keyring_path(), h.metadata.clone())
            .await
            .unwrap(),
    );

    let mut ctx = h.context();
    ctx.ledger = ledger.clone();
    let report = ctx.rehydrator().rehydrate().await.unwrap();

    assert_eq!(report.keys, 1);
    assert_eq!(report.restored, 1);
    assert_eq!(tokio::fs::read(&path).await.unwrap(), bytes);

    let rewritten: serde_json::Value =
        serde_json::from_slice(&tokio::fs::read(h.keyring_path()).await.unwrap()).unwrap();
    assert_eq!(rewritten["entries"].as_object().unwrap().len(), 1);
}

#[tokio::test]
async fn empty_archive_rehydrates_nothing() {
    let h = Harness::new().await;
    let report = h
        .context()
        .rehydrator()
        .with_concurrency(1)
        .rehydrate()
        .await
        .unwrap();

    assert_eq!(report.keys, 0);
    assert_eq!(report.restored, 0);
    assert_eq!(report.failed, 0);
}

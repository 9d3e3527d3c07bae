//! KeyLedger: remote object id -> per-object secret.
//!
//! Three copies of the ledger exist:
//! - an in-memory `DashMap`, so uploads of different objects never contend on
//!   a single lock,
//! - a local key-ring file (JSON, base64 key material) read by downloads,
//! - one durable SQLite row holding the same bytes plus a revision.
//!
//! Keys are only ever added. A snapshot taken after revision `n` was assigned
//! therefore contains every entry of every snapshot with a lower revision, so
//! persisting "highest revision wins" never loses a key.

use crate::services::{
    cipher::{IV_LEN, KEY_LEN, Secret},
    metadata_store::{KeyringBlob, MetadataError, MetadataStore},
};
use base64::{Engine as _, engine::general_purpose};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::atomic::{AtomicI64, Ordering},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
    sync::Mutex,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Fixed identifier of the durable key-ring record.
pub const KEYRING_RECORD: &str = "keyring";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("key-ring entry `{id}` is malformed: {reason}")]
    MalformedEntry { id: String, reason: String },
    #[error("key-ring document is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Serialize, Deserialize, Default)]
struct KeyringDocument {
    entries: BTreeMap<String, EntryDocument>,
}

#[derive(Serialize, Deserialize)]
struct EntryDocument {
    key: String,
    iv: String,
}

pub struct KeyLedger {
    path: PathBuf,
    entries: DashMap<String, Secret>,
    revision: AtomicI64,
    /// Revision currently on disk; serializes local file rewrites only.
    flushed: Mutex<i64>,
    store: MetadataStore,
}

impl KeyLedger {
    /// Open the ledger from the local key-ring file merged with the durable
    /// record.
    ///
    /// A missing or unreadable local file is not an error: its keys are
    /// recovered from the durable record, and rehydration rewrites the file.
    /// Merging also keeps a later `set` from persisting a snapshot that lacks
    /// durable keys.
    pub async fn open(path: impl Into<PathBuf>, store: MetadataStore) -> LedgerResult<Self> {
        let path = path.into();
        let durable = store.load_keyring(KEYRING_RECORD).await?;
        let revision = durable.as_ref().map(|blob| blob.revision).unwrap_or(0);

        let entries = match fs::read(&path).await {
            Ok(bytes) => decode(&bytes).unwrap_or_else(|err| {
                warn!("ignoring unreadable key-ring {}: {}", path.display(), err);
                DashMap::new()
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no local key-ring at {}", path.display());
                DashMap::new()
            }
            Err(err) => return Err(err.into()),
        };

        if let Some(blob) = durable {
            let local = entries.len();
            for (id, secret) in decode(&blob.data)? {
                entries.entry(id).or_insert(secret);
            }
            if entries.len() > local {
                info!(
                    "recovered {} keys from durable key-ring revision {}",
                    entries.len() - local,
                    blob.revision
                );
            }
        }

        Ok(Self {
            path,
            entries,
            revision: AtomicI64::new(revision),
            flushed: Mutex::new(revision),
            store,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, object_id: &str) -> Option<Secret> {
        self.entries.get(object_id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, object_id: &str) -> bool {
        self.entries.contains_key(object_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record the secret for a pushed object and make it durable.
    ///
    /// Returns only once the durable row and the local file both include it.
    pub async fn set(&self, object_id: &str, secret: Secret) -> LedgerResult<()> {
        self.entries.insert(object_id.to_string(), secret);
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        let blob = KeyringBlob {
            revision,
            data: self.encode()?,
        };

        if !self.store.save_keyring(KEYRING_RECORD, &blob).await? {
            debug!("key-ring revision {} superseded in durable store", revision);
        }

        let mut flushed = self.flushed.lock().await;
        if blob.revision > *flushed {
            write_atomically(&self.path, &blob.data).await?;
            *flushed = blob.revision;
        }
        Ok(())
    }

    /// Overwrite the local key-ring file with the durable record and reload.
    ///
    /// Leaves the ledger untouched when no durable record exists yet. Returns
    /// the number of entries afterwards.
    pub async fn restore_from_durable(&self) -> LedgerResult<usize> {
        let Some(blob) = self.store.load_keyring(KEYRING_RECORD).await? else {
            info!("no durable key-ring record; keeping {} local entries", self.len());
            return Ok(self.len());
        };

        let restored = decode(&blob.data)?;

        let mut flushed = self.flushed.lock().await;
        write_atomically(&self.path, &blob.data).await?;
        *flushed = blob.revision;
        self.revision.fetch_max(blob.revision, Ordering::SeqCst);

        self.entries.clear();
        for (id, secret) in restored {
            self.entries.insert(id, secret);
        }

        info!(
            "restored key-ring revision {} ({} entries) to {}",
            blob.revision,
            self.entries.len(),
            self.path.display()
        );
        Ok(self.entries.len())
    }

    fn encode(&self) -> LedgerResult<Vec<u8>> {
        let entries = self
            .entries
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    EntryDocument {
                        key: general_purpose::STANDARD.encode(entry.value().key()),
                        iv: general_purpose::STANDARD.encode(entry.value().iv()),
                    },
                )
            })
            .collect();
        Ok(serde_json::to_vec(&KeyringDocument { entries })?)
    }
}

fn decode(bytes: &[u8]) -> LedgerResult<DashMap<String, Secret>> {
    let doc: KeyringDocument = serde_json::from_slice(bytes)?;
    let entries = DashMap::with_capacity(doc.entries.len());
    for (id, entry) in doc.entries {
        let key = decode_fixed::<KEY_LEN>(&id, "key", &entry.key)?;
        let iv = decode_fixed::<IV_LEN>(&id, "iv", &entry.iv)?;
        entries.insert(id, Secret::from_parts(key, iv));
    }
    Ok(entries)
}

fn decode_fixed<const N: usize>(id: &str, field: &str, value: &str) -> LedgerResult<[u8; N]> {
    let malformed = |reason: String| LedgerError::MalformedEntry {
        id: id.to_string(),
        reason,
    };
    let bytes = general_purpose::STANDARD
        .decode(value)
        .map_err(|err| malformed(format!("{field}: {err}")))?;
    bytes
        .try_into()
        .map_err(|bytes: Vec<u8>| malformed(format!("{field} has {} bytes, expected {N}", bytes.len())))
}

/// Replace `path` with `data` via a sibling temp file + rename.
async fn write_atomically(path: &Path, data: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).await?;

    let tmp_path = parent.join(format!(".keyring-{}", Uuid::new_v4()));
    let result = async {
        let mut file = File::create(&tmp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        fs::rename(&tmp_path, path).await
    }
    .await;

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path).await;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::metadata_store::tests::memory_store;

    #[tokio::test]
    async fn set_persists_locally_and_durably() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.ring");
        let store = memory_store().await;

        let ledger = KeyLedger::open(&path, store.clone()).await.unwrap();
        let secret = Secret::generate();
        ledger.set("obj-123", secret.clone()).await.unwrap();

        assert_eq!(ledger.get("obj-123"), Some(secret.clone()));
        assert_eq!(store.load_keyring(KEYRING_RECORD).await.unwrap().unwrap().revision, 1);

        let reopened = KeyLedger::open(&path, store).await.unwrap();
        assert_eq!(reopened.get("obj-123"), Some(secret));
    }

    #[tokio::test]
    async fn restore_overwrites_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.ring");
        let store = memory_store().await;

        let writer = KeyLedger::open(&path, store.clone()).await.unwrap();
        writer.set("a", Secret::generate()).await.unwrap();
        writer.set("b", Secret::generate()).await.unwrap();

        // Simulate volume loss followed by a stale file showing up.
        fs::write(&path, br#"{"entries":{}}"#).await.unwrap();
        let ledger = KeyLedger::open(&path, store).await.unwrap();
        assert_eq!(ledger.len(), 2);

        assert_eq!(ledger.restore_from_durable().await.unwrap(), 2);
        assert_eq!(decode(&fs::read(&path).await.unwrap()).unwrap().len(), 2);
        assert_eq!(ledger.get("a"), writer.get("a"));
        assert_eq!(ledger.get("b"), writer.get("b"));

        // The next write continues from the durable revision.
        ledger.set("c", Secret::generate()).await.unwrap();
        let reopened = KeyLedger::open(&path, ledger.store.clone()).await.unwrap();
        assert_eq!(reopened.len(), 3);
    }

    #[tokio::test]
    async fn concurrent_sets_keep_every_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.ring");
        let store = memory_store().await;
        let ledger = std::sync::Arc::new(KeyLedger::open(&path, store.clone()).await.unwrap());

        let tasks = (0..8).map(|i| {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.set(&format!("obj-{i}"), Secret::generate()).await })
        });
        for task in futures::future::join_all(tasks).await {
            task.unwrap().unwrap();
        }

        let fresh = KeyLedger::open(dir.path().join("other.ring"), store).await.unwrap();
        assert_eq!(fresh.restore_from_durable().await.unwrap(), 8);
        let local = KeyLedger::open(&path, fresh.store.clone()).await.unwrap();
        assert_eq!(local.len(), 8);
    }

    #[tokio::test]
    async fn corrupt_local_file_is_repaired_from_durable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.ring");
        let store = memory_store().await;

        let writer = KeyLedger::open(&path, store.clone()).await.unwrap();
        let secret = Secret::generate();
        writer.set("obj-1", secret.clone()).await.unwrap();

        fs::write(&path, br#"{"entr"#).await.unwrap();
        let ledger = KeyLedger::open(&path, store.clone()).await.unwrap();
        assert_eq!(ledger.get("obj-1"), Some(secret.clone()));

        assert_eq!(ledger.restore_from_durable().await.unwrap(), 1);
        let on_disk = decode(&fs::read(&path).await.unwrap()).unwrap();
        assert_eq!(on_disk.get("obj-1").map(|e| e.value().clone()), Some(secret));
    }

    #[tokio::test]
    async fn set_after_lost_file_keeps_durable_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.ring");
        let store = memory_store().await;

        let writer = KeyLedger::open(&path, store.clone()).await.unwrap();
        writer.set("old", Secret::generate()).await.unwrap();
        fs::remove_file(&path).await.unwrap();

        let ledger = KeyLedger::open(&path, store.clone()).await.unwrap();
        ledger.set("new", Secret::generate()).await.unwrap();

        let blob = store.load_keyring(KEYRING_RECORD).await.unwrap().unwrap();
        let durable = decode(&blob.data).unwrap();
        assert!(durable.contains_key("old"));
        assert!(durable.contains_key("new"));
        assert_eq!(blob.revision, 2);
    }

    #[test]
    fn rejects_short_key_material() {
        let doc = br#"{"entries":{"x":{"key":"AAAA","iv":"AAAAAAAAAAAAAAAA"}}}"#;
        assert!(matches!(
            decode(doc),
            Err(LedgerError::MalformedEntry { .. })
        ));
    }
}

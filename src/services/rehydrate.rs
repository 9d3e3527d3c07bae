//! StartupRehydrator: rebuild the local working set from the remote store.
//!
//! Runs once before the server accepts requests:
//! 1. the durable key-ring record overwrites the local key-ring file,
//! 2. every record of both collections is downloaded back to its local path.
//!
//! Step 1 always completes before any decrypt starts. Per-record failures are
//! logged by the downloader and counted; they never stop the batch. Running it
//! again simply re-downloads and overwrites.

use crate::{
    models::image::Collection,
    services::{
        downloader::EncryptedDownloader,
        key_ledger::{KeyLedger, LedgerError},
        metadata_store::{MetadataError, MetadataStore},
    },
};
use futures::{StreamExt, stream};
use std::{path::Path, sync::Arc};
use thiserror::Error;
use tracing::info;

/// Downloads in flight at once.
pub const DEFAULT_CONCURRENCY: usize = 6;

#[derive(Debug, Error)]
pub enum RehydrateError {
    #[error("restoring key-ring: {0}")]
    Ledger(#[from] LedgerError),
    #[error("listing archived records: {0}")]
    Metadata(#[from] MetadataError),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RehydrateReport {
    pub keys: usize,
    pub restored: usize,
    pub failed: usize,
}

pub struct StartupRehydrator {
    ledger: Arc<KeyLedger>,
    downloader: EncryptedDownloader,
    metadata: MetadataStore,
    concurrency: usize,
}

impl StartupRehydrator {
    pub fn new(ledger: Arc<KeyLedger>, downloader: EncryptedDownloader, metadata: MetadataStore) -> Self {
        Self {
            ledger,
            downloader,
            metadata,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub async fn rehydrate(&self) -> Result<RehydrateReport, RehydrateError> {
        let keys = self.ledger.restore_from_durable().await?;

        let mut records = Vec::new();
        for collection in Collection::ALL {
            records.extend(self.metadata.list(collection).await?);
        }
        info!("rehydrating {} archived files ({} keys)", records.len(), keys);

        let results: Vec<bool> = stream::iter(records)
            .map(|record| async move {
                self.downloader
                    .download(&record.path.id, &record.path.bucket, Path::new(&record.path.path))
                    .await
                    .is_ok()
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let restored = results.iter().filter(|ok| **ok).count();
        let report = RehydrateReport {
            keys,
            restored,
            failed: results.len() - restored,
        };
        info!(
            "rehydration finished: {} restored, {} failed",
            report.restored, report.failed
        );
        Ok(report)
    }
}

//! ServiceContext: every shared handle, constructed once and passed down.

use crate::services::{
    archive::{ArchivePipeline, THUMB_OVLY_SCRIPT},
    bucket_router::BucketMapping,
    derivative::DerivativeJobRunner,
    downloader::EncryptedDownloader,
    key_ledger::KeyLedger,
    layout::PublicLayout,
    metadata_store::MetadataStore,
    rehydrate::StartupRehydrator,
    remote::RemoteStore,
    uploader::EncryptedUploader,
};
use std::{path::PathBuf, sync::Arc};

#[derive(Clone)]
pub struct ServiceContext {
    pub metadata: MetadataStore,
    pub ledger: Arc<KeyLedger>,
    pub remote: Arc<dyn RemoteStore>,
    pub buckets: Arc<BucketMapping>,
    pub layout: PublicLayout,
    pub pipeline: ArchivePipeline,
    pub jobs: DerivativeJobRunner,
}

impl ServiceContext {
    pub fn new(
        metadata: MetadataStore,
        ledger: Arc<KeyLedger>,
        remote: Arc<dyn RemoteStore>,
        buckets: BucketMapping,
        layout: PublicLayout,
        scripts_dir: PathBuf,
        edit_log: PathBuf,
    ) -> Self {
        let buckets = Arc::new(buckets);
        let uploader = EncryptedUploader::new(remote.clone(), ledger.clone());
        let pipeline = ArchivePipeline::new(
            uploader,
            metadata.clone(),
            buckets.clone(),
            scripts_dir.join(THUMB_OVLY_SCRIPT),
        );
        let jobs = DerivativeJobRunner::new(layout.clone(), scripts_dir, edit_log);

        Self {
            metadata,
            ledger,
            remote,
            buckets,
            layout,
            pipeline,
            jobs,
        }
    }

    pub fn uploader(&self) -> EncryptedUploader {
        EncryptedUploader::new(self.remote.clone(), self.ledger.clone())
    }

    pub fn downloader(&self) -> EncryptedDownloader {
        EncryptedDownloader::new(self.remote.clone(), self.ledger.clone())
    }

    pub fn rehydrator(&self) -> StartupRehydrator {
        StartupRehydrator::new(self.ledger.clone(), self.downloader(), self.metadata.clone())
    }
}

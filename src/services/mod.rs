//! Archival services: routing, encryption, the remote store seam, the key
//! ledger, derivative jobs and the pipelines built from them.

pub mod archive;
pub mod bucket_router;
pub mod cipher;
pub mod context;
pub mod derivative;
pub mod downloader;
pub mod key_ledger;
pub mod layout;
pub mod metadata_store;
pub mod poller;
pub mod rehydrate;
pub mod remote;
pub mod uploader;

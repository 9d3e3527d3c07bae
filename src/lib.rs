//! photo-vault: archive photos and their derivatives to an encrypted
//! bucketed remote store, and rebuild the local working set from it.

pub mod client;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;

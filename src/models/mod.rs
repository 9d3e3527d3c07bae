//! Core data models for the photo archive.
//!
//! Image records map to the two SQLite collections via `sqlx::FromRow` and
//! serialize as JSON via `serde`. Edit models carry the derivative-edit and
//! completion-poll wire contracts.

pub mod edit;
pub mod image;

//! Represents an archived image variant and the metadata it was archived with.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// The two record collections an archived image can land in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    /// Plain uploads (`uploads/*`).
    Images,
    /// Edited derivatives (`edits/*`).
    Edits,
}

impl Collection {
    pub const ALL: [Collection; 2] = [Collection::Images, Collection::Edits];

    /// Backing table name.
    pub fn table(self) -> &'static str {
        match self {
            Collection::Images => "image_list",
            Collection::Edits => "edit_list",
        }
    }
}

/// Where an archived variant lives: locally and in the remote store.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct RemotePath {
    /// Local path the plaintext was archived from (and is restored to).
    #[sqlx(rename = "local_path")]
    pub path: String,

    /// Remote bucket identifier.
    pub bucket: String,

    /// Remote object identifier returned by the store.
    #[sqlx(rename = "remote_id")]
    pub id: String,
}

/// Metadata captured when an image enters the pipeline, before any upload.
///
/// Overlay and thumbnail variants are plain copies with `image` swapped.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ImageMeta {
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    /// Originating path of an edited derivative.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orig: Option<String>,
    /// Transform kind of an edited derivative.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checked: Option<String>,
}

impl ImageMeta {
    /// Copy of this metadata describing a different file.
    pub fn with_image(&self, image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..self.clone()
        }
    }
}

/// A durable record of one successfully archived variant.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ImageRecord {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// File name of the variant.
    pub image: String,

    /// Local and remote location.
    #[sqlx(flatten)]
    pub path: RemotePath,

    #[sqlx(rename = "size_bytes")]
    pub size: Option<i64>,
    pub mimetype: Option<String>,
    pub timestamp: String,
    #[sqlx(rename = "description")]
    pub desc: Option<String>,
    pub orig: Option<String>,
    pub checked: Option<String>,

    /// When the record was inserted.
    pub created_at: DateTime<Utc>,
}

impl ImageRecord {
    pub fn new(meta: ImageMeta, path: RemotePath) -> Self {
        Self {
            id: Uuid::new_v4(),
            image: meta.image,
            path,
            size: meta.size,
            mimetype: meta.mimetype,
            timestamp: meta.timestamp,
            desc: meta.desc,
            orig: meta.orig,
            checked: meta.checked,
            created_at: Utc::now(),
        }
    }
}

/// Format used for every user-facing timestamp.
pub const TIMESTAMP_FORMAT: &str = "%m-%d-%Y %H:%M:%S";

/// Current local time in [`TIMESTAMP_FORMAT`].
pub fn timestamp_now() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_copy_only_swaps_image() {
        let base = ImageMeta {
            image: "photo.jpg".into(),
            size: Some(42),
            mimetype: Some("image/jpeg".into()),
            timestamp: "01-02-2026 03:04:05".into(),
            desc: Some("beach".into()),
            ..Default::default()
        };
        let thumb = base.with_image("photo.jpg-thumb.jpg");

        assert_eq!(thumb.image, "photo.jpg-thumb.jpg");
        assert_eq!(thumb.size, base.size);
        assert_eq!(thumb.desc, base.desc);
        assert_eq!(base.image, "photo.jpg");
    }

    #[test]
    fn record_serializes_nested_path() {
        let record = ImageRecord::new(
            ImageMeta {
                image: "photo1.jpg".into(),
                timestamp: "t".into(),
                ..Default::default()
            },
            RemotePath {
                path: "public/uploads/orig/photo1.jpg".into(),
                bucket: "UPLOADS_ORIG".into(),
                id: "obj-123".into(),
            },
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["path"]["id"], "obj-123");
        assert_eq!(json["path"]["bucket"], "UPLOADS_ORIG");
    }
}

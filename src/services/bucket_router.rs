//! Maps local archive paths onto remote buckets.
//!
//! The mapping is static deployment configuration: six categories, one bucket
//! each. Classification looks for fixed path-segment markers in priority order.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// One of the six (namespace x variant) partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PathCategory {
    UploadOrig,
    UploadOverlay,
    UploadThumbnail,
    EditOrig,
    EditOverlay,
    EditThumbnail,
}

impl PathCategory {
    /// Priority order used by [`PathCategory::classify`].
    pub const ALL: [PathCategory; 6] = [
        PathCategory::UploadOrig,
        PathCategory::UploadOverlay,
        PathCategory::UploadThumbnail,
        PathCategory::EditOrig,
        PathCategory::EditOverlay,
        PathCategory::EditThumbnail,
    ];

    /// Path-segment marker identifying this category.
    pub fn marker(self) -> &'static str {
        match self {
            PathCategory::UploadOrig => "uploads/orig",
            PathCategory::UploadOverlay => "uploads/ovly",
            PathCategory::UploadThumbnail => "uploads/thumbs",
            PathCategory::EditOrig => "edits/orig",
            PathCategory::EditOverlay => "edits/ovly",
            PathCategory::EditThumbnail => "edits/thumbs",
        }
    }

    /// Environment variable that names this category's bucket.
    pub fn env_var(self) -> &'static str {
        match self {
            PathCategory::UploadOrig => "PHOTO_VAULT_UPLOADS_ORIG",
            PathCategory::UploadOverlay => "PHOTO_VAULT_UPLOADS_OVLY",
            PathCategory::UploadThumbnail => "PHOTO_VAULT_UPLOADS_THUMBS",
            PathCategory::EditOrig => "PHOTO_VAULT_EDITS_ORIG",
            PathCategory::EditOverlay => "PHOTO_VAULT_EDITS_OVLY",
            PathCategory::EditThumbnail => "PHOTO_VAULT_EDITS_THUMBS",
        }
    }

    /// First category whose marker occurs in `path`.
    pub fn classify(path: &Path) -> Option<PathCategory> {
        let path = path.to_string_lossy();
        Self::ALL
            .into_iter()
            .find(|category| path.contains(category.marker()))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("path `{0}` does not match any bucket category")]
    UnroutablePath(String),
    #[error("no bucket configured for {category:?} (set {env_var})")]
    MissingBucket {
        category: PathCategory,
        env_var: &'static str,
    },
}

pub type RouteResult<T> = Result<T, RouteError>;

/// Total mapping from [`PathCategory`] to bucket identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketMapping {
    pub uploads_orig: String,
    pub uploads_ovly: String,
    pub uploads_thumbs: String,
    pub edits_orig: String,
    pub edits_ovly: String,
    pub edits_thumbs: String,
}

impl BucketMapping {
    /// Build a mapping from a lookup function, failing on the first category
    /// without a non-empty bucket id.
    pub fn from_lookup<F>(mut lookup: F) -> RouteResult<Self>
    where
        F: FnMut(PathCategory) -> Option<String>,
    {
        let mut resolve = |category: PathCategory| {
            lookup(category)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .ok_or(RouteError::MissingBucket {
                    category,
                    env_var: category.env_var(),
                })
        };

        Ok(Self {
            uploads_orig: resolve(PathCategory::UploadOrig)?,
            uploads_ovly: resolve(PathCategory::UploadOverlay)?,
            uploads_thumbs: resolve(PathCategory::UploadThumbnail)?,
            edits_orig: resolve(PathCategory::EditOrig)?,
            edits_ovly: resolve(PathCategory::EditOverlay)?,
            edits_thumbs: resolve(PathCategory::EditThumbnail)?,
        })
    }

    pub fn bucket(&self, category: PathCategory) -> &str {
        match category {
            PathCategory::UploadOrig => &self.uploads_orig,
            PathCategory::UploadOverlay => &self.uploads_ovly,
            PathCategory::UploadThumbnail => &self.uploads_thumbs,
            PathCategory::EditOrig => &self.edits_orig,
            PathCategory::EditOverlay => &self.edits_ovly,
            PathCategory::EditThumbnail => &self.edits_thumbs,
        }
    }

    /// Resolve the bucket for a local path.
    ///
    /// `UnroutablePath` is a configuration defect and must not be retried.
    pub fn route(&self, path: &Path) -> RouteResult<(PathCategory, &str)> {
        let category = PathCategory::classify(path)
            .ok_or_else(|| RouteError::UnroutablePath(path.display().to_string()))?;
        Ok((category, self.bucket(category)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping() -> BucketMapping {
        BucketMapping::from_lookup(|c| Some(c.env_var().trim_start_matches("PHOTO_VAULT_").into()))
            .unwrap()
    }

    #[test]
    fn routes_each_marker_to_its_bucket() {
        let buckets = mapping();
        let cases = [
            ("public/uploads/orig/photo1.jpg", "UPLOADS_ORIG"),
            ("public/uploads/ovly/photo1.jpg-ovly.jpg", "UPLOADS_OVLY"),
            ("public/uploads/thumbs/photo1.jpg-thumb.jpg", "UPLOADS_THUMBS"),
            ("public/edits/orig/pedit-photo1.jpg", "EDITS_ORIG"),
            ("public/edits/ovly/pedit-photo1.jpg-ovly.jpg", "EDITS_OVLY"),
            ("/srv/app/public/edits/thumbs/x.png-thumb.jpg", "EDITS_THUMBS"),
        ];
        for (path, expected) in cases {
            let (_, bucket) = buckets.route(Path::new(path)).unwrap();
            assert_eq!(bucket, expected, "{path}");
        }
    }

    #[test]
    fn unmarked_path_is_unroutable() {
        let err = mapping().route(Path::new("public/downloads/photo1.jpg")).unwrap_err();
        assert!(matches!(err, RouteError::UnroutablePath(_)));
    }

    #[test]
    fn first_marker_in_priority_order_wins() {
        let path = Path::new("edits/orig/uploads/thumbs/x.jpg");
        assert_eq!(
            PathCategory::classify(path),
            Some(PathCategory::UploadThumbnail)
        );
    }

    #[test]
    fn missing_bucket_fails_construction() {
        let err = BucketMapping::from_lookup(|c| match c {
            PathCategory::EditOverlay => Some("  ".into()),
            other => Some(format!("{other:?}")),
        })
        .unwrap_err();
        assert_eq!(
            err,
            RouteError::MissingBucket {
                category: PathCategory::EditOverlay,
                env_var: "PHOTO_VAULT_EDITS_OVLY",
            }
        );
    }
}

//! ArchivePipeline: derive overlay/thumbnail variants and archive all three.
//!
//! Runs the external thumbnail/overlay generator to completion, then uploads
//! the original, overlay and thumbnail concurrently. Each variant is routed,
//! encrypted, pushed and recorded on its own; one failing never holds back or
//! rolls back the others. Failures end here as log lines.

use crate::{
    models::image::{Collection, ImageMeta, ImageRecord},
    services::{
        bucket_router::{BucketMapping, RouteError},
        metadata_store::{MetadataError, MetadataStore},
        uploader::{EncryptedUploader, UploadError},
    },
};
use futures::future::join_all;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{process::Command, task::JoinHandle};
use tracing::{debug, error, info, warn};

/// Generator executable name inside the scripts directory.
pub const THUMB_OVLY_SCRIPT: &str = "thumb-ovly.sh";

const SOURCE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error("recording archived variant: {0}")]
    Metadata(#[from] MetadataError),
}

/// One file to archive and the metadata it is recorded with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub path: PathBuf,
    pub meta: ImageMeta,
}

#[derive(Debug, Default)]
pub struct ArchiveOutcome {
    pub archived: Vec<ImageRecord>,
    pub failed: usize,
}

/// Overlay and thumbnail file names for a source image.
///
/// `photo.png` -> (`photo.png-ovly.jpg`, `photo.png-thumb.jpg`); `None` for
/// anything that is not jpg/jpeg/png.
pub fn derived_names(filename: &str) -> Option<(String, String)> {
    let ext = Path::new(filename).extension()?.to_str()?.to_ascii_lowercase();
    if !SOURCE_EXTENSIONS.contains(&ext.as_str()) {
        return None;
    }
    Some((format!("{filename}-ovly.jpg"), format!("{filename}-thumb.jpg")))
}

/// The original plus whichever derived variants can be located.
pub fn plan_variants(source: &Path, filename: &str, meta: &ImageMeta) -> Vec<Variant> {
    let mut variants = vec![Variant {
        path: source.to_path_buf(),
        meta: meta.clone(),
    }];

    let Some((ovly_name, thumb_name)) = derived_names(filename) else {
        warn!("no overlay/thumbnail naming rule for {}", filename);
        return variants;
    };
    let Some(namespace) = source
        .parent()
        .filter(|dir| dir.file_name().is_some_and(|name| name == "orig"))
        .and_then(Path::parent)
    else {
        warn!("{} is not inside an orig directory; skipping variants", source.display());
        return variants;
    };

    variants.push(Variant {
        path: namespace.join("ovly").join(&ovly_name),
        meta: meta.with_image(ovly_name),
    });
    variants.push(Variant {
        path: namespace.join("thumbs").join(&thumb_name),
        meta: meta.with_image(thumb_name),
    });
    variants
}

#[derive(Clone)]
pub struct ArchivePipeline {
    uploader: EncryptedUploader,
    metadata: MetadataStore,
    buckets: Arc<BucketMapping>,
    generator: PathBuf,
}

impl ArchivePipeline {
    pub fn new(
        uploader: EncryptedUploader,
        metadata: MetadataStore,
        buckets: Arc<BucketMapping>,
        generator: impl Into<PathBuf>,
    ) -> Self {
        Self {
            uploader,
            metadata,
            buckets,
            generator: generator.into(),
        }
    }

    /// Fire-and-forget [`ArchivePipeline::archive`] on the runtime.
    pub fn spawn(
        &self,
        source: PathBuf,
        filename: String,
        collection: Collection,
        meta: ImageMeta,
    ) -> JoinHandle<ArchiveOutcome> {
        let pipeline = self.clone();
        tokio::spawn(async move { pipeline.archive(&source, &filename, collection, meta).await })
    }

    pub async fn archive(
        &self,
        source: &Path,
        filename: &str,
        collection: Collection,
        meta: ImageMeta,
    ) -> ArchiveOutcome {
        self.generate_derivatives(source).await;

        let variants = plan_variants(source, filename, &meta);
        let results = join_all(
            variants
                .into_iter()
                .map(|variant| self.archive_variant(collection, variant)),
        )
        .await;

        let mut outcome = ArchiveOutcome::default();
        for result in results {
            match result {
                Ok(record) => outcome.archived.push(record),
                Err(_) => outcome.failed += 1,
            }
        }
        info!(
            "archive of {}: {} archived, {} failed",
            source.display(),
            outcome.archived.len(),
            outcome.failed
        );
        outcome
    }

    /// Run the generator and wait for it. A failure is only logged; the
    /// uploads go ahead and fail individually if the files are missing.
    async fn generate_derivatives(&self, source: &Path) {
        match Command::new(&self.generator).arg(source).output().await {
            Ok(output) if output.status.success() => {
                debug!("finished make thumb-ovly for {}", source.display());
            }
            Ok(output) => warn!(
                "thumb-ovly exited with {} for {}: {}",
                output.status,
                source.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            ),
            Err(err) => warn!(
                "thumb-ovly could not run ({}) for {}: {}",
                self.generator.display(),
                source.display(),
                err
            ),
        }
    }

    async fn archive_variant(
        &self,
        collection: Collection,
        variant: Variant,
    ) -> Result<ImageRecord, ArchiveError> {
        let result = async {
            let (category, bucket) = self.buckets.route(&variant.path)?;
            debug!("routing {} via {:?} to {}", variant.path.display(), category, bucket);
            let object = self.uploader.upload(&variant.path, bucket).await?;
            let record = ImageRecord::new(variant.meta.clone(), object.remote_path());
            self.metadata.insert(collection, &record).await?;
            Ok::<_, ArchiveError>(record)
        }
        .await;

        if let Err(err) = &result {
            match err {
                ArchiveError::Route(_) => {
                    error!("bucket routing failed for {}: {}", variant.path.display(), err)
                }
                _ => warn!("archive failed for {}: {}", variant.path.display(), err),
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(image: &str) -> ImageMeta {
        ImageMeta {
            image: image.into(),
            timestamp: "ts".into(),
            ..Default::default()
        }
    }

    #[test]
    fn derived_names_normalize_to_jpg() {
        assert_eq!(
            derived_names("photo.jpg"),
            Some(("photo.jpg-ovly.jpg".into(), "photo.jpg-thumb.jpg".into()))
        );
        assert_eq!(
            derived_names("photo.jpeg"),
            Some(("photo.jpeg-ovly.jpg".into(), "photo.jpeg-thumb.jpg".into()))
        );
        assert_eq!(
            derived_names("photo.PNG"),
            Some(("photo.PNG-ovly.jpg".into(), "photo.PNG-thumb.jpg".into()))
        );
        assert_eq!(derived_names("photo.gif"), None);
        assert_eq!(derived_names("photo"), None);
    }

    #[test]
    fn variants_land_in_sibling_directories() {
        let variants = plan_variants(
            Path::new("public/edits/orig/pedit-a.jpg"),
            "pedit-a.jpg",
            &meta("pedit-a.jpg"),
        );
        let paths: Vec<_> = variants.iter().map(|v| v.path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("public/edits/orig/pedit-a.jpg"),
                PathBuf::from("public/edits/ovly/pedit-a.jpg-ovly.jpg"),
                PathBuf::from("public/edits/thumbs/pedit-a.jpg-thumb.jpg"),
            ]
        );
        assert_eq!(variants[1].meta.image, "pedit-a.jpg-ovly.jpg");
        assert_eq!(variants[2].meta.image, "pedit-a.jpg-thumb.jpg");
    }

    #[test]
    fn unknown_extension_keeps_only_original() {
        let variants = plan_variants(
            Path::new("public/uploads/orig/a.tiff"),
            "a.tiff",
            &meta("a.tiff"),
        );
        assert_eq!(variants.len(), 1);
    }
}

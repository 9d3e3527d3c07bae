//! PublicLayout: the on-disk working set under the public directory.
//!
//! ```text
//! public/
//!   uploads/{orig,ovly,thumbs}/
//!   edits/{orig,ovly,thumbs}/
//! ```

use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::fs;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("path `{0}` is not allowed")]
    Rejected(String),
    #[error("path `{0}` is outside the public directory")]
    OutsidePublic(String),
}

#[derive(Debug, Clone)]
pub struct PublicLayout {
    root: PathBuf,
}

impl PublicLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn uploads_orig(&self) -> PathBuf {
        self.root.join("uploads").join("orig")
    }

    pub fn edits_orig(&self) -> PathBuf {
        self.root.join("edits").join("orig")
    }

    /// Create all six variant directories.
    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        for namespace in ["uploads", "edits"] {
            for variant in ["orig", "ovly", "thumbs"] {
                fs::create_dir_all(self.root.join(namespace).join(variant)).await?;
            }
        }
        Ok(())
    }

    /// Join a client-supplied relative path onto the public root.
    ///
    /// Rejects absolute paths and any `..` component.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, PathError> {
        let relative = relative.trim_start_matches("public/");
        ensure_plain_relative(relative)?;
        Ok(self.root.join(relative))
    }

    /// Accept a client-echoed path only if it points inside the public root.
    pub fn contain(&self, path: &str) -> Result<PathBuf, PathError> {
        ensure_plain_relative(path).or_else(|_| {
            if Path::new(path).is_absolute() && !path.contains("..") {
                Ok(())
            } else {
                Err(PathError::Rejected(path.to_string()))
            }
        })?;
        let candidate = PathBuf::from(path);
        if candidate.starts_with(&self.root) {
            Ok(candidate)
        } else {
            Err(PathError::OutsidePublic(path.to_string()))
        }
    }
}

fn ensure_plain_relative(path: &str) -> Result<(), PathError> {
    let plain = !path.is_empty()
        && !path.contains('\0')
        && Path::new(path)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if plain {
        Ok(())
    } else {
        Err(PathError::Rejected(path.to_string()))
    }
}

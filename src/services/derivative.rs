//! DerivativeJobRunner: launch an external transform and forget about it.
//!
//! Launching and completing are unrelated events here: the runner hands back
//! the *prospective* output descriptor as soon as the process is spawned, and
//! the only completion signal is the output file appearing on disk (see
//! `poller`). The child's stdout/stderr are appended to a shared log file.

use crate::{
    models::{edit::EditDescriptor, image::timestamp_now},
    services::layout::{PathError, PublicLayout},
};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::{
    io,
    path::{Path, PathBuf},
    process::Stdio,
};
use thiserror::Error;
use tokio::{fs::OpenOptions, process::Command};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    Basic,
    Paint,
    PaintV2,
    Draw,
    DrawV2,
    Sepia,
}

impl TransformKind {
    pub const ALL: [TransformKind; 6] = [
        TransformKind::Basic,
        TransformKind::Paint,
        TransformKind::PaintV2,
        TransformKind::Draw,
        TransformKind::DrawV2,
        TransformKind::Sepia,
    ];

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransformKind::Basic => "basic",
            TransformKind::Paint => "paint",
            TransformKind::PaintV2 => "paint_v2",
            TransformKind::Draw => "draw",
            TransformKind::DrawV2 => "draw_v2",
            TransformKind::Sepia => "sepia",
        }
    }

    /// Prefix prepended to the source file name to form the output name.
    pub fn prefix(self) -> &'static str {
        match self {
            TransformKind::Basic => "edit-",
            TransformKind::Paint => "pedit-",
            TransformKind::PaintV2 => "p2edit-",
            TransformKind::Draw => "dedit-",
            TransformKind::DrawV2 => "d2edit-",
            TransformKind::Sepia => "sedit-",
        }
    }

    /// Executable name inside the scripts directory.
    pub fn script(self) -> &'static str {
        match self {
            TransformKind::Basic => "basic.sh",
            TransformKind::Paint => "paint.sh",
            TransformKind::PaintV2 => "paint_v2.sh",
            TransformKind::Draw => "draw.sh",
            TransformKind::DrawV2 => "draw_v2.sh",
            TransformKind::Sepia => "sepia.sh",
        }
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("source path `{0}` has no file name")]
    NoFileName(String),
    #[error("opening edit log {path}: {source}")]
    Log { path: String, source: io::Error },
    #[error("spawning {script}: {source}")]
    Spawn { script: String, source: io::Error },
}

pub type JobResult<T> = Result<T, JobError>;

/// A requested transform. Never persisted; completion is inferred from
/// `output` existing on disk.
#[derive(Debug, Clone)]
pub struct DerivativeJob {
    /// `None` when the requested kind is not one of [`TransformKind::ALL`].
    pub kind: Option<TransformKind>,
    pub input: PathBuf,
    pub output: PathBuf,
    pub started_at: DateTime<Local>,
    pub descriptor: EditDescriptor,
}

#[derive(Debug, Clone)]
pub struct DerivativeJobRunner {
    layout: PublicLayout,
    scripts_dir: PathBuf,
    log_path: PathBuf,
}

impl DerivativeJobRunner {
    pub fn new(layout: PublicLayout, scripts_dir: impl Into<PathBuf>, log_path: impl Into<PathBuf>) -> Self {
        Self {
            layout,
            scripts_dir: scripts_dir.into(),
            log_path: log_path.into(),
        }
    }

    /// Work out input/output paths for a request without launching anything.
    ///
    /// Unknown kinds keep the `basic` naming so the echoed descriptor has the
    /// same shape either way.
    pub fn plan(&self, checked: &str, relative: &str) -> JobResult<DerivativeJob> {
        let input = self.layout.resolve(relative)?;
        let source_name = input
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| JobError::NoFileName(relative.to_string()))?;

        let kind = TransformKind::parse(checked);
        let prefix = kind.unwrap_or(TransformKind::Basic).prefix();
        let image = format!("{prefix}{source_name}");
        let output = self.layout.edits_orig().join(&image);

        let started_at = Local::now();
        let descriptor = EditDescriptor {
            image,
            path: output.to_string_lossy().into_owned(),
            orig: input.to_string_lossy().into_owned(),
            checked: checked.to_string(),
            timestamp: timestamp_now(),
        };

        Ok(DerivativeJob {
            kind,
            input,
            output,
            started_at,
            descriptor,
        })
    }

    /// Launch the transform detached and return the prospective output.
    ///
    /// The exit status is never observed. An unknown kind issues no command.
    pub async fn run(&self, checked: &str, relative: &str) -> JobResult<DerivativeJob> {
        let job = self.plan(checked, relative)?;
        let Some(kind) = job.kind else {
            warn!(
                "unknown transform kind `{}` for {}; no command issued",
                checked,
                job.input.display()
            );
            return Ok(job);
        };

        let script = self.scripts_dir.join(kind.script());
        self.spawn_detached(&script, &job.input, &job.output).await?;
        info!(
            "exec command: {} {} {}",
            script.display(),
            job.input.display(),
            job.output.display()
        );
        Ok(job)
    }

    async fn spawn_detached(&self, script: &Path, input: &Path, output: &Path) -> JobResult<()> {
        let log_err = |source: io::Error| JobError::Log {
            path: self.log_path.display().to_string(),
            source,
        };
        let stdout = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await
            .map_err(log_err)?
            .into_std()
            .await;
        let stderr = stdout.try_clone().map_err(log_err)?;

        let mut command = Command::new(script);
        command
            .arg(input)
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));
        #[cfg(unix)]
        command.process_group(0);

        // Dropping the handle leaves the child running; tokio reaps it.
        command.spawn().map_err(|source| JobError::Spawn {
            script: script.display().to_string(),
            source,
        })?;
        Ok(())
    }
}

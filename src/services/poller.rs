//! CompletionPoller: observe a derivative job finishing.
//!
//! ```text
//!   Polling --(output absent; wait 30s)--> Polling
//!   Polling --(output present)-----------> Found   (terminal)
//! ```
//!
//! Each probe is independent and stateless on the far side, so a poller can be
//! dropped at any point without cleanup. How existence is checked lives behind
//! [`OutputProbe`], leaving room for retry or cancel policies later.

use crate::models::edit::{EditDescriptor, PollResponse};
use async_trait::async_trait;
use reqwest::Client;
use std::{io, path::Path, time::Duration};
use thiserror::Error;
use tokio::fs;
use tracing::info;

/// Fixed delay between probes while a job is still running.
pub const POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[async_trait]
pub trait OutputProbe: Send + Sync {
    /// Whether the job's output file exists yet.
    async fn output_exists(&self, job: &EditDescriptor) -> Result<bool, ProbeError>;
}

/// Checks the local filesystem directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileProbe;

#[async_trait]
impl OutputProbe for FileProbe {
    async fn output_exists(&self, job: &EditDescriptor) -> Result<bool, ProbeError> {
        Ok(output_file_exists(Path::new(&job.path)).await)
    }
}

/// Asks a running server's `GET /images/editpoll`.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
    base_url: String,
}

impl HttpProbe {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl OutputProbe for HttpProbe {
    async fn output_exists(&self, job: &EditDescriptor) -> Result<bool, ProbeError> {
        let response: PollResponse = self
            .client
            .get(format!("{}/images/editpoll", self.base_url))
            .query(job)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.found)
    }
}

/// True only for an existing regular file.
pub async fn output_file_exists(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Polling,
    Found,
}

impl PollState {
    /// Status line shown to whoever is waiting on `image`.
    pub fn status_line(self, image: &str) -> String {
        match self {
            PollState::Polling => format!("{image} still processing..."),
            PollState::Found => format!("{image} available"),
        }
    }
}

pub struct CompletionPoller<P> {
    probe: P,
    interval: Duration,
    state: PollState,
}

impl<P: OutputProbe> CompletionPoller<P> {
    pub fn new(probe: P) -> Self {
        Self::with_interval(probe, POLL_INTERVAL)
    }

    pub fn with_interval(probe: P, interval: Duration) -> Self {
        Self {
            probe,
            interval,
            state: PollState::Polling,
        }
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    /// Probe once. `Found` is terminal: later calls return it without probing.
    pub async fn check(&mut self, job: &EditDescriptor) -> Result<PollState, ProbeError> {
        if self.state == PollState::Found {
            return Ok(PollState::Found);
        }
        if self.probe.output_exists(job).await? {
            self.state = PollState::Found;
        }
        Ok(self.state)
    }

    /// Probe until the output exists, sleeping `interval` between probes.
    ///
    /// There is no deadline; callers that lose interest drop the future.
    pub async fn wait(&mut self, job: &EditDescriptor) -> Result<(), ProbeError> {
        loop {
            let state = self.check(job).await?;
            info!("{}", state.status_line(&job.image));
            if state == PollState::Found {
                return Ok(());
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}

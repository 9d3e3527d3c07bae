//! Wire contracts for derivative edits and completion polling.

use serde::{Deserialize, Serialize};

/// Body of `PUT /images/editimage`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditRequest {
    /// Path of the source image relative to the public directory.
    pub path: String,
    /// Requested transform kind (`basic`, `paint`, ...).
    pub checked: String,
}

/// The prospective output of a derivative job.
///
/// Returned synchronously by the edit endpoint before the transform has
/// finished, and echoed back by the client on every poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditDescriptor {
    /// Output file name.
    pub image: String,
    /// Output path the transform will write.
    pub path: String,
    /// Originating input path.
    pub orig: String,
    /// Transform kind as requested.
    pub checked: String,
    pub timestamp: String,
}

/// Body of the completion-poll response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollResponse {
    pub found: bool,
}

/// Body of `POST /images/downloadimage`.
#[derive(Debug, Clone, Deserialize)]
pub struct DownloadRequest {
    pub path: String,
}

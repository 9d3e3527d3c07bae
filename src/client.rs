//! Command-line client for the derivative-edit flow.

use crate::{
    models::edit::{EditDescriptor, EditRequest},
    services::{
        derivative::TransformKind,
        poller::{CompletionPoller, HttpProbe},
    },
};
use anyhow::{Context, Result, bail};
use reqwest::Client;
use tracing::info;

/// Ask `server` to run `kind` on `path`, then poll until the output exists.
pub async fn request_edit(server: &str, path: &str, kind: &str) -> Result<EditDescriptor> {
    if TransformKind::parse(kind).is_none() {
        bail!("unknown transform kind `{}`", kind);
    }
    let server = server.trim_end_matches('/');
    let client = Client::new();

    let descriptor: EditDescriptor = client
        .put(format!("{}/images/editimage", server))
        .json(&EditRequest {
            path: path.to_string(),
            checked: kind.to_string(),
        })
        .send()
        .await
        .context("sending edit request")?
        .error_for_status()?
        .json()
        .await
        .context("decoding edit response")?;
    info!("{} processing...", descriptor.image);

    let mut poller = CompletionPoller::new(HttpProbe::new(client, server));
    poller
        .wait(&descriptor)
        .await
        .with_context(|| format!("polling for {}", descriptor.image))?;
    Ok(descriptor)
}

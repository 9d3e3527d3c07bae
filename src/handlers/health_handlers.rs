//! Liveness and readiness probes.
//!
//! Readiness covers what an archive round needs locally: the metadata
//! database, a writable public tree, and a writable key-ring location.

use crate::services::context::ServiceContext;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::{collections::BTreeMap, path::Path};
use tokio::fs;
use uuid::Uuid;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    /// Secrets currently held by the in-memory ledger.
    keys: usize,
    checks: BTreeMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl CheckStatus {
    fn from_result(result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self { ok: true, error: None },
            Err(error) => Self {
                ok: false,
                error: Some(error),
            },
        }
    }
}

/// `GET /healthz`
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// `GET /readyz`: 200 when every check passes, 503 otherwise.
pub async fn readyz(State(ctx): State<ServiceContext>) -> impl IntoResponse {
    let metadata = match ctx.metadata.ping().await {
        Ok(1) => Ok(()),
        Ok(v) => Err(format!("unexpected result: {v}")),
        Err(e) => Err(format!("error: {e}")),
    };
    let public_dir = probe_dir(ctx.layout.root()).await;
    let keyring_dir = match ctx.ledger.path().parent() {
        Some(dir) if !dir.as_os_str().is_empty() => probe_dir(dir).await,
        _ => probe_dir(Path::new(".")).await,
    };

    let mut checks = BTreeMap::new();
    checks.insert("metadata", CheckStatus::from_result(metadata));
    checks.insert("public_dir", CheckStatus::from_result(public_dir));
    checks.insert("keyring_dir", CheckStatus::from_result(keyring_dir));

    let ready = checks.values().all(|check| check.ok);
    let body = ReadyResponse {
        status: if ready { "ok" } else { "error" },
        keys: ctx.ledger.len(),
        checks,
    };
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

/// Write, read back and remove a probe file in `dir`.
async fn probe_dir(dir: &Path) -> Result<(), String> {
    let probe = dir.join(format!(".readyz-{}", Uuid::new_v4()));
    fs::write(&probe, b"readyz")
        .await
        .map_err(|e| format!("could not write probe in {}: {e}", dir.display()))?;
    let read_back = fs::read(&probe).await;
    let removed = fs::remove_file(&probe).await;
    match (read_back, removed) {
        (Ok(bytes), Ok(())) if bytes == b"readyz" => Ok(()),
        (Ok(_), Err(e)) => Err(format!("could not remove probe: {e}")),
        (Ok(_), Ok(())) => Err("probe content mismatch".to_string()),
        (Err(e), _) => Err(format!("could not read probe: {e}")),
    }
}

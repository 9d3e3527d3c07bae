//! Route table.
//!
//! - `GET  /healthz`, `GET /readyz`
//! - `GET  /images/imagelist`  : plain upload records
//! - `GET  /images/editslist`  : edited derivative records
//! - `POST /images/upload`     : multipart photo upload
//! - `PUT  /images/editimage`  : launch a derivative transform
//! - `GET  /images/editpoll`   : has the transform output appeared yet?
//! - `POST /images/downloadimage`

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        image_handlers::{
            MAX_UPLOAD_BYTES, download_image, edit_image, edit_poll, edits_list, image_list,
            upload_image,
        },
    },
    services::context::ServiceContext,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post, put},
};

/// Multipart framing on top of the photo itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Build the router; handlers share a cloned [`ServiceContext`].
pub fn routes() -> Router<ServiceContext> {
    let images = Router::new()
        .route("/imagelist", get(image_list))
        .route("/editslist", get(edits_list))
        .route(
            "/upload",
            post(upload_image).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES + MULTIPART_OVERHEAD)),
        )
        .route("/editimage", put(edit_image))
        .route("/editpoll", get(edit_poll))
        .route("/downloadimage", post(download_image));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .nest("/images", images)
}

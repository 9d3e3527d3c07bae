//! HTTP handlers for image upload, derivative edits and completion polling.
//!
//! Every handler answers as soon as the local artifact exists (or, for edits,
//! as soon as the transform is launched). Remote archival runs afterwards on
//! its own task and never changes the response.

use crate::{
    errors::AppError,
    models::{
        edit::{DownloadRequest, EditDescriptor, EditRequest, PollResponse},
        image::{Collection, ImageMeta, ImageRecord, timestamp_now},
    },
    services::{context::ServiceContext, poller::output_file_exists},
};
use axum::{
    Json,
    body::Body,
    extract::{
        Multipart, Query, State,
        multipart::Field,
    },
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::Local;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};
use uuid::Uuid;

/// Multipart field carrying the photo.
pub const UPLOAD_FIELD: &str = "sdd-photo";

/// Largest accepted upload.
pub const MAX_UPLOAD_BYTES: usize = 4 * 1024 * 1024;

const ALLOWED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// `GET /images/imagelist`
pub async fn image_list(
    State(ctx): State<ServiceContext>,
) -> Result<Json<Vec<ImageRecord>>, AppError> {
    Ok(Json(ctx.metadata.list(Collection::Images).await?))
}

/// `GET /images/editslist`
pub async fn edits_list(
    State(ctx): State<ServiceContext>,
) -> Result<Json<Vec<ImageRecord>>, AppError> {
    Ok(Json(ctx.metadata.list(Collection::Edits).await?))
}

/// `POST /images/upload`: save one photo, then archive it in the background.
pub async fn upload_image(
    State(ctx): State<ServiceContext>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut saved: Option<(PathBuf, ImageMeta)> = None;
    let mut desc = None;

    while let Some(mut field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some(UPLOAD_FIELD) => {
                if saved.is_some() {
                    return Err(AppError::bad_request("only one file may be uploaded"));
                }
                let ext = field
                    .file_name()
                    .and_then(|name| Path::new(name).extension())
                    .and_then(|ext| ext.to_str())
                    .map(str::to_ascii_lowercase)
                    .filter(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
                    .ok_or_else(|| AppError::bad_request("only .jpg, .jpeg and .png are accepted"))?;
                let mimetype = field.content_type().map(str::to_string);

                let stamp = Local::now().format("%-m%-d%y%-H%-M%-S");
                let stem = format!("{UPLOAD_FIELD}-{stamp}");
                let (path, filename, size) =
                    save_field(&mut field, &ctx.layout.uploads_orig(), &stem, &ext).await?;

                saved = Some((
                    path,
                    ImageMeta {
                        image: filename,
                        size: Some(size as i64),
                        mimetype,
                        timestamp: timestamp_now(),
                        ..Default::default()
                    },
                ));
            }
            Some("desc") => desc = Some(field.text().await?),
            other => debug!("ignoring multipart field {:?}", other),
        }
    }

    let Some((path, mut meta)) = saved else {
        return Err(AppError::bad_request(format!("missing `{UPLOAD_FIELD}` file")));
    };
    meta.desc = desc;

    info!("saved upload {} ({:?} bytes)", path.display(), meta.size);
    ctx.pipeline
        .spawn(path, meta.image.clone(), Collection::Images, meta.clone());

    Ok((StatusCode::CREATED, Json(meta)))
}

/// Stream one multipart field into `dir` through a temp file, published under
/// the first free `<stem>[-N].<ext>` name.
async fn save_field(
    field: &mut Field<'_>,
    dir: &Path,
    stem: &str,
    ext: &str,
) -> Result<(PathBuf, String, usize), AppError> {
    fs::create_dir_all(dir).await?;
    let tmp_path = dir.join(format!(".tmp-{}", Uuid::new_v4()));

    let result = async {
        let mut file = File::create(&tmp_path).await?;
        let mut size = 0usize;
        while let Some(chunk) = field.chunk().await? {
            size += chunk.len();
            if size > MAX_UPLOAD_BYTES {
                return Err(AppError::new(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    format!("upload exceeds {MAX_UPLOAD_BYTES} bytes"),
                ));
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        let filename = publish_unique(&tmp_path, dir, stem, ext).await?;
        Ok::<_, AppError>((dir.join(&filename), filename, size))
    }
    .await;

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path).await;
    }
    result
}

/// Move `tmp_path` into `dir` without replacing an existing file.
///
/// The name is reserved with `create_new` first, so two uploads landing in
/// the same second never share a path.
async fn publish_unique(tmp_path: &Path, dir: &Path, stem: &str, ext: &str) -> io::Result<String> {
    for n in 0u32.. {
        let filename = match n {
            0 => format!("{stem}.{ext}"),
            n => format!("{stem}-{n}.{ext}"),
        };
        let target = dir.join(&filename);
        match OpenOptions::new().write(true).create_new(true).open(&target).await {
            Ok(_) => {
                fs::rename(tmp_path, &target).await?;
                return Ok(filename);
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
    Err(io::Error::new(ErrorKind::Other, "no free upload name"))
}

/// `PUT /images/editimage`: launch a transform and echo its prospective output.
pub async fn edit_image(
    State(ctx): State<ServiceContext>,
    Json(req): Json<EditRequest>,
) -> Result<Json<EditDescriptor>, AppError> {
    let job = ctx.jobs.run(&req.checked, &req.path).await?;
    Ok(Json(job.descriptor))
}

/// `GET /images/editpoll`: report whether the edit output exists yet.
///
/// Once it does, the edited file is archived into the edits collection.
pub async fn edit_poll(
    State(ctx): State<ServiceContext>,
    Query(job): Query<EditDescriptor>,
) -> Result<Json<PollResponse>, AppError> {
    debug!("editpoll call: {}", job.path);
    let path = ctx.layout.contain(&job.path)?;
    let found = output_file_exists(&path).await;

    if found {
        let meta = ImageMeta {
            image: job.image.clone(),
            timestamp: job.timestamp,
            orig: Some(job.orig),
            checked: Some(job.checked),
            ..Default::default()
        };
        ctx.pipeline.spawn(path, job.image, Collection::Edits, meta);
    }

    Ok(Json(PollResponse { found }))
}

/// `POST /images/downloadimage`: stream a local public file back.
pub async fn download_image(
    State(ctx): State<ServiceContext>,
    Json(req): Json<DownloadRequest>,
) -> Result<Response, AppError> {
    let path = ctx.layout.contain(&req.path)?;
    let file = File::open(&path).await.map_err(|err| {
        if err.kind() == ErrorKind::NotFound {
            AppError::not_found(format!("{} not found", req.path))
        } else {
            AppError::from(err)
        }
    })?;
    let length = file.metadata().await?.len();

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type_for(&path));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().replace('"', ""))
        .unwrap_or_default();
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\"")) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

fn content_type_for(path: &Path) -> HeaderValue {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => HeaderValue::from_static("image/jpeg"),
        Some("png") => HeaderValue::from_static("image/png"),
        _ => HeaderValue::from_static("application/octet-stream"),
    }
}

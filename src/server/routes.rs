use axum::body::Bytes;
use axum::extract::multipart::Multipart;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use std::io::Cursor;
use tracing::{debug, info};

use super::error::AppError;
use super::state::AppState;
use crate::error::WorkflowError;
use crate::models::{RegionRequest, UploadRequest, WorkflowRequest, WorkflowResponse};
use crate::workflow::WorkflowKind;

/// Multipart field carrying the uploaded spreadsheet.
pub const UPLOAD_FIELD: &str = "file";

/// GET /: service description.
pub async fn index() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "POST /run_shapefile",
            "POST /upload_excel",
            "GET /download/{filename}",
        ],
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ShapefileForm {
    pub region_type: String,
    pub region_names: String,
    pub years: String,
}

/// POST /run_shapefile: region and year analysis.
pub async fn run_shapefile(
    State(app): State<AppState>,
    form: Result<Json<ShapefileForm>, JsonRejection>,
) -> Result<Json<WorkflowResponse>, AppError> {
    let form = match form {
        Ok(Json(form)) => form,
        Err(rejection) => {
            let err = WorkflowError::invalid_request(rejection.body_text());
            return Ok(Json(WorkflowKind::Region.respond(Err(err))));
        }
    };

    let orchestrator = app.orchestrator.clone();
    let response = tokio::task::spawn_blocking(move || {
        let result = RegionRequest::parse(
            form.region_type.trim(),
            form.region_names.trim(),
            form.years.trim(),
        )
        .map(WorkflowRequest::Region)
        .and_then(|request| orchestrator.execute(&request));

        WorkflowKind::Region.respond(result)
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))?;

    Ok(Json(response))
}

/// POST /upload_excel: store the uploaded spreadsheet and analyze it.
pub async fn upload_excel(
    State(app): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<WorkflowResponse>, AppError> {
    let (file_name, content) = match read_upload_field(&mut multipart).await {
        Ok(Some(upload)) => upload,
        Ok(None) => return Ok(Json(WorkflowResponse::failed("No file uploaded."))),
        Err(e) => return Ok(Json(WorkflowResponse::failed(e.to_string()))),
    };

    if file_name.trim().is_empty() {
        return Ok(Json(WorkflowResponse::failed("File name is empty.")));
    }

    let uploads = app.uploads.clone();
    let orchestrator = app.orchestrator.clone();
    let response = tokio::task::spawn_blocking(move || {
        let stored = match uploads.store(&file_name, Cursor::new(content)) {
            Ok(stored) => stored,
            Err(e @ WorkflowError::InvalidUpload(_)) => return WorkflowResponse::failed(e.to_string()),
            Err(e) => return WorkflowKind::Upload.respond(Err(e)),
        };

        let request = WorkflowRequest::Upload(UploadRequest::from(&stored));
        WorkflowKind::Upload.respond(orchestrator.execute(&request))
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))?;

    Ok(Json(response))
}

/// Pull the first `file` field out of the multipart body.
async fn read_upload_field(
    multipart: &mut Multipart,
) -> Result<Option<(String, Bytes)>, WorkflowError> {
    loop {
        let field = multipart
            .next_field()
            .await
            .map_err(|e| WorkflowError::invalid_upload(format!("Malformed upload: {}", e.body_text())))?;

        let Some(field) = field else {
            return Ok(None);
        };

        if field.name() != Some(UPLOAD_FIELD) {
            debug!("Ignoring multipart field {:?}", field.name());
            continue;
        }

        // A part without a filename parameter is a plain form value.
        let Some(file_name) = field.file_name().map(str::to_string) else {
            debug!("Ignoring non-file '{}' part", UPLOAD_FIELD);
            continue;
        };
        let content = field.bytes().await.map_err(|e| {
            WorkflowError::invalid_upload(format!("Failed to read uploaded file: {}", e.body_text()))
        })?;

        return Ok(Some((file_name, content)));
    }
}

/// GET /download/{filename}: raw artifact bytes as an attachment.
pub async fn download(
    State(app): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, AppError> {
    if !is_plain_file_name(&filename) {
        return Err(AppError::bad_request(format!("Invalid file name: {filename}")));
    }

    let path = app.output_dir().join(&filename);
    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => {}
        _ => return Err(AppError::not_found(path)),
    }

    let bytes = tokio::fs::read(&path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AppError::not_found(path.clone())
        } else {
            AppError(anyhow::Error::new(e).context(format!("reading {}", path.display())))
        }
    })?;

    if let Some(leases) = &app.leases {
        leases.lease(&path);
    }
    info!("Serving download: {} ({} bytes)", filename, bytes.len());

    let content_type = mime_guess::from_path(&path).first_or_octet_stream().to_string();
    let disposition = format!("attachment; filename=\"{}\"", filename.replace('"', ""));

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

/// A single path component that cannot leave the output directory.
fn is_plain_file_name(name: &str) -> bool {
    !matches!(name, "" | "." | "..") && !name.contains(['/', '\\', '\0'])
}

//! Request routing and endpoint handlers
//!
//! | Method | Path                        | Handler       |
//! |--------|-----------------------------|---------------|
//! | POST   | /api/process                | `process`     |
//! | GET    | /api/download/{id}          | `download`    |
//! | GET    | /api/files                  | `list_files`  |
//! | POST   | /api/cleanup                | `delete_all`  |
//! | DELETE | /api/delete_all             | `delete_all`  |
//! | DELETE | /api/delete/{id}            | `delete_one`  |
//! | GET    | /api/real_esrgan_status     | `tool_status` |
//! | GET    | / and anything outside /api | static files  |
//!
//! Every response carries `Access-Control-Allow-Origin: *`.

use bytes::Bytes;
use http::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_DISPOSITION, CONTENT_TYPE,
};
use http::{Method, StatusCode};
use hyper::body::Body;
use hyper::{Request, Response};
use std::sync::Arc;
use tracing::{debug, info};

use super::error::ApiError;
use super::multipart::{self, ProcessForm, Upload};
use super::response::{
    build, content_type, full, json, BoxBody, CleanupResponse, FileEntry, FileList,
    MessageResponse, ProcessResponse,
};
use super::{assets, AppState};
use crate::convert::{self, TargetFormat};
use crate::decode;
use crate::upscale::{tool, UpscaleRequest};

const DOWNLOAD_PREFIX: &str = "/api/download/";
const DELETE_PREFIX: &str = "/api/delete/";

/// Route one request. Never fails: errors become JSON failure bodies.
pub async fn handle<B>(state: Arc<AppState>, req: Request<B>) -> Response<BoxBody>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    debug!(method = %method, path = %path, "request");

    let result = match (&method, path.as_str()) {
        (&Method::OPTIONS, _) => Ok(preflight()),
        (&Method::POST, "/api/process") => process(&state, req).await,
        (&Method::GET, "/api/files") => list_files(&state).await,
        (&Method::POST, "/api/cleanup") | (&Method::DELETE, "/api/delete_all") => {
            delete_all(&state).await
        }
        (&Method::GET, "/api/real_esrgan_status") => Ok(tool_status(&state)),
        (&Method::GET, p) if p.starts_with(DOWNLOAD_PREFIX) => {
            download(&state, &p[DOWNLOAD_PREFIX.len()..]).await
        }
        (&Method::DELETE, p) if p.starts_with(DELETE_PREFIX) => {
            delete_one(&state, &p[DELETE_PREFIX.len()..]).await
        }
        (&Method::GET, p) if !p.starts_with("/api/") => assets::serve(&state.config.static_dir, p).await,
        _ => Err(ApiError::NotFound("Not found".to_string())),
    };

    let mut response = result.unwrap_or_else(ApiError::into_response);
    response
        .headers_mut()
        .insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

fn preflight() -> Response<BoxBody> {
    build(
        Response::builder()
            .status(StatusCode::NO_CONTENT)
            .header(ACCESS_CONTROL_ALLOW_METHODS, "GET, POST, DELETE, OPTIONS")
            .header(ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type"),
        full(Bytes::new()),
    )
}

/// Run blocking store or pixel work off the async workers
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("Task join error: {}", e)))?
}

/// Model names end up in file paths and on the tool's command line
fn valid_model_name(model: &str) -> bool {
    !model.is_empty()
        && !model.starts_with('.')
        && model
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

enum Action {
    Convert(TargetFormat),
    Upscale { model: String },
}

/// Check everything about a form before anything touches the disk
fn validate(form: &ProcessForm, state: &AppState) -> Result<Action, ApiError> {
    let file = form
        .file
        .as_ref()
        .ok_or_else(|| ApiError::Validation("No file part in the request".to_string()))?;
    if file.file_name.is_empty() {
        return Err(ApiError::Validation("No file selected".to_string()));
    }
    if !decode::is_accepted(&file.file_name) {
        return Err(ApiError::Validation("Unsupported file format".to_string()));
    }

    match form.action.as_deref() {
        Some("convert") => {
            let format = form
                .format
                .as_deref()
                .ok_or_else(|| ApiError::Validation("Missing target format".to_string()))?;
            let target = TargetFormat::parse(format)?;
            Ok(Action::Convert(target))
        }
        Some("upscale") => {
            let model = form
                .model
                .clone()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| state.config.default_model.clone());
            if !valid_model_name(&model) {
                return Err(ApiError::Validation(format!("Invalid model name: {}", model)));
            }
            Ok(Action::Upscale { model })
        }
        _ => Err(ApiError::Validation("Unknown action".to_string())),
    }
}

async fn process<B>(state: &Arc<AppState>, req: Request<B>) -> Result<Response<BoxBody>, ApiError>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let form = multipart::parse_form(req, state.config.max_upload_bytes).await?;
    let action = validate(&form, state)?;
    let Some(file) = form.file else {
        return Err(ApiError::Validation("No file part in the request".to_string()));
    };

    // Once the upload is accepted the work belongs to its own task: a client
    // that hangs up drops this future, not the conversion or the tool run
    let task = tokio::spawn(run_action(Arc::clone(state), file, action));
    let response = task
        .await
        .map_err(|e| ApiError::Internal(format!("Task join error: {}", e)))??;

    Ok(json(StatusCode::OK, &response))
}

async fn run_action(
    state: Arc<AppState>,
    file: Upload,
    action: Action,
) -> Result<ProcessResponse, ApiError> {
    // Removed when `upload` drops, whatever happens below
    let store = Arc::clone(&state.store);
    let upload = blocking(move || Ok(store.put_transient(&file.bytes, &file.file_name)?)).await?;
    let input = upload.path().to_path_buf();
    debug!(upload = upload.id(), "processing upload");

    let response = match action {
        Action::Convert(target) => {
            let store = Arc::clone(&state.store);
            let stored = blocking(move || Ok(convert::convert(&store, &input, target)?)).await?;
            ProcessResponse::converted(&stored, target.label())
        }
        Action::Upscale { model } => {
            let result = state.executor.upscale(&UpscaleRequest { input, model }).await?;
            info!(
                id = %result.output.id,
                method = result.method.api_name(),
                width = result.output.width,
                height = result.output.height,
                "upscale finished"
            );
            ProcessResponse::upscaled(&result)
        }
    };

    drop(upload);
    Ok(response)
}

async fn download(state: &Arc<AppState>, id: &str) -> Result<Response<BoxBody>, ApiError> {
    let store = Arc::clone(&state.store);
    let owned = id.to_string();
    let file = blocking(move || Ok(store.get(&owned)?)).await?;

    // Swept or deleted since the lookup
    let bytes = tokio::fs::read(&file.path)
        .await
        .map_err(|_| ApiError::file_not_found())?;

    Ok(build(
        Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, content_type(id))
            .header(CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", id)),
        full(bytes),
    ))
}

async fn list_files(state: &Arc<AppState>) -> Result<Response<BoxBody>, ApiError> {
    let store = Arc::clone(&state.store);
    let files = blocking(move || Ok(store.list()?)).await?;

    Ok(json(
        StatusCode::OK,
        &FileList {
            success: true,
            files: files.into_iter().map(FileEntry::from).collect(),
        },
    ))
}

async fn delete_all(state: &Arc<AppState>) -> Result<Response<BoxBody>, ApiError> {
    let store = Arc::clone(&state.store);
    let batch = blocking(move || Ok(store.delete_all())).await?;

    let total = batch.total();
    let deleted = batch.deleted.len();
    let errors: Vec<String> = batch
        .failed
        .iter()
        .map(|(id, reason)| format!("{}: {}", id, reason))
        .collect();

    let mut message = format!("Deleted {} of {} files", deleted, total);
    if !errors.is_empty() {
        message.push_str(&format!(". Errors: {}", errors.len()));
    }

    Ok(json(
        StatusCode::OK,
        &CleanupResponse {
            success: true,
            deleted_count: deleted,
            total_files: total,
            errors,
            message,
        },
    ))
}

async fn delete_one(state: &Arc<AppState>, id: &str) -> Result<Response<BoxBody>, ApiError> {
    let store = Arc::clone(&state.store);
    let owned = id.to_string();
    blocking(move || Ok(store.delete(&owned)?)).await?;

    Ok(json(
        StatusCode::OK,
        &MessageResponse {
            success: true,
            message: "File deleted".to_string(),
        },
    ))
}

fn tool_status(state: &AppState) -> Response<BoxBody> {
    json(StatusCode::OK, &tool::check_status(&state.config))
}

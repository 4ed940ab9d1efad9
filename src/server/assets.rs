//! Static front-end files

use http::header::CONTENT_TYPE;
use http::StatusCode;
use hyper::Response;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::error::ApiError;
use super::response::{build, content_type, full, BoxBody};

const INDEX: &str = "index.html";

/// Map a request path onto a file beneath `root`. Empty, `.`, `..`,
/// hidden and backslash-bearing segments are refused.
fn resolve(root: &Path, request_path: &str) -> Option<PathBuf> {
    let relative = request_path.trim_start_matches('/');
    if relative.is_empty() {
        return Some(root.join(INDEX));
    }

    let mut path = root.to_path_buf();
    for segment in relative.split('/') {
        if segment.is_empty() || segment.starts_with('.') || segment.contains(['\\', '\0']) {
            return None;
        }
        path.push(segment);
    }
    Some(path)
}

pub async fn serve(root: &Path, request_path: &str) -> Result<Response<BoxBody>, ApiError> {
    let path = resolve(root, request_path).ok_or_else(ApiError::file_not_found)?;

    let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        ErrorKind::NotFound | ErrorKind::PermissionDenied => ApiError::file_not_found(),
        // Directories fail to read too; treat them as missing
        _ if path.is_dir() => ApiError::file_not_found(),
        _ => ApiError::Internal(e.to_string()),
    })?;

    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    Ok(build(
        Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, content_type(name)),
        full(bytes),
    ))
}

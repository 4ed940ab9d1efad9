//! Response bodies and builders

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::response::Builder;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::Response;
use serde::Serialize;
use std::convert::Infallible;
use tracing::error;

use crate::state::{Category, StoredFile};
use crate::upscale::UpscaleResult;

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, Infallible>;

pub fn full(bytes: impl Into<Bytes>) -> BoxBody {
    Full::new(bytes.into()).boxed()
}

/// Finish a builder; a bad header turns into a bare 500
pub fn build(builder: Builder, body: BoxBody) -> Response<BoxBody> {
    builder.body(body).unwrap_or_else(|e| {
        error!(error = %e, "failed to build response");
        let mut response = Response::new(full(Bytes::new()));
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        response
    })
}

pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Response<BoxBody> {
    match serde_json::to_vec(value) {
        Ok(bytes) => build(
            Response::builder()
                .status(status)
                .header(CONTENT_TYPE, HeaderValue::from_static("application/json")),
            full(bytes),
        ),
        Err(e) => {
            error!(error = %e, "failed to serialize response");
            build(
                Response::builder().status(StatusCode::INTERNAL_SERVER_ERROR),
                full(Bytes::new()),
            )
        }
    }
}

/// MIME type for a file name, by extension
pub fn content_type(name: &str) -> &'static str {
    let ext = crate::decode::extension_of(name).unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" => "text/javascript; charset=utf-8",
        "json" => "application/json",
        "txt" => "text/plain; charset=utf-8",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "gif" => "image/gif",
        "tif" | "tiff" => "image/tiff",
        "heic" => "image/heic",
        "heif" => "image/heif",
        _ => "application/octet-stream",
    }
}

pub fn download_url(id: &str) -> String {
    format!("/api/download/{}", id)
}

/// Successful `/api/process` result
#[derive(Serialize, Debug)]
pub struct ProcessResponse {
    pub success: bool,
    pub download_url: String,
    pub filename: String,
    pub width: u32,
    pub height: u32,
    pub file_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale_factor: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<&'static str>,
}

impl ProcessResponse {
    fn for_file(file: &StoredFile) -> Self {
        Self {
            success: true,
            download_url: download_url(&file.id),
            filename: file.id.clone(),
            width: file.width,
            height: file.height,
            file_size: file.size,
            format: None,
            scale_factor: None,
            method: None,
        }
    }

    pub fn converted(file: &StoredFile, format: String) -> Self {
        Self {
            format: Some(format),
            ..Self::for_file(file)
        }
    }

    pub fn upscaled(result: &UpscaleResult) -> Self {
        Self {
            scale_factor: Some(result.scale_factor),
            method: Some(result.method.api_name()),
            ..Self::for_file(&result.output)
        }
    }
}

#[derive(Serialize, Debug)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
    pub url: String,
    #[serde(rename = "type")]
    pub kind: Category,
    pub width: u32,
    pub height: u32,
    /// RFC 3339
    pub modified: String,
}

impl From<StoredFile> for FileEntry {
    fn from(file: StoredFile) -> Self {
        Self {
            url: download_url(&file.id),
            size: file.size,
            kind: file.category,
            width: file.width,
            height: file.height,
            modified: file.modified.to_rfc3339(),
            name: file.id,
        }
    }
}

#[derive(Serialize, Debug)]
pub struct FileList {
    pub success: bool,
    pub files: Vec<FileEntry>,
}

/// Result of `/api/cleanup` and `/api/delete_all`
#[derive(Serialize, Debug)]
pub struct CleanupResponse {
    pub success: bool,
    pub deleted_count: usize,
    pub total_files: usize,
    pub errors: Vec<String>,
    pub message: String,
}

#[derive(Serialize, Debug)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

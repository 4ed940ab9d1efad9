//! `multipart/form-data` decoding for `/api/process`

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::Request;
use std::convert::Infallible;

use super::error::ApiError;

/// Room for boundaries and the small text fields on top of the file itself
const FORM_OVERHEAD: usize = 64 * 1024;

/// The uploaded file part
#[derive(Debug)]
pub struct Upload {
    /// Client-side file name, as sent
    pub file_name: String,
    pub bytes: Bytes,
}

/// Fields of a process request. Unknown fields are ignored.
#[derive(Debug, Default)]
pub struct ProcessForm {
    pub file: Option<Upload>,
    pub action: Option<String>,
    pub format: Option<String>,
    pub model: Option<String>,
}

fn too_large(max_file_bytes: usize) -> ApiError {
    ApiError::Validation(format!(
        "File too large. Maximum: {}MB",
        max_file_bytes / 1024 / 1024
    ))
}

fn malformed(e: multer::Error) -> ApiError {
    ApiError::Validation(format!("Malformed form data: {}", e))
}

/// Buffer and decode the request body. Bodies that can't hold a file of
/// at most `max_file_bytes` are rejected before they are fully read.
pub async fn parse_form<B>(req: Request<B>, max_file_bytes: usize) -> Result<ProcessForm, ApiError>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Validation("Expected a multipart/form-data body".to_string()))?;
    let boundary = multer::parse_boundary(content_type)
        .map_err(|_| ApiError::Validation("Expected a multipart/form-data body".to_string()))?;

    let body = Limited::new(req.into_body(), max_file_bytes.saturating_add(FORM_OVERHEAD))
        .collect()
        .await
        .map_err(|e| {
            if e.is::<LengthLimitError>() {
                too_large(max_file_bytes)
            } else {
                ApiError::Validation(format!("Failed to read request body: {}", e))
            }
        })?
        .to_bytes();

    let stream = futures::stream::once(async move { Ok::<_, Infallible>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    let mut form = ProcessForm::default();
    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(malformed)?;
                if bytes.len() > max_file_bytes {
                    return Err(too_large(max_file_bytes));
                }
                form.file = Some(Upload { file_name, bytes });
            }
            Some("action") => form.action = Some(field.text().await.map_err(malformed)?),
            Some("format") => form.format = Some(field.text().await.map_err(malformed)?),
            Some("model") => form.model = Some(field.text().await.map_err(malformed)?),
            _ => {}
        }
    }

    Ok(form)
}

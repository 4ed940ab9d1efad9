use http::StatusCode;
use hyper::Response;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use super::response::{json, BoxBody};
use crate::convert::ConvertError;
use crate::decode::DecodeError;
use crate::state::StoreError;
use crate::upscale::UpscaleError;

/// Every way a request can fail, as seen by the client
#[derive(Error, Debug)]
pub enum ApiError {
    /// Bad extension, oversized file, missing or malformed field
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    /// The input needs a decoder this build doesn't carry
    #[error("{0}")]
    MissingCapability(String),

    #[error("{0}")]
    Timeout(String),

    /// Decode, encode or resize failure
    #[error("{0}")]
    Processing(String),

    #[error("{0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    success: bool,
    error: String,
    code: &'a str,
}

impl ApiError {
    pub fn file_not_found() -> Self {
        ApiError::NotFound("File not found".to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            // Structured failures the client is expected to handle
            ApiError::MissingCapability(_) | ApiError::Timeout(_) => StatusCode::OK,
            ApiError::Processing(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable kind
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation",
            ApiError::NotFound(_) => "not_found",
            ApiError::MissingCapability(_) => "missing_capability",
            ApiError::Timeout(_) => "upscale_timeout",
            ApiError::Processing(_) => "processing",
            ApiError::Internal(_) => "internal",
        }
    }

    pub fn into_response(self) -> Response<BoxBody> {
        let status = self.status();
        if status.is_server_error() {
            error!(code = self.code(), error = %self, "request failed");
        } else {
            warn!(code = self.code(), error = %self, "request rejected");
        }

        json(
            status,
            &ErrorBody {
                success: false,
                error: self.to_string(),
                code: self.code(),
            },
        )
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(_) => ApiError::file_not_found(),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<DecodeError> for ApiError {
    fn from(e: DecodeError) -> Self {
        match e {
            DecodeError::MissingCapability(_) => ApiError::MissingCapability(e.to_string()),
            other => ApiError::Processing(other.to_string()),
        }
    }
}

impl From<ConvertError> for ApiError {
    fn from(e: ConvertError) -> Self {
        match e {
            ConvertError::UnsupportedTarget(_) => ApiError::Validation(e.to_string()),
            ConvertError::Decode(decode) => decode.into(),
            ConvertError::Encode(_) | ConvertError::Io(_) => ApiError::Processing(e.to_string()),
            // A failed commit is our fault, not the client's missing file
            ConvertError::Store(store) => ApiError::Internal(store.to_string()),
        }
    }
}

impl From<UpscaleError> for ApiError {
    fn from(e: UpscaleError) -> Self {
        match e {
            UpscaleError::Timeout(_) => ApiError::Timeout(e.to_string()),
            UpscaleError::TooLarge { .. } => ApiError::Validation(e.to_string()),
            UpscaleError::Decode(decode) => decode.into(),
            UpscaleError::Store(store) => ApiError::Internal(store.to_string()),
            UpscaleError::Unavailable(_) | UpscaleError::ToolFailed(_) | UpscaleError::Processing(_) => {
                ApiError::Processing(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_and_code_per_kind() {
        let cases = [
            (ApiError::Validation("x".into()), StatusCode::BAD_REQUEST, "validation"),
            (ApiError::file_not_found(), StatusCode::NOT_FOUND, "not_found"),
            (ApiError::MissingCapability("x".into()), StatusCode::OK, "missing_capability"),
            (ApiError::Timeout("x".into()), StatusCode::OK, "upscale_timeout"),
            (ApiError::Processing("x".into()), StatusCode::INTERNAL_SERVER_ERROR, "processing"),
            (ApiError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        ];
        for (error, status, code) in cases {
            assert_eq!(error.status(), status);
            assert_eq!(error.code(), code);
        }
    }

    #[test]
    fn test_upscale_errors_map_to_kinds() {
        let timeout: ApiError = UpscaleError::Timeout(Duration::from_secs(300)).into();
        assert_eq!(timeout.code(), "upscale_timeout");
        assert_eq!(timeout.to_string(), "Processing timed out (300s)");

        let heic: ApiError =
            UpscaleError::Decode(DecodeError::MissingCapability("HEIC/HEIF")).into();
        assert_eq!(heic.code(), "missing_capability");

        let broken: ApiError = UpscaleError::Processing("bad pixels".into()).into();
        assert_eq!(broken.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let huge: ApiError = UpscaleError::TooLarge {
            width: 8000,
            height: 8000,
            limit: 40_000_000,
        }
        .into();
        assert_eq!(huge.status(), StatusCode::BAD_REQUEST);
        assert_eq!(huge.code(), "validation");
    }

    #[test]
    fn test_store_not_found_is_404() {
        let e: ApiError = StoreError::NotFound("x.png".into()).into();
        assert_eq!(e.status(), StatusCode::NOT_FOUND);
        assert_eq!(e.to_string(), "File not found");
    }
}

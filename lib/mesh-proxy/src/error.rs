//! Caller-visible failures of the mesh

use http_body_util::Full;
use hyper::{body::Bytes, header, Response, StatusCode};
use mesh_core::{CoreError, Scope};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MeshError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Invalid relative path: {0}")]
    InvalidPath(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: service {id} lacks the '{missing}' scope")]
    Forbidden { id: String, missing: Scope },

    #[error("Service not found: {0}")]
    NotFound(String),

    #[error("Request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Bad gateway: {0}")]
    BadGateway(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

impl MeshError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            MeshError::Validation(_) | MeshError::InvalidPath(_) => StatusCode::BAD_REQUEST,
            MeshError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            MeshError::Forbidden { .. } => StatusCode::FORBIDDEN,
            MeshError::NotFound(_) => StatusCode::NOT_FOUND,
            MeshError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            MeshError::BadGateway(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Stable machine-readable reason for the failure
    pub fn reason(&self) -> &'static str {
        match self {
            MeshError::Validation(_) => "validation",
            MeshError::InvalidPath(_) => "invalid_path",
            MeshError::Unauthorized(_) => "unauthorized",
            MeshError::Forbidden {
                missing: Scope::Request,
                ..
            } => "caller_missing_request",
            MeshError::Forbidden {
                missing: Scope::Receive,
                ..
            } => "target_missing_receive",
            MeshError::NotFound(_) => "not_found",
            MeshError::PayloadTooLarge(_) => "payload_too_large",
            MeshError::BadGateway(_) => "bad_gateway",
        }
    }

    /// Render as a JSON `{error, message}` response
    pub fn into_response(self) -> Response<Full<Bytes>> {
        let body = ErrorBody {
            error: self.reason(),
            message: self.to_string(),
        };
        json_response(self.status_code(), &body)
    }
}

impl From<CoreError> for MeshError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(reason) => MeshError::Validation(reason),
            CoreError::NotFound(id) => MeshError::NotFound(id),
        }
    }
}

/// Serialize `value` into a JSON response with the given status
pub(crate) fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)))
            .unwrap_or_else(|_| internal_error()),
        Err(_) => internal_error(),
    }
}

pub(crate) fn internal_error() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from("Internal Server Error\n")));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn test_status_codes() {
        assert_eq!(MeshError::Validation("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(MeshError::InvalidPath("..".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(MeshError::Unauthorized("x".into()).status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            MeshError::Forbidden { id: "a".into(), missing: Scope::Request }.status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(MeshError::NotFound("b".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            MeshError::PayloadTooLarge(1024).status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(MeshError::BadGateway("x".into()).status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_forbidden_reasons_are_distinct() {
        let caller = MeshError::Forbidden { id: "a".into(), missing: Scope::Request };
        let target = MeshError::Forbidden { id: "b".into(), missing: Scope::Receive };
        assert_eq!(caller.reason(), "caller_missing_request");
        assert_eq!(target.reason(), "target_missing_receive");
    }

    #[test]
    fn test_from_core_error() {
        assert_eq!(
            MeshError::from(CoreError::NotFound("svc".into())),
            MeshError::NotFound("svc".into())
        );
        assert_eq!(
            MeshError::from(CoreError::Validation("bad".into())),
            MeshError::Validation("bad".into())
        );
    }

    #[tokio::test]
    async fn test_error_response_body() {
        let response = MeshError::BadGateway("connection refused".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "bad_gateway");
        assert_eq!(json["message"], "Bad gateway: connection refused");
    }
}

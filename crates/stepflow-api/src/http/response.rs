//! The JSON envelope shared by every `/api/v1` response.
//!
//! Success and failure use the same shape; `data` is null on failure:
//! ```json
//! {
//!   "data": { ... },
//!   "meta": { "request_id": "...", "timestamp": "...", "response_time_ms": 5 },
//!   "errors": [],
//!   "_links": { "self": "..." }
//! }
//! ```

use std::collections::HashMap;
use std::time::Instant;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use uuid::Uuid;

/// `{data, meta, errors, _links}`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    /// Null when the request failed.
    pub data: Option<T>,

    /// Request metadata.
    pub meta: ApiMeta,

    /// Omitted on success.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ApiErrorDetail>,

    /// Related resource paths, keyed by relation.
    #[serde(rename = "_links", skip_serializing_if = "HashMap::is_empty")]
    pub links: HashMap<String, String>,
}

/// Per-request bookkeeping.
#[derive(Debug, Serialize)]
pub struct ApiMeta {
    /// UUID v7, generated per request.
    pub request_id: String,
    /// RFC 3339.
    pub timestamp: String,
    pub response_time_ms: u64,
}

impl ApiMeta {
    pub fn new(request_id: String, response_time_ms: u64) -> Self {
        Self {
            request_id,
            timestamp: chrono::Utc::now().to_rfc3339(),
            response_time_ms,
        }
    }
}

/// One entry of `errors`.
#[derive(Debug, Clone, Serialize)]
pub struct ApiErrorDetail {
    /// Stable code, e.g. `WORKFLOW_NOT_FOUND` or a validation code.
    pub code: String,
    pub message: String,
    /// Location and severity for validation errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiErrorDetail {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }
}

/// Per-request timer and id, created at the top of each handler.
pub struct RequestTimer {
    start: Instant,
    request_id: String,
}

impl RequestTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
            request_id: Uuid::now_v7().to_string(),
        }
    }

    /// Wrap `data` in a success envelope.
    pub fn success<T: Serialize>(self, data: T) -> ApiResponse<T> {
        let elapsed = self.start.elapsed().as_millis() as u64;
        ApiResponse::success(data, self.request_id, elapsed)
    }
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T, request_id: String, response_time_ms: u64) -> Self {
        Self {
            data: Some(data),
            meta: ApiMeta::new(request_id, response_time_ms),
            errors: Vec::new(),
            links: HashMap::new(),
        }
    }

    /// Add an entry to `_links`.
    pub fn with_link(mut self, rel: &str, href: &str) -> Self {
        self.links.insert(rel.to_string(), href.to_string());
        self
    }
}

impl ApiResponse<()> {
    pub fn failure(errors: Vec<ApiErrorDetail>, request_id: String) -> Self {
        Self {
            data: None,
            meta: ApiMeta::new(request_id, 0),
            errors,
            links: HashMap::new(),
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let body = serde_json::to_string(&self).unwrap_or_else(|_| {
            r#"{"data":null,"errors":[{"code":"SERIALIZATION_ERROR","message":"Failed to serialize response"}]}"#.to_string()
        });

        (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope_shape() {
        let resp = ApiResponse::success(serde_json::json!({"name": "x"}), "req-1".to_string(), 3)
            .with_link("self", "/api/v1/workflows/x");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["data"]["name"], "x");
        assert_eq!(json["meta"]["request_id"], "req-1");
        assert_eq!(json["_links"]["self"], "/api/v1/workflows/x");
        assert!(json.get("errors").is_none());
    }

    #[test]
    fn test_failure_envelope_has_null_data() {
        let resp = ApiResponse::failure(
            vec![ApiErrorDetail::new("WORKFLOW_NOT_FOUND", "workflow not found: x")],
            "req-2".to_string(),
        );
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json["data"].is_null());
        assert_eq!(json["errors"][0]["code"], "WORKFLOW_NOT_FOUND");
    }
}

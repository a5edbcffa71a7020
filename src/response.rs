use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;

/// Envelope every management command replies with.
#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub code: u16,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl CommandResponse {
    pub fn ok(data: impl Serialize) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self { code: 200, success: true, message: None, data: Some(value) },
            Err(e) => Self::error(500, format!("failed to serialize response: {}", e)),
        }
    }

    pub fn accepted(message: impl Into<String>, data: impl Serialize) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self {
                code: 200,
                success: true,
                message: Some(message.into()),
                data: Some(value),
            },
            Err(e) => Self::error(500, format!("failed to serialize response: {}", e)),
        }
    }

    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Self { code, success: false, message: Some(message.into()), data: None }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::error(400, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::error(404, message)
    }
}

impl IntoResponse for CommandResponse {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct VersionInfo {
    pub name: String,
    pub version: String,
}

impl VersionInfo {
    pub fn current() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthInfo {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub builder: String,
    pub resources: usize,
}

impl HealthInfo {
    pub fn healthy(uptime_secs: u64, builder: &str, resources: usize) -> Self {
        Self {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs,
            builder: builder.to_string(),
            resources,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_wraps_data() {
        let response = CommandResponse::ok(serde_json::json!({"value": 1}));
        assert!(response.success);
        assert_eq!(response.code, 200);
        assert!(response.data.is_some());
        assert!(response.message.is_none());
    }

    #[test]
    fn error_carries_code_and_message() {
        let response = CommandResponse::not_found("unknown resource 'x'");
        assert!(!response.success);
        assert_eq!(response.code, 404);
        assert_eq!(response.message.as_deref(), Some("unknown resource 'x'"));
    }
}

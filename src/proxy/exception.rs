use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use serde_json::Value;

use crate::error::AppError;

pub const PROXY_HINT: &str = "Proxy error: your app's manifest.json should have an Id (publish the app with `domo publish`) and you must be authenticated with `domo login` against the instance you are developing for.";

/// Failure of a proxied request, rendered back to the app.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DomoException {
    pub status_code: u16,
    pub error: String,
    pub url: String,
    pub proxy: String,
}

impl DomoException {
    pub fn new(err: &AppError, url: impl Into<String>) -> Self {
        Self {
            status_code: err.status().unwrap_or(500),
            error: Self::message(err),
            url: url.into(),
            proxy: PROXY_HINT.to_string(),
        }
    }

    /// Body `message` (or `statusMessage`), else the error's own text.
    fn message(err: &AppError) -> String {
        let from_body = err.body().and_then(|body| match body {
            Value::Object(map) => map
                .get("message")
                .or_else(|| map.get("statusMessage"))
                .and_then(Value::as_str)
                .map(str::to_string),
            Value::String(text) => Some(text.clone()),
            _ => None,
        });

        from_body
            .filter(|m| !m.trim().is_empty())
            .or_else(|| {
                let own = err.to_string();
                (!own.trim().is_empty()).then_some(own)
            })
            .unwrap_or_else(|| "Unknown error".to_string())
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl std::fmt::Display for DomoException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.proxy)
    }
}

impl std::error::Error for DomoException {}

impl IntoResponse for DomoException {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Remediation shown whenever the user has no usable login.
pub const LOGIN_HINT: &str = "Please log in first with `domo login`";

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not authenticated: {0}. {LOGIN_HINT}")]
    NotAuthenticated(String),

    #[error("Invalid instance '{0}': expected a dot separated host such as 'company.domo.com'")]
    InstanceFormat(String),

    #[error("url provided is not a valid domo app endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("{message}")]
    Upstream {
        status: Option<u16>,
        body: Option<serde_json::Value>,
        message: String,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Multipart error: {0}")]
    Multipart(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Failure cached by a single-flight cell and handed to every waiter.
    #[error(transparent)]
    Shared(Arc<AppError>),
}

impl AppError {
    /// Status code carried by the failure, if the upstream produced one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Upstream { status, .. } => *status,
            Self::Network(e) => e.status().map(|s| s.as_u16()),
            Self::NotAuthenticated(_) => Some(401),
            Self::Shared(inner) => inner.status(),
            _ => None,
        }
    }

    /// Upstream response body, when one was captured.
    pub fn body(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Upstream { body, .. } => body.as_ref(),
            Self::Shared(inner) => inner.body(),
            _ => None,
        }
    }
}

impl From<axum::extract::multipart::MultipartError> for AppError {
    fn from(e: axum::extract::multipart::MultipartError) -> Self {
        Self::Multipart(e.body_text())
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_authenticated_names_login_command() {
        let err = AppError::NotAuthenticated("no refresh token for test.domo.com".into());
        let msg = err.to_string();
        assert!(msg.contains("Not authenticated"));
        assert!(msg.contains("domo login"));
        assert_eq!(err.status(), Some(401));
    }

    #[test]
    fn shared_error_is_transparent() {
        let inner = Arc::new(AppError::InstanceFormat("localhost".into()));
        let err = AppError::Shared(inner);
        assert!(err.to_string().contains("Invalid instance 'localhost'"));
        assert_eq!(err.status(), None);
    }
}

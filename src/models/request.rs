use reqwest::header::HeaderMap;
use reqwest::Method;
use serde::{Deserialize, Serialize};

use super::manifest::DatasetMap;

/// Apps domain all proxied requests are sent to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainInfo {
    pub url: String,
}

/// Audit context created on the instance for each proxied request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyContext {
    pub id: String,
}

/// Body of `POST /domoapps/apps/v2/contexts`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub design_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mapping: Option<Vec<DatasetMap>>,
}

pub enum OutboundBody {
    Text(String),
    Multipart(reqwest::multipart::Form),
}

impl std::fmt::Debug for OutboundBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Multipart(form) => f
                .debug_tuple("Multipart")
                .field(&form.boundary())
                .finish(),
        }
    }
}

/// Outbound request handed to the instance client.
///
/// The response is always consumed as a byte stream.
#[derive(Debug)]
pub struct RequestOptions {
    pub url: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<OutboundBody>,
    /// Route through the configured upstream (corporate) proxy.
    pub use_upstream_proxy: bool,
}

impl RequestOptions {
    pub fn text_body(&self) -> Option<&str> {
        match &self.body {
            Some(OutboundBody::Text(text)) => Some(text),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_context_request_omits_missing_fields() {
        let empty = ContextRequest {
            design_id: None,
            mapping: None,
        };
        assert_eq!(serde_json::to_value(&empty).unwrap(), json!({}));

        let with_design = ContextRequest {
            design_id: Some("design-1".into()),
            mapping: None,
        };
        assert_eq!(
            serde_json::to_value(&with_design).unwrap(),
            json!({"designId": "design-1"})
        );
    }
}

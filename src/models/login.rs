use serde::{Deserialize, Serialize};

/// The login the proxy authenticates with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRecord {
    #[serde(default)]
    pub instance: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub dev_token: bool,
}

impl LoginRecord {
    /// Base URL of the instance API.
    pub fn server(&self) -> String {
        format!("https://{}", self.instance)
    }
}

/// OAuth tokens forwarded as `_daatv1` / `_dartv1` cookies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OauthToken {
    pub access: String,
    pub refresh: String,
}

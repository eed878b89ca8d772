//! Local secret storage for refresh tokens and OAuth tokens.
//!
//! Keys are flat strings; see [`login_key`] and [`oauth_key`] for the layout
//! shared with the login tooling.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::AppResult;
use crate::models::OauthToken;

/// Secret persisted for a login, keyed by instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginSecret {
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub dev_token: bool,
}

pub fn login_key(instance: &str) -> String {
    format!("login:{}", instance)
}

pub fn oauth_key(instance: &str, proxy_id: &str, scopes: &[String]) -> String {
    format!("oauth:{}:{}:{}", instance, proxy_id, scopes.join(","))
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, key: &str) -> AppResult<Option<String>>;

    async fn login_secret(&self, instance: &str) -> AppResult<Option<LoginSecret>> {
        match self.get(&login_key(instance)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn oauth_token(
        &self,
        instance: &str,
        proxy_id: &str,
        scopes: &[String],
    ) -> AppResult<Option<OauthToken>> {
        match self.get(&oauth_key(instance, proxy_id, scopes)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}

/// Secrets kept in a single JSON object on disk, written by the login tooling.
pub struct FileSecretStore {
    path: PathBuf,
}

impl FileSecretStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    async fn read_all(&self) -> AppResult<HashMap<String, String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(HashMap::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self.read_all().await?.remove(key))
    }
}

/// Fixed secrets, for embedding and tests.
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: HashMap<String, String>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self.secrets.get(key).cloned())
    }
}

use crate::proxy::ProxyConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path of the app's `manifest.json`
    #[serde(default = "default_manifest_path")]
    pub manifest_path: PathBuf,
    /// Overrides the ryuu home holding logins and secrets
    #[serde(default)]
    pub ryuu_home: Option<PathBuf>,
    #[serde(default)]
    pub proxy: ProxyConfig,
}

fn default_manifest_path() -> PathBuf {
    PathBuf::from("domo/manifest.json")
}

impl AppConfig {
    pub fn new() -> Self {
        Self {
            manifest_path: default_manifest_path(),
            ryuu_home: None,
            proxy: ProxyConfig::default(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}

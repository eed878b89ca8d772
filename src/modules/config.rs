use std::fs;
use std::path::Path;

use crate::error::{AppError, AppResult};
use crate::models::{AppConfig, Manifest};
use crate::proxy::config::UpstreamProxyConfig;

pub const CONFIG_FILE: &str = "ryuu-proxy.json";

/// Load application config from `path`, falling back to defaults when the
/// file is absent. `PROXY_*` environment variables override the upstream proxy.
pub fn load_app_config(path: &Path) -> AppResult<AppConfig> {
    let mut config = if path.exists() {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| AppError::Config(format!("Failed to parse {:?}: {}", path, e)))?
    } else {
        AppConfig::new()
    };

    if let Some(upstream) = UpstreamProxyConfig::from_env() {
        config.proxy.upstream_proxy = upstream;
    }

    Ok(config)
}

/// Load the app manifest
pub fn load_manifest(path: &Path) -> AppResult<Manifest> {
    let content = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("Failed to read manifest {:?}: {}", path, e)))?;
    let manifest: Manifest = serde_json::from_str(&content)
        .map_err(|e| AppError::Config(format!("Failed to parse manifest {:?}: {}", path, e)))?;

    if manifest.id.is_none() {
        tracing::warn!(
            "manifest.json has no id; publish the app with `domo publish` before proxying data"
        );
    }
    Ok(manifest)
}

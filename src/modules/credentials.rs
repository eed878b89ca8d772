use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::{AppError, AppResult};
use crate::models::{LoginRecord, OauthToken};
use crate::modules::secret_store::{FileSecretStore, SecretStore};

const DATA_DIR: &str = ".ryuu_proxy";
const RYUU_HOME: &str = ".config/configstore/ryuu";
const LOGIN_DIR: &str = "login";
const SECRETS_FILE: &str = "secrets.json";

/// Get data directory path (logs)
pub fn get_data_dir() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or("Failed to get user home directory")?;
    let data_dir = home.join(DATA_DIR);

    if !data_dir.exists() {
        fs::create_dir_all(&data_dir)
            .map_err(|e| format!("Failed to create data directory: {}", e))?;
    }

    Ok(data_dir)
}

/// Directory shared with the `domo` CLI: `$RYUU_HOME` or `~/.config/configstore/ryuu`
pub fn get_ryuu_home() -> Result<PathBuf, String> {
    if let Some(home) = std::env::var_os("RYUU_HOME") {
        return Ok(PathBuf::from(home));
    }
    let home = dirs::home_dir().ok_or("Failed to get user home directory")?;
    Ok(home.join(RYUU_HOME))
}

/// Source of the login the proxy runs as.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Most recent login, with its refresh token resolved.
    ///
    /// Fails with [`AppError::NotAuthenticated`] when no refresh token exists.
    async fn most_recent_login(&self) -> AppResult<LoginRecord>;

    /// OAuth tokens stored for an app proxy and its scope list.
    async fn oauth_token(
        &self,
        instance: &str,
        proxy_id: &str,
        scopes: &[String],
    ) -> AppResult<Option<OauthToken>>;
}

/// Reads `<ryuu home>/login/*.json` and the secret store next to it.
pub struct FileCredentialProvider {
    login_dir: PathBuf,
    secrets: Arc<dyn SecretStore>,
}

impl FileCredentialProvider {
    pub fn new(login_dir: PathBuf, secrets: Arc<dyn SecretStore>) -> Self {
        Self { login_dir, secrets }
    }

    /// Provider over the given ryuu home with its JSON secret store.
    pub fn from_home(home: &Path) -> Self {
        Self::new(
            home.join(LOGIN_DIR),
            Arc::new(FileSecretStore::new(home.join(SECRETS_FILE))),
        )
    }

    /// Newest login file by modification time, if any.
    pub fn most_recent_login_file(&self) -> AppResult<Option<PathBuf>> {
        let entries = match fs::read_dir(&self.login_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("Login directory does not exist: {:?}", self.login_dir);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let mut newest: Option<(SystemTime, PathBuf)> = None;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let modified = fs::metadata(&path)?.modified()?;
            if newest.as_ref().map_or(true, |(time, _)| modified > *time) {
                newest = Some((modified, path));
            }
        }

        Ok(newest.map(|(_, path)| path))
    }

    fn read_login(path: &Path) -> AppResult<LoginRecord> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[async_trait]
impl CredentialProvider for FileCredentialProvider {
    async fn most_recent_login(&self) -> AppResult<LoginRecord> {
        let mut login = match self.most_recent_login_file()? {
            Some(path) => {
                tracing::debug!("Using login file {:?}", path);
                Self::read_login(&path)?
            }
            None => LoginRecord::default(),
        };

        if !login.instance.is_empty() {
            if let Some(secret) = self.secrets.login_secret(&login.instance).await? {
                if secret.refresh_token.is_some() {
                    login.refresh_token = secret.refresh_token;
                    login.dev_token = secret.dev_token;
                }
            }
        }

        match login.refresh_token.as_deref() {
            Some(token) if !token.is_empty() => Ok(login),
            _ if login.instance.is_empty() => Err(AppError::NotAuthenticated(
                "no login found".to_string(),
            )),
            _ => Err(AppError::NotAuthenticated(format!(
                "no refresh token stored for {}",
                login.instance
            ))),
        }
    }

    async fn oauth_token(
        &self,
        instance: &str,
        proxy_id: &str,
        scopes: &[String],
    ) -> AppResult<Option<OauthToken>> {
        self.secrets.oauth_token(instance, proxy_id, scopes).await
    }
}

/// Fixed login, for embedding and tests.
pub struct StaticCredentialProvider {
    login: LoginRecord,
    oauth: Option<OauthToken>,
}

impl StaticCredentialProvider {
    pub fn new(login: LoginRecord) -> Self {
        Self { login, oauth: None }
    }

    pub fn with_oauth_token(mut self, token: OauthToken) -> Self {
        self.oauth = Some(token);
        self
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn most_recent_login(&self) -> AppResult<LoginRecord> {
        match self.login.refresh_token.as_deref() {
            Some(token) if !token.is_empty() => Ok(self.login.clone()),
            _ => Err(AppError::NotAuthenticated(format!(
                "no refresh token for {}",
                self.login.instance
            ))),
        }
    }

    async fn oauth_token(
        &self,
        _instance: &str,
        _proxy_id: &str,
        _scopes: &[String],
    ) -> AppResult<Option<OauthToken>> {
        Ok(self.oauth.clone())
    }
}

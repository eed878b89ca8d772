// Instance client: authenticated calls to the Domo instance and apps domain

use async_trait::async_trait;
use reqwest::{header, Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{AppError, AppResult};
use crate::models::{ContextRequest, LoginRecord, OutboundBody, ProxyContext, RequestOptions};
use crate::proxy::config::UpstreamProxyConfig;
use crate::utils::http::create_client_with_proxy;

const ENVIRONMENT_PATH: &str = "/api/content/v1/mobile/environment";
const CONTEXTS_PATH: &str = "/domoapps/apps/v2/contexts";
const TOKEN_PATH: &str = "/api/oauth2/token";
const DEV_TOKEN_HEADER: &str = "x-domo-developer-token";
/// Refresh the session this many seconds before it expires
const REFRESH_SKEW_SECS: i64 = 300;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentInfo {
    pub domoapps_domain: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

/// Authenticated access to one instance.
#[async_trait]
pub trait DomoClient: Send + Sync {
    /// Instance host, e.g. `acme.domo.com`.
    fn instance(&self) -> &str;

    /// Environment description, including the apps domain.
    async fn environment(&self) -> AppResult<EnvironmentInfo>;

    /// Creates an audit context; the instance answers with a list.
    async fn create_context(&self, request: &ContextRequest) -> AppResult<Vec<ProxyContext>>;

    /// Sends a proxied request. Non-success statuses are returned as
    /// [`AppError::Upstream`]; on success the body is left unread for streaming.
    async fn send(&self, options: RequestOptions) -> AppResult<Response>;
}

/// Builds a client once the login is known.
pub trait ClientFactory: Send + Sync {
    fn connect(&self, login: LoginRecord) -> AppResult<Arc<dyn DomoClient>>;
}

pub struct HttpClientFactory {
    timeout_secs: u64,
    upstream_proxy: Option<UpstreamProxyConfig>,
    server_override: Option<String>,
}

impl HttpClientFactory {
    pub fn new(timeout_secs: u64, upstream_proxy: Option<UpstreamProxyConfig>) -> Self {
        Self {
            timeout_secs,
            upstream_proxy,
            server_override: None,
        }
    }

    /// Talk to `server` instead of `https://<instance>`.
    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server_override = Some(server.into());
        self
    }
}

impl ClientFactory for HttpClientFactory {
    fn connect(&self, login: LoginRecord) -> AppResult<Arc<dyn DomoClient>> {
        let mut client =
            HttpDomoClient::new(login, self.timeout_secs, self.upstream_proxy.as_ref())?;
        if let Some(server) = &self.server_override {
            client.server = server.trim_end_matches('/').to_string();
        }
        Ok(Arc::new(client))
    }
}

pub struct HttpDomoClient {
    login: LoginRecord,
    server: String,
    http_client: Client,
    proxied_client: Option<Client>,
    /// (access token, expiry unix timestamp)
    session: Mutex<Option<(String, i64)>>,
}

impl HttpDomoClient {
    pub fn new(
        login: LoginRecord,
        timeout_secs: u64,
        upstream_proxy: Option<&UpstreamProxyConfig>,
    ) -> AppResult<Self> {
        let http_client = create_client_with_proxy(timeout_secs, None)?;
        let proxied_client = match upstream_proxy {
            Some(config) if config.enabled => {
                Some(create_client_with_proxy(timeout_secs, Some(config))?)
            }
            _ => None,
        };

        Ok(Self {
            server: login.server(),
            login,
            http_client,
            proxied_client,
            session: Mutex::new(None),
        })
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    fn refresh_token(&self) -> AppResult<&str> {
        self.login
            .refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                AppError::NotAuthenticated(format!("no refresh token for {}", self.login.instance))
            })
    }

    /// Access token for the session, exchanged from the refresh token and
    /// renewed shortly before it expires.
    async fn access_token(&self) -> AppResult<String> {
        let mut session = self.session.lock().await;
        let now = chrono::Utc::now().timestamp();

        if let Some((token, expiry)) = session.as_ref() {
            if now < expiry - REFRESH_SKEW_SECS {
                return Ok(token.clone());
            }
            tracing::info!("Session for {} is about to expire, refreshing...", self.login.instance);
        }

        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", self.refresh_token()?),
        ];
        let response = self
            .http_client
            .post(format!("{}{}", self.server, TOKEN_PATH))
            .form(&params)
            .send()
            .await?;
        let response = check_status(response).await.map_err(|e| match e.status() {
            Some(400) | Some(401) | Some(403) => AppError::NotAuthenticated(format!(
                "refresh token rejected by {}",
                self.login.instance
            )),
            _ => e,
        })?;
        let token: TokenResponse = response.json().await?;

        tracing::debug!("Session refreshed for {}", self.login.instance);
        *session = Some((token.access_token.clone(), now + token.expires_in));
        Ok(token.access_token)
    }

    async fn auth_headers(&self) -> AppResult<header::HeaderMap> {
        let mut headers = header::HeaderMap::new();
        if self.login.dev_token {
            headers.insert(
                DEV_TOKEN_HEADER,
                header::HeaderValue::from_str(self.refresh_token()?)
                    .map_err(|e| AppError::NotAuthenticated(e.to_string()))?,
            );
        } else {
            let token = self.access_token().await?;
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|e| AppError::NotAuthenticated(e.to_string()))?,
            );
        }
        Ok(headers)
    }
}

#[async_trait]
impl DomoClient for HttpDomoClient {
    fn instance(&self) -> &str {
        &self.login.instance
    }

    async fn environment(&self) -> AppResult<EnvironmentInfo> {
        let response = self
            .http_client
            .get(format!("{}{}", self.server, ENVIRONMENT_PATH))
            .headers(self.auth_headers().await?)
            .send()
            .await?;

        Ok(check_status(response).await?.json().await?)
    }

    async fn create_context(&self, request: &ContextRequest) -> AppResult<Vec<ProxyContext>> {
        let response = self
            .http_client
            .post(format!("{}{}", self.server, CONTEXTS_PATH))
            .headers(self.auth_headers().await?)
            .json(request)
            .send()
            .await?;

        Ok(check_status(response).await?.json().await?)
    }

    async fn send(&self, options: RequestOptions) -> AppResult<Response> {
        let client = match (&self.proxied_client, options.use_upstream_proxy) {
            (Some(proxied), true) => proxied,
            _ => &self.http_client,
        };

        let mut headers = options.headers;
        headers.extend(self.auth_headers().await?);

        let mut builder = client
            .request(options.method, &options.url)
            .headers(headers);
        builder = match options.body {
            Some(OutboundBody::Text(text)) => builder.body(text),
            Some(OutboundBody::Multipart(form)) => builder.multipart(form),
            None => builder,
        };

        tracing::debug!("Forwarding to {}", options.url);
        check_status(builder.send().await?).await
    }
}

/// Turns a non-success response into [`AppError::Upstream`], keeping the
/// decoded body so the message can be surfaced to the app.
pub async fn check_status(response: Response) -> AppResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let body = serde_json::from_str::<Value>(&text)
        .ok()
        .or_else(|| (!text.is_empty()).then(|| Value::String(text.clone())));

    Err(AppError::Upstream {
        status: Some(status.as_u16()),
        body,
        message: status_message(status),
    })
}

fn status_message(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("{} {}", status.as_u16(), reason),
        None => status.as_u16().to_string(),
    }
}

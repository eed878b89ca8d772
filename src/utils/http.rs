use crate::error::AppResult;
use crate::proxy::config::UpstreamProxyConfig;
use reqwest::{Client, Proxy};
use std::time::Duration;

pub const USER_AGENT: &str = concat!("ryuu-proxy/", env!("CARGO_PKG_VERSION"));

/// Create an HTTP client, optionally routed through a forward proxy.
/// An unusable proxy address is logged and ignored.
pub fn create_client_with_proxy(
    timeout_secs: u64,
    proxy_config: Option<&UpstreamProxyConfig>,
) -> AppResult<Client> {
    let mut builder = Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(USER_AGENT);

    if let Some(config) = proxy_config {
        if config.enabled && !config.url.is_empty() {
            match Proxy::all(&config.url) {
                Ok(proxy) => {
                    builder = builder.proxy(proxy);
                    tracing::info!("HTTP client upstream proxy enabled: {}", redact(&config.url));
                }
                Err(e) => {
                    tracing::error!("Invalid proxy address: {}, error: {}", redact(&config.url), e);
                }
            }
        }
    }

    Ok(builder.build()?)
}

/// Proxy URL with any password masked, for logs.
fn redact(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("***"));
            parsed.to_string()
        }
        _ => url.to_string(),
    }
}

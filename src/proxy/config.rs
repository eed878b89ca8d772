use serde::{Deserialize, Serialize};

/// Proxy service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Allow LAN access
    /// - false: only 127.0.0.1 (default)
    /// - true: bind 0.0.0.0
    #[serde(default)]
    pub allow_lan_access: bool,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Timeout of every outbound call (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Append `context=<id>` to the referer like older proxy releases did
    #[serde(default)]
    pub append_context_to_referer: bool,

    /// Where non-proxied requests go (the local app dev server), if anywhere
    #[serde(default)]
    pub fallback_url: Option<String>,

    /// Forward network proxy used for non-multipart requests
    #[serde(default)]
    pub upstream_proxy: UpstreamProxyConfig,
}

/// Forward network proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct UpstreamProxyConfig {
    pub enabled: bool,
    /// Proxy address (http://, https://, socks5://)
    pub url: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            allow_lan_access: false,
            port: default_port(),
            request_timeout: default_request_timeout(),
            append_context_to_referer: false,
            fallback_url: None,
            upstream_proxy: UpstreamProxyConfig::default(),
        }
    }
}

fn default_port() -> u16 {
    3000
}

fn default_request_timeout() -> u64 {
    120
}

impl ProxyConfig {
    pub fn get_bind_address(&self) -> &str {
        if self.allow_lan_access {
            "0.0.0.0"
        } else {
            "127.0.0.1"
        }
    }
}

impl UpstreamProxyConfig {
    /// Builds the forward proxy from `PROXY_*` variables, preferring the
    /// `REACT_APP_` prefixed ones. Host and port are both required.
    pub fn from_lookup<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("REACT_APP_{}", name)).or_else(|| lookup(name));

        let host = var("PROXY_HOST")?;
        let port = var("PROXY_PORT")?;
        let url = match (var("PROXY_USERNAME"), var("PROXY_PASSWORD")) {
            (Some(user), Some(pass)) => format!("http://{}:{}@{}:{}", user, pass, host, port),
            _ => format!("http://{}:{}", host, port),
        };

        Some(Self { enabled: true, url })
    }

    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }
}

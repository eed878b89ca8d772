use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, CONTENT_TYPE};

use crate::error::{AppError, AppResult};

static DOMO_ROUTES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"^/domo/.+/v\d",
        r"^/data/v\d/.+",
        r"^/dql/v\d/.+",
        r"^/sql/v\d/.+",
        r"^/api/.+",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

static INSTANCE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^[-_\w]+\.(.+)$").ok());

/// Whether `url` is one of the instance APIs the proxy forwards.
pub fn is_domo_request(url: Option<&str>) -> bool {
    match url {
        Some(url) => DOMO_ROUTES.iter().any(|route| route.is_match(url)),
        None => false,
    }
}

pub fn is_multipart_request(headers: &HeaderMap) -> bool {
    headers.get_all(CONTENT_TYPE).iter().any(|value| {
        value
            .to_str()
            .map(|v| v.to_ascii_lowercase().contains("multipart"))
            .unwrap_or(false)
    })
}

/// Environment part of an instance: `acme.dev.domo.com` -> `dev.domo.com`.
pub fn get_env(instance: &str) -> AppResult<String> {
    INSTANCE
        .as_ref()
        .and_then(|re| re.captures(instance))
        .and_then(|caps| caps.get(1))
        .map(|env| env.as_str().to_string())
        .ok_or_else(|| AppError::InstanceFormat(instance.to_string()))
}

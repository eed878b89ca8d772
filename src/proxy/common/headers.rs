// Header reshaping for outbound requests

use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, HOST,
    PROXY_AUTHORIZATION, REFERER, TE, TRAILER, TRANSFER_ENCODING, UPGRADE,
};

use crate::error::{AppError, AppResult};
use crate::models::OauthToken;

/// Referer used when the browser did not send one.
pub const DEFAULT_REFERER: &str = "http://localhost:3000/";
/// Query the instance expects on an app referer.
pub const DEFAULT_REFERER_QUERY: &str = "userId=27&customer=dev&locale=en-US&platform=desktop";
pub const OAUTH_ACCESS_COOKIE: &str = "_daatv1";
pub const OAUTH_REFRESH_COOKIE: &str = "_dartv1";

/// Dropped from every forwarded request. `content-length` is recomputed for
/// the outbound body.
const ALWAYS_STRIPPED: [HeaderName; 9] = [
    HOST,
    COOKIE,
    CONTENT_LENGTH,
    CONNECTION,
    TRANSFER_ENCODING,
    TE,
    TRAILER,
    UPGRADE,
    PROXY_AUTHORIZATION,
];

/// Dropped from upstream responses before they are streamed back.
pub const HOP_BY_HOP: [HeaderName; 6] = [
    CONNECTION,
    TRANSFER_ENCODING,
    TE,
    TRAILER,
    UPGRADE,
    PROXY_AUTHORIZATION,
];

/// Copy of `headers` without the deny-listed entries. Multipart requests also
/// lose `content-type` since the rebuilt form sets its own boundary.
pub fn filter_headers(headers: &HeaderMap, multipart: bool) -> HeaderMap {
    let mut filtered = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if ALWAYS_STRIPPED.contains(name) || (multipart && *name == CONTENT_TYPE) {
            continue;
        }
        filtered.append(name.clone(), value.clone());
    }
    // keep-alive has no typed constant
    filtered.remove("keep-alive");
    filtered
}

/// Referer sent upstream. A referer that already has a query is left alone
/// unless `context_id` is given, in which case `context=<id>` is appended.
pub fn build_referer(original: Option<&str>, context_id: Option<&str>) -> String {
    let referer = original.unwrap_or(DEFAULT_REFERER);
    let mut referer = if referer.contains('?') {
        referer.to_string()
    } else {
        format!("{}?{}", referer, DEFAULT_REFERER_QUERY)
    };

    if let Some(id) = context_id {
        referer.push_str("&context=");
        referer.push_str(id);
    }
    referer
}

/// All inbound `cookie` headers as one value.
pub fn forwarded_cookie(headers: &HeaderMap) -> Option<String> {
    let parts: Vec<&str> = headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("; "))
    }
}

pub fn oauth_cookie(token: &OauthToken) -> String {
    format!(
        "{}={}; {}={}",
        OAUTH_ACCESS_COOKIE, token.access, OAUTH_REFRESH_COOKIE, token.refresh
    )
}

/// Inbound cookies followed by the OAuth cookies, when either exists.
pub fn merge_cookies(forwarded: Option<String>, oauth: Option<&OauthToken>) -> Option<String> {
    match (forwarded, oauth.map(oauth_cookie)) {
        (Some(forwarded), Some(oauth)) => Some(format!("{}; {}", forwarded, oauth)),
        (Some(cookie), None) | (None, Some(cookie)) => Some(cookie),
        (None, None) => None,
    }
}

pub fn header_value(value: &str) -> AppResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| AppError::Config(format!("Invalid header value {:?}: {}", value, e)))
}

/// The inbound referer, if it is valid text.
pub fn inbound_referer(headers: &HeaderMap) -> Option<&str> {
    headers.get(REFERER).and_then(|v| v.to_str().ok())
}

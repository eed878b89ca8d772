//! Builds outbound requests for the instance from inbound app requests.
//!
//! A [`Transport`] resolves its login, instance client, apps domain and OAuth
//! tokens at most once, on first use. Every [`Transport::build`] creates a
//! fresh audit context on the instance.

use axum::body::Bytes;
use axum::extract::{FromRequest, Request};
use reqwest::header::{HeaderMap, COOKIE, REFERER};
use reqwest::{Method, Response};
use serde_json::Value;
use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::models::{
    ContextRequest, DomainInfo, LoginRecord, Manifest, OauthToken, OutboundBody, ProxyContext,
    RequestOptions,
};
use crate::modules::credentials::CredentialProvider;
use crate::proxy::common::headers::{
    build_referer, filter_headers, forwarded_cookie, header_value, inbound_referer, merge_cookies,
};
use crate::proxy::common::once::Resolved;
use crate::proxy::common::routes;
use crate::proxy::upstream::client::{ClientFactory, DomoClient};

/// Body already decoded by an earlier layer; put it in the request extensions.
#[derive(Debug, Clone)]
pub struct ParsedBody(pub Value);

pub enum InboundBody {
    Parsed(Value),
    /// Unread request; its body is read within the request's `DefaultBodyLimit`.
    Stream(Request),
    Empty,
}

/// The parts of an inbound request the transport needs.
pub struct InboundRequest {
    pub method: Method,
    /// Path and query, e.g. `/data/v1/sales?sum=amount`
    pub uri: String,
    pub headers: HeaderMap,
    pub body: InboundBody,
}

impl InboundRequest {
    pub fn from_request(request: Request) -> Self {
        let method = request.method().clone();
        let uri = path_and_query(request.uri());
        let headers = request.headers().clone();
        let body = match request.extensions().get::<ParsedBody>() {
            Some(ParsedBody(value)) => InboundBody::Parsed(value.clone()),
            None => InboundBody::Stream(request),
        };

        Self {
            method,
            uri,
            headers,
            body,
        }
    }
}

pub fn path_and_query(uri: &axum::http::Uri) -> String {
    uri.path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string())
}

pub struct Transport {
    manifest: Manifest,
    proxy_context_id: String,
    append_context_to_referer: bool,
    credentials: Arc<dyn CredentialProvider>,
    clients: Arc<dyn ClientFactory>,
    login: Resolved<LoginRecord>,
    client: Resolved<Arc<dyn DomoClient>>,
    domain: Resolved<DomainInfo>,
    oauth: Resolved<Option<OauthToken>>,
}

impl Transport {
    /// Never fails: credentials are only read when first needed.
    pub fn new(
        manifest: Manifest,
        credentials: Arc<dyn CredentialProvider>,
        clients: Arc<dyn ClientFactory>,
    ) -> Self {
        let proxy_context_id = manifest
            .proxy_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Self {
            manifest,
            proxy_context_id,
            append_context_to_referer: false,
            credentials,
            clients,
            login: Resolved::new(),
            client: Resolved::new(),
            domain: Resolved::new(),
            oauth: Resolved::new(),
        }
    }

    /// Append `context=<id>` to every referer.
    pub fn with_referer_context(mut self, enabled: bool) -> Self {
        self.append_context_to_referer = enabled;
        self
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn proxy_context_id(&self) -> &str {
        &self.proxy_context_id
    }

    pub fn is_domo_request(&self, url: Option<&str>) -> bool {
        routes::is_domo_request(url)
    }

    pub fn is_multipart_request(&self, headers: &HeaderMap) -> bool {
        routes::is_multipart_request(headers)
    }

    pub async fn login(&self) -> AppResult<LoginRecord> {
        self.login
            .get_or_resolve(|| async {
                let login = self.credentials.most_recent_login().await?;
                tracing::info!("Proxying as {}", login.instance);
                Ok(login)
            })
            .await
    }

    pub async fn client(&self) -> AppResult<Arc<dyn DomoClient>> {
        self.client
            .get_or_resolve(|| async { self.clients.connect(self.login().await?) })
            .await
    }

    /// Apps domain, looked up once. When the lookup fails the domain is derived
    /// from the instance name instead.
    pub async fn domain(&self) -> AppResult<DomainInfo> {
        self.domain
            .get_or_resolve(|| async {
                let client = self.client().await?;
                let url = match client.environment().await {
                    Ok(env) => format!("https://{}.{}", self.proxy_context_id, env.domoapps_domain),
                    Err(e) => {
                        tracing::warn!("Environment lookup failed, deriving apps domain: {}", e);
                        format!(
                            "https://{}.domoapps.{}",
                            self.proxy_context_id,
                            routes::get_env(client.instance())?
                        )
                    }
                };
                tracing::info!("Apps domain resolved: {}", url);
                Ok(DomainInfo { url })
            })
            .await
    }

    /// OAuth tokens for the manifest's scopes, when OAuth is enabled.
    pub async fn oauth_tokens(&self) -> AppResult<Option<OauthToken>> {
        self.oauth
            .get_or_resolve(|| async {
                let Some(scopes) = self.manifest.oauth_scopes() else {
                    return Ok(None);
                };
                let login = self.login().await?;
                let token = self
                    .credentials
                    .oauth_token(&login.instance, &self.proxy_context_id, scopes)
                    .await?;
                if token.is_none() {
                    tracing::warn!(
                        "OAuth is enabled but no tokens are stored for scopes {:?}",
                        scopes
                    );
                }
                Ok(token)
            })
            .await
    }

    pub async fn create_context(&self) -> AppResult<ProxyContext> {
        let client = self.client().await?;
        let request = ContextRequest {
            design_id: self.manifest.id.clone(),
            mapping: self.manifest.mapping.clone(),
        };

        client
            .create_context(&request)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Upstream {
                status: None,
                body: None,
                message: "The instance did not return an app context".to_string(),
            })
    }

    /// Forwarded headers with the referer and cookies the instance expects.
    pub async fn prepare_headers(
        &self,
        headers: &HeaderMap,
        context: &ProxyContext,
    ) -> AppResult<HeaderMap> {
        let multipart = self.is_multipart_request(headers);
        let mut prepared = filter_headers(headers, multipart);

        let context_id = self
            .append_context_to_referer
            .then_some(context.id.as_str());
        let referer = build_referer(inbound_referer(headers), context_id);
        prepared.insert(REFERER, header_value(&referer)?);

        let oauth = self.oauth_tokens().await?;
        if let Some(cookie) = merge_cookies(forwarded_cookie(headers), oauth.as_ref()) {
            prepared.insert(COOKIE, header_value(&cookie)?);
        }

        Ok(prepared)
    }

    /// Full outbound request for a proxied route.
    ///
    /// Rejects routes that [`Transport::is_domo_request`] does not accept.
    pub async fn build(&self, request: InboundRequest) -> AppResult<RequestOptions> {
        let InboundRequest {
            method,
            uri,
            headers,
            body,
        } = request;

        let target = self.target(&uri, &headers);
        let (target, body) = tokio::join!(target, parse_body(body));
        let (url, headers) = target?;

        Ok(RequestOptions {
            url,
            method,
            headers,
            body: body.map(OutboundBody::Text),
            use_upstream_proxy: true,
        })
    }

    /// Like [`Transport::build`] but without a body, for requests whose body
    /// the caller rebuilds itself.
    pub async fn build_basic(
        &self,
        method: Method,
        uri: String,
        headers: HeaderMap,
    ) -> AppResult<RequestOptions> {
        let (url, headers) = self.target(&uri, &headers).await?;

        Ok(RequestOptions {
            url,
            method,
            headers,
            body: None,
            use_upstream_proxy: false,
        })
    }

    async fn target(&self, uri: &str, headers: &HeaderMap) -> AppResult<(String, HeaderMap)> {
        if !self.is_domo_request(Some(uri)) {
            return Err(AppError::InvalidEndpoint(uri.to_string()));
        }

        let domain = self.domain().await?;
        let context = self.create_context().await?;
        let headers = self.prepare_headers(headers, &context).await?;

        Ok((format!("{}{}", domain.url, uri), headers))
    }

    pub async fn request(&self, options: RequestOptions) -> AppResult<Response> {
        self.client().await?.send(options).await
    }
}

/// Inbound body as text. Read failures give `None`; the request still goes out.
pub async fn parse_body(body: InboundBody) -> Option<String> {
    match body {
        InboundBody::Parsed(Value::String(text)) => Some(text),
        InboundBody::Parsed(value) => Some(value.to_string()),
        InboundBody::Stream(request) => match Bytes::from_request(request, &()).await {
            Ok(bytes) if bytes.is_empty() => None,
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(rejection) => {
                tracing::warn!(
                    "Failed to read request body, forwarding without it: {}",
                    rejection.body_text()
                );
                None
            }
        },
        InboundBody::Empty => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::credentials::StaticCredentialProvider;
    use axum::body::Body;
    use crate::proxy::upstream::client::EnvironmentInfo;
    use async_trait::async_trait;
    use reqwest::header::HeaderValue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const DOMAIN: &str = "domoapps.dev2.domo.com";

    #[derive(Default)]
    struct Calls {
        environment: AtomicUsize,
        contexts: AtomicUsize,
        connects: AtomicUsize,
        context_requests: Mutex<Vec<ContextRequest>>,
    }

    struct FakeClient {
        instance: String,
        calls: Arc<Calls>,
        environment_fails: bool,
        context_fails: bool,
    }

    #[async_trait]
    impl DomoClient for FakeClient {
        fn instance(&self) -> &str {
            &self.instance
        }

        async fn environment(&self) -> AppResult<EnvironmentInfo> {
            self.calls.environment.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.environment_fails {
                return Err(AppError::Upstream {
                    status: Some(503),
                    body: None,
                    message: "503 Service Unavailable".into(),
                });
            }
            Ok(EnvironmentInfo {
                domoapps_domain: DOMAIN.into(),
            })
        }

        async fn create_context(&self, request: &ContextRequest) -> AppResult<Vec<ProxyContext>> {
            let n = self.calls.contexts.fetch_add(1, Ordering::SeqCst);
            self.calls
                .context_requests
                .lock()
                .unwrap()
                .push(request.clone());
            if self.context_fails {
                return Err(AppError::Upstream {
                    status: Some(403),
                    body: Some(serde_json::json!({"message": "design not found"})),
                    message: "403 Forbidden".into(),
                });
            }
            Ok(vec![ProxyContext {
                id: format!("fake-context-{}", n),
            }])
        }

        async fn send(&self, _options: RequestOptions) -> AppResult<Response> {
            unreachable!("transport tests never send")
        }
    }

    #[derive(Default)]
    struct FakeFactory {
        calls: Arc<Calls>,
        environment_fails: bool,
        context_fails: bool,
    }

    impl ClientFactory for FakeFactory {
        fn connect(&self, login: LoginRecord) -> AppResult<Arc<dyn DomoClient>> {
            self.calls.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(FakeClient {
                instance: login.instance,
                calls: self.calls.clone(),
                environment_fails: self.environment_fails,
                context_fails: self.context_fails,
            }))
        }
    }

    fn manifest() -> Manifest {
        Manifest {
            id: Some("test-id".into()),
            name: "test-app".into(),
            version: "1.0.0".into(),
            proxy_id: Some("proxy-1".into()),
            ..Manifest::default()
        }
    }

    fn login(instance: &str) -> LoginRecord {
        LoginRecord {
            instance: instance.into(),
            refresh_token: Some("refresh".into()),
            dev_token: false,
        }
    }

    fn transport_with(
        manifest: Manifest,
        credentials: StaticCredentialProvider,
        factory: FakeFactory,
    ) -> Transport {
        Transport::new(manifest, Arc::new(credentials), Arc::new(factory))
    }

    fn transport(factory: FakeFactory) -> Transport {
        transport_with(
            manifest(),
            StaticCredentialProvider::new(login("test.dev.domo.com")),
            factory,
        )
    }

    fn request(
        uri: &str,
        headers: &[(&'static str, &'static str)],
        body: InboundBody,
    ) -> InboundRequest {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.append(*name, HeaderValue::from_static(*value));
        }
        InboundRequest {
            method: Method::GET,
            uri: uri.to_string(),
            headers: map,
            body,
        }
    }

    #[tokio::test]
    async fn test_build_full_url_and_method() {
        let transport = transport(FakeFactory::default());
        let mut req = request(
            "/data/v1/test?fields=field1,field2&avg=field2",
            &[("referer", "test.test?userId=27")],
            InboundBody::Empty,
        );
        req.method = Method::PATCH;

        let options = transport.build(req).await.unwrap();
        assert_eq!(
            options.url,
            format!("https://proxy-1.{}/data/v1/test?fields=field1,field2&avg=field2", DOMAIN)
        );
        assert_eq!(options.method, Method::PATCH);
        assert!(options.use_upstream_proxy);
        assert!(options.body.is_none());
    }

    #[tokio::test]
    async fn test_build_passes_through_other_headers() {
        let transport = transport(FakeFactory::default());
        let req = request(
            "/data/v1/valid",
            &[
                ("referer", "test.test?userId=27"),
                ("accept", "application/json"),
                ("x-custom-header", "hello"),
                ("host", "localhost:3000"),
            ],
            InboundBody::Empty,
        );

        let options = transport.build(req).await.unwrap();
        assert_eq!(options.headers.get("accept").unwrap(), "application/json");
        assert_eq!(options.headers.get("X-Custom-Header").unwrap(), "hello");
        assert_eq!(options.headers.get(REFERER).unwrap(), "test.test?userId=27");
        assert!(options.headers.get("host").is_none());
        assert!(options.headers.get(COOKIE).is_none());
    }

    #[tokio::test]
    async fn test_referer_without_query_gets_defaults() {
        let transport = transport(FakeFactory::default());
        let req = request(
            "/domo/users/v1",
            &[("referer", "http://localhost:3000/index.html")],
            InboundBody::Empty,
        );

        let options = transport.build(req).await.unwrap();
        assert_eq!(
            options.headers.get(REFERER).unwrap(),
            "http://localhost:3000/index.html?userId=27&customer=dev&locale=en-US&platform=desktop"
        );

        let missing = transport.build(request("/domo/users/v1", &[], InboundBody::Empty)).await.unwrap();
        assert!(missing
            .headers
            .get(REFERER)
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("http://localhost:3000/?userId=27"));
    }

    #[tokio::test]
    async fn test_referer_context_flag() {
        let transport = transport(FakeFactory::default()).with_referer_context(true);
        let req = request("/data/v1/valid", &[("referer", "test.test?userId=27")], InboundBody::Empty);

        let options = transport.build(req).await.unwrap();
        assert_eq!(
            options.headers.get(REFERER).unwrap(),
            "test.test?userId=27&context=fake-context-0"
        );
    }

    #[tokio::test]
    async fn test_oauth_cookies_merged_with_forwarded_cookie() {
        let mut manifest = manifest();
        manifest.o_auth_enabled = Some(true);
        manifest.scopes = Some(vec!["data".into()]);
        let credentials = StaticCredentialProvider::new(login("test.dev.domo.com")).with_oauth_token(
            OauthToken {
                access: "acc-1".into(),
                refresh: "ref-1".into(),
            },
        );
        let transport = transport_with(manifest, credentials, FakeFactory::default());

        let req = request(
            "/data/v1/valid",
            &[("cookie", "DA-SID=abc"), ("cookie", "theme=dark")],
            InboundBody::Empty,
        );
        let options = transport.build(req).await.unwrap();
        assert_eq!(
            options.headers.get(COOKIE).unwrap(),
            "DA-SID=abc; theme=dark; _daatv1=acc-1; _dartv1=ref-1"
        );
        assert_eq!(options.headers.get_all(COOKIE).iter().count(), 1);

        let bare = transport.build(request("/data/v1/valid", &[], InboundBody::Empty)).await.unwrap();
        assert_eq!(bare.headers.get(COOKIE).unwrap(), "_daatv1=acc-1; _dartv1=ref-1");
    }

    #[tokio::test]
    async fn test_oauth_tokens_ignored_when_disabled() {
        let credentials = StaticCredentialProvider::new(login("test.dev.domo.com")).with_oauth_token(
            OauthToken {
                access: "acc".into(),
                refresh: "ref".into(),
            },
        );
        let transport = transport_with(manifest(), credentials, FakeFactory::default());
        assert_eq!(transport.oauth_tokens().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_forward_parsed_json_payload() {
        let transport = transport(FakeFactory::default());
        let body = serde_json::json!({"name": "json", "message": "should not get mutated"});
        let mut req = request(
            "/data/v1/valid",
            &[("content-type", "application/json")],
            InboundBody::Parsed(body.clone()),
        );
        req.method = Method::POST;

        let options = transport.build(req).await.unwrap();
        assert_eq!(options.text_body(), Some(body.to_string().as_str()));
        assert_eq!(options.headers.get("content-type").unwrap(), "application/json");
    }

    #[tokio::test]
    async fn test_forward_parsed_string_and_raw_text_payload() {
        let transport = transport(FakeFactory::default());

        let parsed = request(
            "/data/v1/valid",
            &[],
            InboundBody::Parsed(Value::String("example,csv,string".into())),
        );
        let options = transport.build(parsed).await.unwrap();
        assert_eq!(options.text_body(), Some("example,csv,string"));

        let raw = request(
            "/data/v1/valid",
            &[("content-type", "text/csv")],
            InboundBody::Stream(Request::new(Body::from("example,csv,string"))),
        );
        let options = transport.build(raw).await.unwrap();
        assert_eq!(options.text_body(), Some("example,csv,string"));
    }

    #[tokio::test]
    async fn test_body_read_error_yields_no_body() {
        let chunks: Vec<Result<bytes::Bytes, std::io::Error>> = vec![
            Ok(bytes::Bytes::from_static(b"partial")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ];
        let body = Body::from_stream(futures::stream::iter(chunks));

        assert_eq!(parse_body(InboundBody::Stream(Request::new(body))).await, None);
    }

    #[tokio::test]
    async fn test_body_over_limit_yields_no_body() {
        // Without a DefaultBodyLimit layer axum's 2 MiB default applies
        let oversized = Request::new(Body::from("x".repeat(3 * 1024 * 1024)));
        assert_eq!(parse_body(InboundBody::Stream(oversized)).await, None);
    }

    #[tokio::test]
    async fn test_multipart_build_basic_strips_content_type() {
        let transport = transport(FakeFactory::default());
        let req = request(
            "/data/v1/sales?sum=x",
            &[
                ("content-type", "multipart/form-data; boundary=abc"),
                ("content-length", "1234"),
                ("accept", "*/*"),
            ],
            InboundBody::Empty,
        );

        let options = transport
            .build_basic(req.method, req.uri, req.headers)
            .await
            .unwrap();
        assert!(options.headers.get("content-type").is_none());
        assert!(options.headers.get("content-length").is_none());
        assert!(!options.use_upstream_proxy);
        assert!(options.body.is_none());
        assert!(options.url.ends_with("/data/v1/sales?sum=x"));
    }

    #[test]
    fn test_build_futures_are_send() {
        fn assert_send<T: Send>(_: &T) {}

        let transport = transport(FakeFactory::default());
        let streamed = InboundRequest::from_request(Request::new(Body::from("a,b")));
        let build = transport.build(streamed);
        assert_send(&build);

        let basic = transport.build_basic(Method::POST, "/data/v1/x".into(), HeaderMap::new());
        assert_send(&basic);
    }

    #[tokio::test]
    async fn test_resolves_once_and_creates_context_per_request() {
        let factory = FakeFactory::default();
        let calls = factory.calls.clone();
        let transport = Arc::new(transport(factory));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let transport = transport.clone();
            handles.push(tokio::spawn(async move {
                transport
                    .build(request("/data/v1/valid", &[], InboundBody::Empty))
                    .await
                    .map(|options| options.url)
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().unwrap().starts_with("https://proxy-1."));
        }

        assert_eq!(calls.connects.load(Ordering::SeqCst), 1);
        assert_eq!(calls.environment.load(Ordering::SeqCst), 1);
        assert_eq!(calls.contexts.load(Ordering::SeqCst), 5);

        let requests = calls.context_requests.lock().unwrap();
        assert_eq!(requests[0].design_id.as_deref(), Some("test-id"));
    }

    #[tokio::test]
    async fn test_domain_falls_back_to_instance_env() {
        let transport = transport(FakeFactory {
            environment_fails: true,
            ..FakeFactory::default()
        });

        let domain = transport.domain().await.unwrap();
        assert_eq!(domain.url, "https://proxy-1.domoapps.dev.domo.com");
    }

    #[tokio::test]
    async fn test_domain_fallback_rejects_malformed_instance() {
        let transport = transport_with(
            manifest(),
            StaticCredentialProvider::new(login("localhost")),
            FakeFactory {
                environment_fails: true,
                ..FakeFactory::default()
            },
        );

        let err = transport.domain().await.unwrap_err();
        assert!(err.to_string().contains("Invalid instance 'localhost'"));
    }

    #[tokio::test]
    async fn test_missing_refresh_token_rejects_every_dependent() {
        let mut manifest = manifest();
        manifest.o_auth_enabled = Some(true);
        manifest.scopes = Some(vec!["data".into()]);
        let factory = FakeFactory::default();
        let calls = factory.calls.clone();

        // Construction itself must not fail
        let transport = transport_with(
            manifest,
            StaticCredentialProvider::new(LoginRecord {
                instance: "test.dev.domo.com".into(),
                refresh_token: None,
                dev_token: false,
            }),
            factory,
        );

        for err in [
            transport.login().await.unwrap_err(),
            transport.client().await.err().unwrap(),
            transport.domain().await.unwrap_err(),
            transport.oauth_tokens().await.unwrap_err(),
            transport
                .build(request("/data/v1/valid", &[], InboundBody::Empty))
                .await
                .unwrap_err(),
        ] {
            assert!(err.to_string().contains("Not authenticated"), "{err}");
        }
        assert_eq!(calls.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_context_failure_rejects_build() {
        let transport = transport(FakeFactory {
            context_fails: true,
            ..FakeFactory::default()
        });

        let err = transport
            .build(request("/data/v1/valid", &[], InboundBody::Empty))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(403));
    }

    #[tokio::test]
    async fn test_build_rejects_unproxied_route() {
        let factory = FakeFactory::default();
        let calls = factory.calls.clone();
        let transport = transport(factory);

        let err = transport
            .build(request("/bad/url", &[], InboundBody::Empty))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidEndpoint(_)));
        assert_eq!(calls.connects.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_proxy_context_defaults_to_uuid() {
        let mut manifest = manifest();
        manifest.proxy_id = None;
        let transport = transport_with(
            manifest,
            StaticCredentialProvider::new(login("test.dev.domo.com")),
            FakeFactory::default(),
        );
        assert!(uuid::Uuid::parse_str(transport.proxy_context_id()).is_ok());
    }
}

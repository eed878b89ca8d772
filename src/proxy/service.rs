// Proxy entry points: axum middleware body and raw stream

use axum::body::Body;
use axum::extract::{FromRequest, Multipart, Request};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use reqwest::multipart::{Form, Part};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, AppResult};
use crate::models::{DomainInfo, Manifest, OutboundBody};
use crate::modules::credentials::CredentialProvider;
use crate::proxy::common::headers::HOP_BY_HOP;
use crate::proxy::config::ProxyConfig;
use crate::proxy::exception::DomoException;
use crate::proxy::transport::{path_and_query, InboundRequest, Transport};
use crate::proxy::upstream::client::HttpClientFactory;

/// File part of a multipart upload, buffered on disk. The file is deleted
/// when this is dropped.
#[derive(Debug)]
struct BufferedUpload {
    field_name: String,
    file_name: String,
    content_type: Option<String>,
    path: TempPath,
}

#[derive(Debug, Default)]
struct BufferedForm {
    file: Option<BufferedUpload>,
    fields: Vec<(String, String)>,
}

#[derive(Clone)]
pub struct DomoProxy {
    transport: Arc<Transport>,
}

impl DomoProxy {
    pub fn new(transport: Transport) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }

    /// Proxy talking to the real instance, honoring timeouts, the upstream
    /// network proxy and the referer flag from `config`.
    pub fn from_config(
        manifest: Manifest,
        config: &ProxyConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        let upstream = config
            .upstream_proxy
            .enabled
            .then(|| config.upstream_proxy.clone());
        let clients = HttpClientFactory::new(config.request_timeout, upstream);
        let transport = Transport::new(manifest, credentials, Arc::new(clients))
            .with_referer_context(config.append_context_to_referer);
        Self::new(transport)
    }

    /// Resolves the login and apps domain ahead of the first request.
    pub async fn warm_up(&self) -> AppResult<DomainInfo> {
        self.transport.domain().await
    }

    /// Proxies instance routes and hands everything else to `next`.
    pub async fn middleware(&self, request: Request, next: Next) -> Response {
        let url = path_and_query(request.uri());
        if !self.transport.is_domo_request(Some(&url)) {
            return next.run(request).await;
        }

        tracing::info!("Proxying {} {}", request.method(), url);
        let result = if self.transport.is_multipart_request(request.headers()) {
            self.forward_multipart(request).await
        } else {
            self.forward(request).await
        };

        match result {
            Ok(upstream) => into_response(upstream),
            Err(e) => {
                tracing::error!("Proxy request {} failed: {}", url, e);
                DomoException::new(&e, url).into_response()
            }
        }
    }

    /// Upstream response for an instance route, or `None` for any other route.
    pub async fn stream(&self, request: Request) -> AppResult<Option<reqwest::Response>> {
        let url = path_and_query(request.uri());
        if !self.transport.is_domo_request(Some(&url)) {
            return Ok(None);
        }
        self.forward(request).await.map(Some)
    }

    async fn forward(&self, request: Request) -> AppResult<reqwest::Response> {
        let options = self
            .transport
            .build(InboundRequest::from_request(request))
            .await?;
        self.transport.request(options).await
    }

    async fn forward_multipart(&self, request: Request) -> AppResult<reqwest::Response> {
        let method = request.method().clone();
        let uri = path_and_query(request.uri());
        let headers = request.headers().clone();

        let BufferedForm { file, fields } = buffer_form(request).await?;
        let mut options = self.transport.build_basic(method, uri, headers).await?;

        let mut form = Form::new();
        for (name, value) in fields {
            form = form.text(name, value);
        }
        if let Some(upload) = &file {
            let content = tokio::fs::File::open(&upload.path).await?;
            let length = content.metadata().await?.len();

            let mut part = Part::stream_with_length(reqwest::Body::from(content), length)
                .file_name(upload.file_name.clone());
            if let Some(content_type) = upload.content_type.as_deref() {
                part = part.mime_str(content_type)?;
            }
            form = form.part(upload.field_name.clone(), part);
        }
        options.body = Some(OutboundBody::Multipart(form));

        let response = self.transport.request(options).await;
        // Keep the buffered file until the form has been sent
        drop(file);
        response
    }
}

/// Reads the multipart body, writing the uploaded file to the temp dir.
async fn buffer_form(request: Request) -> AppResult<BufferedForm> {
    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| AppError::Multipart(e.body_text()))?;

    let mut form = BufferedForm::default();
    while let Some(mut field) = multipart.next_field().await? {
        let field_name = field.name().unwrap_or("file").to_string();

        let Some(file_name) = field.file_name().map(base_name) else {
            let value = field.text().await?;
            form.fields.push((field_name, value));
            continue;
        };

        if form.file.is_some() {
            tracing::warn!("Only one file per upload is forwarded, skipping {}", file_name);
            continue;
        }

        let path = tempfile::Builder::new()
            .prefix("ryuu-proxy-")
            .suffix(&format!("-{}", file_name))
            .tempfile()?
            .into_temp_path();
        let content_type = field.content_type().map(str::to_string);

        let mut file = tokio::fs::File::create(&path).await?;
        while let Some(chunk) = field.chunk().await? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        tracing::debug!("Buffered upload {} to {:?}", file_name, path);

        form.file = Some(BufferedUpload {
            field_name,
            file_name,
            content_type,
            path,
        });
    }

    Ok(form)
}

/// Last path component of a client supplied file name.
fn base_name(name: &str) -> String {
    Path::new(&name.replace('\\', "/"))
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .unwrap_or("upload")
        .to_string()
}

/// Streams an upstream response back unchanged, minus hop-by-hop headers.
pub fn into_response(upstream: reqwest::Response) -> Response {
    let mut builder = Response::builder().status(upstream.status());
    if let Some(headers) = builder.headers_mut() {
        for (name, value) in upstream.headers() {
            if !HOP_BY_HOP.contains(name) {
                headers.append(name.clone(), value.clone());
            }
        }
    }

    builder
        .body(Body::from_stream(upstream.bytes_stream()))
        .unwrap_or_else(|e| {
            tracing::error!("Failed to build proxied response: {}", e);
            StatusCode::BAD_GATEWAY.into_response()
        })
}

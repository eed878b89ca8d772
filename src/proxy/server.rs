use crate::proxy::config::ProxyConfig;
use crate::proxy::service::{into_response, DomoProxy};
use crate::proxy::transport::path_and_query;
use crate::utils::http::create_client_with_proxy;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, FromRequest, Request, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use std::sync::Arc;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

/// Local server non-proxied requests are forwarded to.
pub struct Fallback {
    base_url: String,
    client: reqwest::Client,
}

/// Axum application state
#[derive(Clone)]
pub struct AppState {
    pub fallback: Option<Arc<Fallback>>,
}

/// Axum server instance
pub struct AxumServer {
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl AxumServer {
    /// Router with the proxy middleware in front of the health check and the
    /// fallback route.
    pub fn router(config: &ProxyConfig, proxy: DomoProxy) -> Result<Router, String> {
        let fallback = match config.fallback_url.as_deref() {
            Some(url) => {
                let client = create_client_with_proxy(config.request_timeout, None)
                    .map_err(|e| format!("Failed to create fallback client: {}", e))?;
                tracing::info!("Non-proxied requests go to {}", url);
                Some(Arc::new(Fallback {
                    base_url: url.trim_end_matches('/').to_string(),
                    client,
                }))
            }
            None => None,
        };

        Ok(Router::new()
            .route("/healthz", get(health_check_handler))
            .fallback(fallback_handler)
            .layer(axum::middleware::from_fn_with_state(
                proxy,
                crate::proxy::middleware::proxy_middleware,
            ))
            .layer(DefaultBodyLimit::max(100 * 1024 * 1024))
            .layer(TraceLayer::new_for_http())
            .layer(crate::proxy::middleware::cors_layer())
            .with_state(AppState { fallback }))
    }

    /// Start Axum server
    pub async fn start(
        config: &ProxyConfig,
        proxy: DomoProxy,
    ) -> Result<(Self, tokio::task::JoinHandle<()>), String> {
        let app = Self::router(config, proxy)?;

        // Bind address
        let addr = format!("{}:{}", config.get_bind_address(), config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| format!("Failed to bind address {}: {}", addr, e))?;

        tracing::info!("Domo proxy listening at http://{}", addr);

        // Create shutdown channel
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let server_instance = Self {
            shutdown_tx: Some(shutdown_tx),
        };

        // Start server in new task
        let handle = tokio::spawn(async move {
            use hyper::server::conn::http1;
            use hyper_util::rt::TokioIo;
            use hyper_util::service::TowerToHyperService;

            loop {
                tokio::select! {
                    res = listener.accept() => {
                        match res {
                            Ok((stream, _)) => {
                                let io = TokioIo::new(stream);
                                let service = TowerToHyperService::new(app.clone());

                                tokio::task::spawn(async move {
                                    if let Err(err) = http1::Builder::new()
                                        .serve_connection(io, service)
                                        .with_upgrades()
                                        .await
                                    {
                                        debug!("Connection handling finished or errored: {:?}", err);
                                    }
                                });
                            }
                            Err(e) => {
                                error!("Failed to accept connection: {:?}", e);
                            }
                        }
                    }
                    _ = &mut shutdown_rx => {
                        tracing::info!("Domo proxy stopped listening");
                        break;
                    }
                }
            }
        });

        Ok((server_instance, handle))
    }

    /// Stop server
    pub fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Health check handler
async fn health_check_handler() -> Response {
    Json(serde_json::json!({
        "status": "ok"
    }))
    .into_response()
}

/// Relays anything the proxy did not claim to the configured local server.
async fn fallback_handler(State(state): State<AppState>, request: Request) -> Response {
    let Some(fallback) = state.fallback else {
        return (StatusCode::NOT_FOUND, "Not found").into_response();
    };

    let url = format!("{}{}", fallback.base_url, path_and_query(request.uri()));
    let method = request.method().clone();
    let mut headers = request.headers().clone();
    headers.remove(axum::http::header::HOST);

    // Bounded by the router's DefaultBodyLimit
    let body = match Bytes::from_request(request, &()).await {
        Ok(bytes) => bytes,
        Err(rejection) => return rejection.into_response(),
    };

    let result = fallback
        .client
        .request(method, &url)
        .headers(headers)
        .body(body)
        .send()
        .await;

    match result {
        Ok(response) => into_response(response),
        Err(e) => {
            error!("Fallback request to {} failed: {}", url, e);
            (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
        }
    }
}

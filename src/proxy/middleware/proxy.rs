use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::proxy::service::DomoProxy;

/// Forwards instance routes to the apps domain; every other route reaches `next`.
pub async fn proxy_middleware(
    State(proxy): State<DomoProxy>,
    request: Request,
    next: Next,
) -> Response {
    proxy.middleware(request, next).await
}

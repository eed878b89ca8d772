// Middleware module - Axum middleware

pub mod cors;
pub mod proxy;

pub use cors::cors_layer;
pub use proxy::proxy_middleware;

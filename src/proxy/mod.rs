// proxy module - Domo instance reverse proxy

pub mod common;
pub mod config;
pub mod exception;
pub mod middleware; // Axum middleware
pub mod server;
pub mod service;
pub mod transport;
pub mod upstream; // Instance client

pub use config::ProxyConfig;
pub use exception::DomoException;
pub use server::AxumServer;
pub use service::DomoProxy;
pub use transport::Transport;

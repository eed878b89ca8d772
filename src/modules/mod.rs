pub mod config;
pub mod credentials;
pub mod logger;
pub mod secret_store;

// Re-export common functions to the top-level modules namespace
pub use config::*;
pub use logger::*;

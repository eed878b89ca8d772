pub mod config;
pub mod login;
pub mod manifest;
pub mod request;

pub use config::AppConfig;
pub use login::{LoginRecord, OauthToken};
pub use manifest::{DatasetMap, FieldMap, Manifest, Size};
pub use request::{ContextRequest, DomainInfo, OutboundBody, ProxyContext, RequestOptions};

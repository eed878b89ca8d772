use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// App manifest (`manifest.json`) as published with `domo publish`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub version: String,
    #[serde(default, alias = "sizing")]
    pub size: Size,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub public_assets_enabled: bool,
    #[serde(default)]
    pub flags: HashMap<String, bool>,
    #[serde(default)]
    pub fullpage: bool,
    #[serde(default)]
    pub o_auth_enabled: Option<bool>,
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
    #[serde(default)]
    pub proxy_id: Option<String>,
    #[serde(default)]
    pub mapping: Option<Vec<DatasetMap>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetMap {
    pub data_set_id: String,
    pub alias: String,
    #[serde(default)]
    pub fields: Vec<FieldMap>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMap {
    pub alias: String,
    pub column_name: String,
}

impl Manifest {
    /// OAuth scopes to resolve tokens for, or `None` when OAuth is off.
    pub fn oauth_scopes(&self) -> Option<&[String]> {
        match (self.o_auth_enabled, self.scopes.as_deref()) {
            (Some(true), Some(scopes)) if !scopes.is_empty() => Some(scopes),
            _ => None,
        }
    }
}

//! Declarative API descriptors as parsed from the deployment input.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Input document: group id -> API gateway id -> descriptor.
pub type GroupEndpoints = BTreeMap<String, BTreeMap<String, ApiDescriptor>>;

/// One API and its endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiDescriptor {
    #[serde(default)]
    pub product_short_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_short_name: Option<String>,
    /// Deployment environment name
    #[serde(default)]
    pub stage: String,
    /// Passed through untouched to the gateway
    #[serde(default, rename = "cors", alias = "corsConfig")]
    pub cors: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_url_sub_domain: Option<String>,
    #[serde(default)]
    pub features: Features,
    #[serde(default, rename = "endpointsInfoArray", alias = "endpoints")]
    pub endpoints: Vec<EndpointDescriptor>,
}

/// Feature switches keyed by feature name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Features {
    #[serde(
        default,
        rename = "Authorization",
        skip_serializing_if = "Option::is_none"
    )]
    pub authorization: Option<AuthorizationFeature>,
    /// Features this binder does not interpret
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

/// `features.Authorization`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationFeature {
    /// Authorizer source, relative to the base directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// One API route bound to one compute unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointDescriptor {
    #[serde(default)]
    pub service_method_name: String,
    #[serde(default)]
    pub resource_name: String,
    #[serde(default)]
    pub disable_authorizer: bool,
    /// Route details consumed by the gateway, not by the binder
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl EndpointDescriptor {
    pub fn new(service_method_name: impl Into<String>, resource_name: impl Into<String>) -> Self {
        Self {
            service_method_name: service_method_name.into(),
            resource_name: resource_name.into(),
            ..Self::default()
        }
    }
}

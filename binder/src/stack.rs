//! Validated, immutable view of one stack's configuration.
//!
//! All descriptor checks happen here, before any naming or grant resolution,
//! so an invalid input never produces a partial binding.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::binding::{check_service_method_name, resolve_authorization};
use crate::config::{BinderSettings, DeploymentTarget, LambdaCreationType};
use crate::descriptor::{ApiDescriptor, EndpointDescriptor, GroupEndpoints};
use crate::naming::{resolve_naming_keys, ResourceNamingKey};
use crate::{Error, Result};

/// Settings handed to the discovery service registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverySettings {
    pub stage: String,
    pub resource_name: String,
    pub product_short_name: String,
    pub org_short_name: Option<String>,
    pub discovery_table_prefix: String,
}

/// Configuration of one stack, derived once from the input.
///
/// Only [`ResolvedStackConfig::from_input`] and
/// [`ResolvedStackConfig::from_descriptor`] build one, so every value has
/// passed validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedStackConfig {
    group_name: String,
    api_gateway_name: String,
    /// `resourceName` of the first endpoint
    resource_name: String,
    /// Lower-cased
    product_short_name: String,
    /// Lower-cased
    org_short_name: Option<String>,
    stage: String,
    cors: serde_json::Value,
    /// `{subdomain-}{stage}.{serverUrl}`, when domain mapping is requested
    mapping_domain: Option<String>,
    /// Authorizer source joined onto `base_dir`; `Some` iff authorization exists
    #[serde(rename = "authorizerPath")]
    authorization: Option<PathBuf>,
    endpoints: Vec<EndpointDescriptor>,
    target: DeploymentTarget,
    discovery: DiscoverySettings,
    base_dir: PathBuf,
    lambda_creation_type: LambdaCreationType,
}

impl ResolvedStackConfig {
    /// Validate the input document and build the stack configuration.
    ///
    /// The document must hold exactly one group with exactly one API gateway.
    pub fn from_input(
        input: &GroupEndpoints,
        target: DeploymentTarget,
        settings: &BinderSettings,
    ) -> Result<Self> {
        let (group_name, gateways) = single_entry(input, "group")?;
        let (api_gateway_name, api) = single_entry(gateways, "API gateway")?;

        let config = Self::from_descriptor(group_name, api_gateway_name, api, target, settings)?;
        info!(
            group = %config.group_name(),
            api_gateway = %config.api_gateway_name(),
            stage = %config.stage(),
            endpoints = config.endpoints().len(),
            authorization = config.is_authorization_exists(),
            "Resolved stack configuration"
        );
        Ok(config)
    }

    /// Build the stack configuration for a single descriptor.
    pub fn from_descriptor(
        group_name: &str,
        api_gateway_name: &str,
        api: &ApiDescriptor,
        target: DeploymentTarget,
        settings: &BinderSettings,
    ) -> Result<Self> {
        let stage = required(&api.stage, "stage")?;
        let product_short_name = required(&api.product_short_name, "productShortName")?;

        let first_endpoint = api
            .endpoints
            .first()
            .ok_or_else(|| Error::Config("API declares no endpoints".to_string()))?;
        let mut seen = HashSet::new();
        for (index, endpoint) in api.endpoints.iter().enumerate() {
            let name = endpoint.service_method_name.as_str();
            if name.trim().is_empty() {
                return Err(Error::Config(format!(
                    "endpoints[{}] is missing serviceMethodName",
                    index
                )));
            }
            check_service_method_name(name)?;
            if !seen.insert(name) {
                return Err(Error::Config(format!(
                    "endpoints[{}] repeats serviceMethodName {:?}",
                    index, name
                )));
            }
        }

        let authorization = resolve_authorization(api, &settings.base_dir)?;

        let mapping_domain = mapping_domain(
            stage,
            api.server_url.as_deref(),
            api.server_url_sub_domain.as_deref(),
        )?;

        let product_short_name = product_short_name.to_lowercase();
        let org_short_name = api.org_short_name.as_deref().map(str::to_lowercase);
        let resource_name = first_endpoint.resource_name.clone();

        debug!(
            mapping_domain = ?mapping_domain,
            resource_name = %resource_name,
            "Validated API descriptor"
        );

        Ok(Self {
            group_name: group_name.to_string(),
            api_gateway_name: api_gateway_name.to_string(),
            discovery: DiscoverySettings {
                stage: stage.to_string(),
                resource_name: resource_name.clone(),
                product_short_name: product_short_name.clone(),
                org_short_name: org_short_name.clone(),
                discovery_table_prefix: settings.discovery_table_prefix.clone(),
            },
            resource_name,
            product_short_name,
            org_short_name,
            stage: stage.to_string(),
            cors: api.cors.clone(),
            mapping_domain,
            authorization: authorization.unit_path,
            endpoints: api.endpoints.clone(),
            target,
            base_dir: settings.base_dir.clone(),
            lambda_creation_type: settings.lambda_creation_type,
        })
    }

    pub fn group_name(&self) -> &str {
        &self.group_name
    }

    pub fn api_gateway_name(&self) -> &str {
        &self.api_gateway_name
    }

    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    pub fn product_short_name(&self) -> &str {
        &self.product_short_name
    }

    pub fn org_short_name(&self) -> Option<&str> {
        self.org_short_name.as_deref()
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn cors(&self) -> &serde_json::Value {
        &self.cors
    }

    pub fn mapping_domain(&self) -> Option<&str> {
        self.mapping_domain.as_deref()
    }

    /// Whether `features.Authorization` is present. Fixed for the stack's lifetime.
    pub fn is_authorization_exists(&self) -> bool {
        self.authorization.is_some()
    }

    pub fn authorizer_path(&self) -> Option<&Path> {
        self.authorization.as_deref()
    }

    /// Endpoints in descriptor order.
    pub fn endpoints(&self) -> &[EndpointDescriptor] {
        &self.endpoints
    }

    pub fn target(&self) -> &DeploymentTarget {
        &self.target
    }

    pub fn discovery(&self) -> &DiscoverySettings {
        &self.discovery
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn lambda_creation_type(&self) -> LambdaCreationType {
        self.lambda_creation_type
    }

    /// Naming keys for every table this stack looks up.
    pub fn naming_keys(&self) -> Vec<ResourceNamingKey> {
        resolve_naming_keys(
            &self.product_short_name,
            self.org_short_name.as_deref(),
            &self.stage,
        )
    }
}

fn single_entry<'a, V>(
    map: &'a std::collections::BTreeMap<String, V>,
    what: &str,
) -> Result<(&'a str, &'a V)> {
    let mut entries = map.iter();
    match (entries.next(), entries.next()) {
        (Some((key, value)), None) => Ok((key.as_str(), value)),
        (None, _) => Err(Error::Config(format!("input contains no {}", what))),
        (Some(_), Some(_)) => Err(Error::Config(format!(
            "expected exactly one {}, found {}: {}",
            what,
            map.len(),
            map.keys().cloned().collect::<Vec<_>>().join(", ")
        ))),
    }
}

fn required<'a>(value: &'a str, field: &str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::Config(format!("missing required field {}", field)));
    }
    if trimmed.len() != value.len() {
        return Err(Error::Config(format!(
            "{} has surrounding whitespace: {:?}",
            field, value
        )));
    }
    Ok(value)
}

/// Custom domain for the gateway.
///
/// Mapping is requested when either `serverUrl` or `serverUrlSubDomain` is set.
pub fn mapping_domain(
    stage: &str,
    server_url: Option<&str>,
    sub_domain: Option<&str>,
) -> Result<Option<String>> {
    let server_url = server_url.filter(|s| !s.is_empty());
    let sub_domain = sub_domain.filter(|s| !s.is_empty());

    match (server_url, sub_domain) {
        (None, None) => Ok(None),
        (None, Some(_)) => Err(Error::Config(
            "serverUrlSubDomain is set but serverUrl is missing".to_string(),
        )),
        (Some(url), sub) => {
            let prefix = sub.map(|s| format!("{}-", s)).unwrap_or_default();
            Ok(Some(format!("{}{}.{}", prefix, stage, url)))
        }
    }
}

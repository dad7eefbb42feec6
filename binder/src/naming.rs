//! Physical resource naming.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Tables the stack looks up by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceConstant {
    Products,
    Users,
    UsersPolicy,
    GlobalCounter,
    UserPool,
}

impl ResourceConstant {
    /// Lookup order used when resolving a stack.
    pub const ALL: [ResourceConstant; 5] = [
        ResourceConstant::Products,
        ResourceConstant::Users,
        ResourceConstant::UsersPolicy,
        ResourceConstant::GlobalCounter,
        ResourceConstant::UserPool,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceConstant::Products => "products",
            ResourceConstant::Users => "users",
            ResourceConstant::UsersPolicy => "users-policy",
            ResourceConstant::GlobalCounter => "global-counter",
            ResourceConstant::UserPool => "user-pool",
        }
    }

    /// Construct id for the table lookup, scoped by stage.
    pub fn construct_id(&self, stage: &str) -> String {
        let suffix = match self {
            ResourceConstant::Products => "productsTableName",
            ResourceConstant::Users => "usersTableName",
            ResourceConstant::UsersPolicy => "usersPolicyTableName",
            ResourceConstant::GlobalCounter => "globalCounterTableName",
            ResourceConstant::UserPool => "userPool",
        };
        format!("{}-{}", stage, suffix)
    }
}

impl fmt::Display for ResourceConstant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs to the naming convention for one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceNamingKey {
    pub product_short_name: String,
    pub org_short_name: Option<String>,
    pub stage: String,
    pub resource_constant: ResourceConstant,
}

/// Maps a naming key to a physical resource name.
pub trait NamingConvention: Send + Sync {
    fn resource_name(&self, key: &ResourceNamingKey) -> String;
}

/// `{org}-{product}-{stage}-{constant}`, with the org segment dropped when absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultNamingConvention;

impl NamingConvention for DefaultNamingConvention {
    fn resource_name(&self, key: &ResourceNamingKey) -> String {
        let mut parts: Vec<&str> = Vec::with_capacity(4);
        if let Some(org) = key.org_short_name.as_deref().filter(|o| !o.is_empty()) {
            parts.push(org);
        }
        parts.push(&key.product_short_name);
        parts.push(&key.stage);
        parts.push(key.resource_constant.as_str());
        parts.join("-")
    }
}

/// Enumerate the naming keys for every looked-up table.
///
/// Product and org names are lower-cased for all keys. The `user-pool` key
/// lower-cases them a second time on its own; that lookup has always been
/// case-normalized independently of the others and stays a separate branch.
pub fn resolve_naming_keys(
    product_short_name: &str,
    org_short_name: Option<&str>,
    stage: &str,
) -> Vec<ResourceNamingKey> {
    let product = product_short_name.to_lowercase();
    let org = org_short_name.map(str::to_lowercase);

    ResourceConstant::ALL
        .iter()
        .map(|&constant| match constant {
            ResourceConstant::UserPool => ResourceNamingKey {
                product_short_name: product.to_lowercase(),
                org_short_name: org.as_deref().map(str::to_lowercase),
                stage: stage.to_string(),
                resource_constant: constant,
            },
            _ => ResourceNamingKey {
                product_short_name: product.clone(),
                org_short_name: org.clone(),
                stage: stage.to_string(),
                resource_constant: constant,
            },
        })
        .collect()
}

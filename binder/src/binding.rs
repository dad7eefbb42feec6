//! Endpoint resource binding.
//!
//! Turns a [`ResolvedStackConfig`] into the inputs of every provisioning call:
//! table references, environment maps, grants and compute unit locations.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::config::{BinderSettings, DeploymentTarget};
use crate::descriptor::{ApiDescriptor, EndpointDescriptor, GroupEndpoints};
use crate::naming::{NamingConvention, ResourceConstant, ResourceNamingKey};
use crate::stack::ResolvedStackConfig;
use crate::{Error, Result};

/// Environment variable name -> value for one compute unit.
pub type EnvironmentBinding = BTreeMap<String, String>;

/// DynamoDB actions granted for read/write data access.
pub const TABLE_READ_WRITE_ACTIONS: [&str; 12] = [
    "dynamodb:BatchGetItem",
    "dynamodb:GetRecords",
    "dynamodb:GetShardIterator",
    "dynamodb:Query",
    "dynamodb:GetItem",
    "dynamodb:Scan",
    "dynamodb:ConditionCheckItem",
    "dynamodb:BatchWriteItem",
    "dynamodb:PutItem",
    "dynamodb:UpdateItem",
    "dynamodb:DeleteItem",
    "dynamodb:DescribeTable",
];

pub const LAMBDA_ROLE_CONSTRUCT_ID: &str = "LambdaRole-SystemManagerGetAccess";
pub const LAMBDA_SERVICE_PRINCIPAL: &str = "lambda.amazonaws.com";

/// Whether the stack needs an authorizer, and where its source lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationResolution {
    pub required: bool,
    pub unit_path: Option<PathBuf>,
}

/// Resolve the authorizer requirement from `features.Authorization`.
pub fn resolve_authorization(
    descriptor: &ApiDescriptor,
    base_dir: &Path,
) -> Result<AuthorizationResolution> {
    let Some(feature) = &descriptor.features.authorization else {
        return Ok(AuthorizationResolution {
            required: false,
            unit_path: None,
        });
    };

    let path = feature
        .path
        .as_deref()
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| {
            Error::Config("features.Authorization is enabled but has no path".to_string())
        })?;

    Ok(AuthorizationResolution {
        required: true,
        unit_path: Some(base_dir.join(path)),
    })
}

/// A pre-existing table looked up by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRef {
    pub constant: ResourceConstant,
    pub construct_id: String,
    pub table_name: String,
}

/// Every table the stack looks up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedTables {
    pub products: TableRef,
    pub users: TableRef,
    pub users_policy: TableRef,
    pub global_counter: TableRef,
    pub user_pool: TableRef,
}

impl ResolvedTables {
    /// Name every table through the naming convention.
    pub fn resolve(
        keys: &[ResourceNamingKey],
        naming: &dyn NamingConvention,
    ) -> Result<Self> {
        let table = |constant: ResourceConstant| -> Result<TableRef> {
            let key = keys
                .iter()
                .find(|k| k.resource_constant == constant)
                .ok_or_else(|| {
                    Error::Config(format!("no naming key for table {}", constant))
                })?;
            Ok(TableRef {
                constant,
                construct_id: constant.construct_id(&key.stage),
                table_name: naming.resource_name(key),
            })
        };

        Ok(Self {
            products: table(ResourceConstant::Products)?,
            users: table(ResourceConstant::Users)?,
            users_policy: table(ResourceConstant::UsersPolicy)?,
            global_counter: table(ResourceConstant::GlobalCounter)?,
            user_pool: table(ResourceConstant::UserPool)?,
        })
    }

    /// Tables in lookup order.
    pub fn all(&self) -> [&TableRef; 5] {
        [
            &self.products,
            &self.users,
            &self.users_policy,
            &self.global_counter,
            &self.user_pool,
        ]
    }
}

/// Environment of the authorizer unit.
pub fn resolve_authorizer_environment(
    stage: &str,
    tables: &ResolvedTables,
) -> EnvironmentBinding {
    BTreeMap::from([
        (
            "USERS_POLICY_TABLE_NAME".to_string(),
            tables.users_policy.table_name.clone(),
        ),
        ("USERS_TABLE_NAME".to_string(), tables.users.table_name.clone()),
        ("stage".to_string(), stage.to_string()),
        (
            "PRODUCTS_TABLE_NAME".to_string(),
            tables.products.table_name.clone(),
        ),
        (
            "USER_POOL_TABLE_NAME".to_string(),
            tables.user_pool.table_name.clone(),
        ),
    ])
}

/// Environment of an endpoint unit. Identical for every endpoint of a stack.
pub fn resolve_endpoint_environment(
    config: &ResolvedStackConfig,
    _endpoint: &EndpointDescriptor,
    tables: &ResolvedTables,
) -> EnvironmentBinding {
    BTreeMap::from([
        ("STAGE".to_string(), config.stage().to_string()),
        (
            "DEFAULT_DYNAMODB_TABLE_NAME".to_string(),
            tables.products.table_name.clone(),
        ),
        (
            "GLOBAL_COUNTER_TABLE_NAME".to_string(),
            tables.global_counter.table_name.clone(),
        ),
    ])
}

/// Identity receiving a grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "name", rename_all = "camelCase")]
pub enum Principal {
    Authorizer,
    /// Endpoint unit, by `serviceMethodName`
    Function(String),
}

/// Data access on one table for one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Grant {
    pub principal: Principal,
    pub table: ResourceConstant,
    pub table_name: String,
    pub actions: Vec<String>,
}

impl Grant {
    fn read_write(principal: Principal, table: &TableRef) -> Self {
        Self {
            principal,
            table: table.constant,
            table_name: table.table_name.clone(),
            actions: TABLE_READ_WRITE_ACTIONS.iter().map(|a| a.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyStatement {
    pub actions: Vec<String>,
    pub resources: Vec<String>,
}

/// Role shared by the endpoint units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleSpec {
    pub construct_id: String,
    pub assumed_by: String,
    pub statements: Vec<PolicyStatement>,
}

impl RoleSpec {
    /// Parameter Store reads and CloudWatch Logs on every resource.
    pub fn lambda_role() -> Self {
        Self {
            construct_id: LAMBDA_ROLE_CONSTRUCT_ID.to_string(),
            assumed_by: LAMBDA_SERVICE_PRINCIPAL.to_string(),
            statements: vec![
                PolicyStatement {
                    actions: vec!["ssm:GetParameter".to_string()],
                    resources: vec!["*".to_string()],
                },
                PolicyStatement {
                    actions: vec!["logs:*".to_string()],
                    resources: vec!["*".to_string()],
                },
            ],
        }
    }
}

/// Stack-level grants: the authorizer's tables and the shared role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantPlan {
    pub authorizer_grants: Vec<Grant>,
    pub role: RoleSpec,
}

pub fn resolve_grants(tables: &ResolvedTables, authorization_required: bool) -> GrantPlan {
    let authorizer_grants = if authorization_required {
        [
            &tables.users,
            &tables.users_policy,
            &tables.products,
            &tables.user_pool,
        ]
        .into_iter()
        .map(|table| Grant::read_write(Principal::Authorizer, table))
        .collect()
    } else {
        Vec::new()
    };

    GrantPlan {
        authorizer_grants,
        role: RoleSpec::lambda_role(),
    }
}

/// Tables an endpoint unit reads and writes.
pub fn resolve_endpoint_grants(
    endpoint: &EndpointDescriptor,
    tables: &ResolvedTables,
) -> Vec<Grant> {
    [&tables.products, &tables.global_counter]
        .into_iter()
        .map(|table| {
            Grant::read_write(Principal::Function(endpoint.service_method_name.clone()), table)
        })
        .collect()
}

/// Reject names that would place the unit outside `lambda/`.
pub fn check_service_method_name(name: &str) -> Result<()> {
    if name.contains(['/', '\\']) || name == "." || name.contains("..") {
        return Err(Error::Config(format!(
            "serviceMethodName {:?} must be a single path segment",
            name
        )));
    }
    Ok(())
}

/// Source entry point of an endpoint unit.
pub fn locate_compute_unit(base_dir: &Path, endpoint: &EndpointDescriptor) -> Result<PathBuf> {
    let name = endpoint.service_method_name.trim();
    if name.is_empty() {
        return Err(Error::Config(format!(
            "endpoint {:?} is missing serviceMethodName",
            endpoint.resource_name
        )));
    }
    check_service_method_name(name)?;
    Ok(base_dir.join(format!("lambda/{}/src/index", name)))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizerBinding {
    pub unit_path: PathBuf,
    pub environment: EnvironmentBinding,
    pub grants: Vec<Grant>,
}

/// Authorizer placed in front of an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizerGuard {
    pub unit_path: PathBuf,
    pub environment: EnvironmentBinding,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointBinding {
    pub service_method_name: String,
    pub resource_name: String,
    pub compute_unit: PathBuf,
    pub environment: EnvironmentBinding,
    pub grants: Vec<Grant>,
    /// `None` when authorization is off for the stack or disabled on the endpoint
    pub authorizer: Option<AuthorizerGuard>,
}

impl EndpointBinding {
    pub fn is_guarded(&self) -> bool {
        self.authorizer.is_some()
    }
}

/// Everything the provisioning calls of one stack need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackBindings {
    pub tables: ResolvedTables,
    pub authorizer: Option<AuthorizerBinding>,
    pub role: RoleSpec,
    /// In descriptor order
    pub endpoints: Vec<EndpointBinding>,
}

/// Bind every endpoint of a validated stack.
pub fn bind(config: &ResolvedStackConfig, naming: &dyn NamingConvention) -> Result<StackBindings> {
    let keys = config.naming_keys();
    let tables = ResolvedTables::resolve(&keys, naming)?;
    let grant_plan = resolve_grants(&tables, config.is_authorization_exists());

    let authorizer = config.authorizer_path().map(|unit_path| AuthorizerBinding {
        unit_path: unit_path.to_path_buf(),
        environment: resolve_authorizer_environment(config.stage(), &tables),
        grants: grant_plan.authorizer_grants,
    });

    let endpoints = config
        .endpoints()
        .iter()
        .map(|endpoint| {
            let guard = authorizer
                .as_ref()
                .filter(|_| !endpoint.disable_authorizer)
                .map(|auth| AuthorizerGuard {
                    unit_path: auth.unit_path.clone(),
                    environment: auth.environment.clone(),
                });

            let binding = EndpointBinding {
                service_method_name: endpoint.service_method_name.clone(),
                resource_name: endpoint.resource_name.clone(),
                compute_unit: locate_compute_unit(config.base_dir(), endpoint)?,
                environment: resolve_endpoint_environment(config, endpoint, &tables),
                grants: resolve_endpoint_grants(endpoint, &tables),
                authorizer: guard,
            };
            debug!(
                endpoint = %binding.service_method_name,
                guarded = binding.is_guarded(),
                "Bound endpoint"
            );
            Ok(binding)
        })
        .collect::<Result<Vec<_>>>()?;

    info!(
        api_gateway = %config.api_gateway_name(),
        endpoints = endpoints.len(),
        authorizer = authorizer.is_some(),
        "Resolved stack bindings"
    );

    Ok(StackBindings {
        tables,
        authorizer,
        role: grant_plan.role,
        endpoints,
    })
}

/// Validate the input and bind it. No naming happens for an invalid input.
pub fn resolve_stack(
    input: &GroupEndpoints,
    target: DeploymentTarget,
    settings: &BinderSettings,
    naming: &dyn NamingConvention,
) -> Result<(ResolvedStackConfig, StackBindings)> {
    let config = ResolvedStackConfig::from_input(input, target, settings)?;
    let bindings = bind(&config, naming)?;
    Ok((config, bindings))
}

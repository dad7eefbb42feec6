//! Provisioning of resolved bindings.
//!
//! Actual resource creation is delegated to a [`Provisioner`]. [`deploy`] issues
//! the calls in stack order and dispatches every endpoint concurrently.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::aws::DynamoDbTableVerifier;
use crate::binding::{AuthorizerBinding, EndpointBinding, Grant, RoleSpec, StackBindings, TableRef};
use crate::error::EndpointFailure;
use crate::stack::ResolvedStackConfig;
use crate::{Error, Result};

/// Gateway creation request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySpec {
    pub name: String,
    pub stage: String,
    pub mapping_domain: Option<String>,
    pub cors: serde_json::Value,
    pub authorizer: Option<AuthorizerBinding>,
}

impl GatewaySpec {
    pub fn from_bindings(config: &ResolvedStackConfig, bindings: &StackBindings) -> Self {
        Self {
            name: config.api_gateway_name().to_string(),
            stage: config.stage().to_string(),
            mapping_domain: config.mapping_domain().map(str::to_string),
            cors: config.cors().clone(),
            authorizer: bindings.authorizer.clone(),
        }
    }
}

/// Creates or looks up the resources of a stack.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Look up a pre-existing table. Fails with [`Error::ResourceNotFound`].
    async fn lookup_table(&self, table: &TableRef) -> Result<()>;

    async fn create_api_gateway(&self, gateway: &GatewaySpec) -> Result<()>;

    async fn create_role(&self, role: &RoleSpec) -> Result<()>;

    async fn grant(&self, grant: &Grant) -> Result<()>;

    /// Create one endpoint's compute unit and route.
    async fn create_function(&self, endpoint: &EndpointBinding, role: &RoleSpec) -> Result<()>;
}

/// Outcome of a successful deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentReport {
    pub tables: usize,
    pub authorizer_grants: usize,
    pub endpoints: usize,
}

/// Provision a resolved stack.
///
/// Tables are looked up first, then the gateway and authorizer grants, then the
/// shared role. Every endpoint is dispatched without waiting on the others; the
/// call returns once all have finished, failing if any of them did.
pub async fn deploy(
    config: &ResolvedStackConfig,
    bindings: &StackBindings,
    provisioner: &dyn Provisioner,
) -> Result<DeploymentReport> {
    for table in bindings.tables.all() {
        provisioner.lookup_table(table).await?;
    }

    provisioner
        .create_api_gateway(&GatewaySpec::from_bindings(config, bindings))
        .await?;

    let mut authorizer_grants = 0;
    if let Some(authorizer) = &bindings.authorizer {
        for grant in &authorizer.grants {
            provisioner.grant(grant).await?;
        }
        authorizer_grants = authorizer.grants.len();
    }

    provisioner.create_role(&bindings.role).await?;

    info!(
        api_gateway = %config.api_gateway_name(),
        endpoints = bindings.endpoints.len(),
        "Dispatching endpoint provisioning"
    );

    let results = join_all(
        bindings
            .endpoints
            .iter()
            .map(|endpoint| provision_endpoint(provisioner, endpoint, &bindings.role)),
    )
    .await;

    let mut failures = Vec::new();
    for (endpoint, result) in bindings.endpoints.iter().zip(results) {
        if let Err(e) = result {
            error!(
                endpoint = %endpoint.service_method_name,
                error = %e,
                "Endpoint provisioning failed"
            );
            failures.push(EndpointFailure {
                service_method_name: endpoint.service_method_name.clone(),
                cause: e.to_string(),
            });
        }
    }

    if !failures.is_empty() {
        let succeeded = bindings.endpoints.len() - failures.len();
        warn!(failed = failures.len(), succeeded, "Stack provisioning incomplete");
        return Err(Error::PartialProvisioning { failures, succeeded });
    }

    Ok(DeploymentReport {
        tables: bindings.tables.all().len(),
        authorizer_grants,
        endpoints: bindings.endpoints.len(),
    })
}

async fn provision_endpoint(
    provisioner: &dyn Provisioner,
    endpoint: &EndpointBinding,
    role: &RoleSpec,
) -> Result<()> {
    provisioner.create_function(endpoint, role).await?;
    for grant in &endpoint.grants {
        provisioner.grant(grant).await?;
    }
    Ok(())
}

/// One call made against a [`DryRunProvisioner`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "request", rename_all = "camelCase")]
pub enum ProvisioningRequest {
    #[serde(rename_all = "camelCase")]
    LookupTable { construct_id: String, table_name: String },
    #[serde(rename_all = "camelCase")]
    CreateApiGateway {
        name: String,
        mapping_domain: Option<String>,
        authorizer: Option<PathBuf>,
    },
    #[serde(rename_all = "camelCase")]
    CreateRole { construct_id: String },
    #[serde(rename_all = "camelCase")]
    Grant {
        principal: String,
        table_name: String,
        actions: usize,
    },
    #[serde(rename_all = "camelCase")]
    CreateFunction {
        service_method_name: String,
        compute_unit: PathBuf,
        guarded: bool,
    },
}

/// Records provisioning calls instead of making them.
///
/// With a table verifier attached, table lookups go to DynamoDB.
#[derive(Default)]
pub struct DryRunProvisioner {
    verifier: Option<DynamoDbTableVerifier>,
    requests: Mutex<Vec<ProvisioningRequest>>,
}

impl DryRunProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_verifier(verifier: DynamoDbTableVerifier) -> Self {
        Self {
            verifier: Some(verifier),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Calls recorded so far, in the order they were made.
    pub async fn requests(&self) -> Vec<ProvisioningRequest> {
        self.requests.lock().await.clone()
    }

    async fn record(&self, request: ProvisioningRequest) {
        self.requests.lock().await.push(request);
    }
}

#[async_trait]
impl Provisioner for DryRunProvisioner {
    async fn lookup_table(&self, table: &TableRef) -> Result<()> {
        if let Some(verifier) = &self.verifier {
            verifier.verify(&table.table_name).await?;
        }
        self.record(ProvisioningRequest::LookupTable {
            construct_id: table.construct_id.clone(),
            table_name: table.table_name.clone(),
        })
        .await;
        Ok(())
    }

    async fn create_api_gateway(&self, gateway: &GatewaySpec) -> Result<()> {
        self.record(ProvisioningRequest::CreateApiGateway {
            name: gateway.name.clone(),
            mapping_domain: gateway.mapping_domain.clone(),
            authorizer: gateway.authorizer.as_ref().map(|a| a.unit_path.clone()),
        })
        .await;
        Ok(())
    }

    async fn create_role(&self, role: &RoleSpec) -> Result<()> {
        self.record(ProvisioningRequest::CreateRole {
            construct_id: role.construct_id.clone(),
        })
        .await;
        Ok(())
    }

    async fn grant(&self, grant: &Grant) -> Result<()> {
        let principal = match &grant.principal {
            crate::binding::Principal::Authorizer => "authorizer".to_string(),
            crate::binding::Principal::Function(name) => name.clone(),
        };
        self.record(ProvisioningRequest::Grant {
            principal,
            table_name: grant.table_name.clone(),
            actions: grant.actions.len(),
        })
        .await;
        Ok(())
    }

    async fn create_function(&self, endpoint: &EndpointBinding, _role: &RoleSpec) -> Result<()> {
        self.record(ProvisioningRequest::CreateFunction {
            service_method_name: endpoint.service_method_name.clone(),
            compute_unit: endpoint.compute_unit.clone(),
            guarded: endpoint.is_guarded(),
        })
        .await;
        Ok(())
    }
}

/// One resolution of a stack, as produced for a single deployment request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentPlan {
    pub deployment_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub config: ResolvedStackConfig,
    pub bindings: StackBindings,
    pub report: DeploymentReport,
    pub requests: Vec<ProvisioningRequest>,
}

/// Run a dry-run deployment and capture the plan.
pub async fn plan(
    config: ResolvedStackConfig,
    bindings: StackBindings,
    provisioner: Arc<DryRunProvisioner>,
) -> Result<DeploymentPlan> {
    let deployment_id = Uuid::new_v4();
    info!(
        %deployment_id,
        api_gateway = %config.api_gateway_name(),
        "Planning deployment"
    );

    let report = deploy(&config, &bindings, provisioner.as_ref()).await?;
    let requests = provisioner.requests().await;

    Ok(DeploymentPlan {
        deployment_id,
        generated_at: Utc::now(),
        config,
        bindings,
        report,
        requests,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::resolve_stack;
    use crate::config::{BinderSettings, DeploymentTarget};
    use crate::descriptor::{
        ApiDescriptor, AuthorizationFeature, EndpointDescriptor, GroupEndpoints,
    };
    use crate::naming::DefaultNamingConvention;
    use std::collections::{BTreeMap, HashSet};
    use std::time::Duration;

    fn resolved(authorization: bool) -> (ResolvedStackConfig, StackBindings) {
        let mut api = ApiDescriptor {
            product_short_name: "shop".to_string(),
            stage: "dev".to_string(),
            server_url: Some("example.com".to_string()),
            endpoints: vec![
                EndpointDescriptor::new("getUser", "users"),
                EndpointDescriptor::new("listUsers", "users"),
                EndpointDescriptor::new("deleteUser", "users"),
            ],
            ..ApiDescriptor::default()
        };
        if authorization {
            api.features.authorization = Some(AuthorizationFeature {
                path: Some("./auth".to_string()),
            });
        }
        let input = GroupEndpoints::from([(
            "users".to_string(),
            BTreeMap::from([("usersApi".to_string(), api)]),
        )]);
        resolve_stack(
            &input,
            DeploymentTarget::default(),
            &BinderSettings::new("/srv/deploy"),
            &DefaultNamingConvention,
        )
        .unwrap()
    }

    /// Fails selected endpoints, and can hold functions until all are in flight.
    struct FlakyProvisioner {
        failing: HashSet<String>,
        missing_table: Option<String>,
        in_flight: std::sync::atomic::AtomicUsize,
        peak: std::sync::atomic::AtomicUsize,
        created: Mutex<Vec<String>>,
    }

    impl FlakyProvisioner {
        fn new(failing: &[&str]) -> Self {
            Self {
                failing: failing.iter().map(|s| s.to_string()).collect(),
                missing_table: None,
                in_flight: Default::default(),
                peak: Default::default(),
                created: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Provisioner for FlakyProvisioner {
        async fn lookup_table(&self, table: &TableRef) -> Result<()> {
            if self.missing_table.as_deref() == Some(table.table_name.as_str()) {
                return Err(Error::ResourceNotFound(table.table_name.clone()));
            }
            Ok(())
        }

        async fn create_api_gateway(&self, _gateway: &GatewaySpec) -> Result<()> {
            Ok(())
        }

        async fn create_role(&self, _role: &RoleSpec) -> Result<()> {
            Ok(())
        }

        async fn grant(&self, _grant: &Grant) -> Result<()> {
            Ok(())
        }

        async fn create_function(
            &self,
            endpoint: &EndpointBinding,
            _role: &RoleSpec,
        ) -> Result<()> {
            use std::sync::atomic::Ordering;

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failing.contains(&endpoint.service_method_name) {
                return Err(Error::Provisioning(format!(
                    "function {} rejected",
                    endpoint.service_method_name
                )));
            }
            self.created
                .lock()
                .await
                .push(endpoint.service_method_name.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_dry_run_records_calls_in_stack_order() {
        let (config, bindings) = resolved(true);
        let provisioner = DryRunProvisioner::new();

        let report = deploy(&config, &bindings, &provisioner).await.unwrap();
        assert_eq!(
            report,
            DeploymentReport {
                tables: 5,
                authorizer_grants: 4,
                endpoints: 3,
            }
        );

        let requests = provisioner.requests().await;
        assert!(requests[..5]
            .iter()
            .all(|r| matches!(r, ProvisioningRequest::LookupTable { .. })));
        assert_eq!(
            requests[5],
            ProvisioningRequest::CreateApiGateway {
                name: "usersApi".to_string(),
                mapping_domain: Some("dev.example.com".to_string()),
                authorizer: Some(PathBuf::from("/srv/deploy/auth")),
            }
        );
        assert!(requests[6..10].iter().all(|r| matches!(
            r,
            ProvisioningRequest::Grant { principal, .. } if principal == "authorizer"
        )));
        assert_eq!(
            requests[10],
            ProvisioningRequest::CreateRole {
                construct_id: "LambdaRole-SystemManagerGetAccess".to_string()
            }
        );

        let functions = requests
            .iter()
            .filter(|r| matches!(r, ProvisioningRequest::CreateFunction { .. }))
            .count();
        assert_eq!(functions, 3);
        // 3 functions, each with 2 table grants
        assert_eq!(requests.len(), 11 + 3 * 3);
    }

    #[tokio::test]
    async fn test_no_authorizer_grants_without_authorization() {
        let (config, bindings) = resolved(false);
        let provisioner = DryRunProvisioner::new();

        let report = deploy(&config, &bindings, &provisioner).await.unwrap();
        assert_eq!(report.authorizer_grants, 0);

        let requests = provisioner.requests().await;
        assert!(matches!(
            &requests[5],
            ProvisioningRequest::CreateApiGateway { authorizer: None, .. }
        ));
        assert!(matches!(requests[6], ProvisioningRequest::CreateRole { .. }));
    }

    #[tokio::test]
    async fn test_endpoints_are_dispatched_concurrently() {
        let (config, bindings) = resolved(false);
        let provisioner = FlakyProvisioner::new(&[]);

        deploy(&config, &bindings, &provisioner).await.unwrap();

        assert_eq!(
            provisioner.peak.load(std::sync::atomic::Ordering::SeqCst),
            3
        );
        assert_eq!(provisioner.created.lock().await.len(), 3);
    }

    #[tokio::test]
    async fn test_endpoint_failures_are_aggregated() {
        let (config, bindings) = resolved(false);
        let provisioner = FlakyProvisioner::new(&["getUser", "deleteUser"]);

        let err = deploy(&config, &bindings, &provisioner).await.unwrap_err();
        match &err {
            Error::PartialProvisioning { failures, succeeded } => {
                assert_eq!(*succeeded, 1);
                assert_eq!(failures.len(), 2);
                assert_eq!(failures[0].cause, "Provisioning error: function getUser rejected");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.failed_endpoints(), vec!["getUser", "deleteUser"]);
        // the healthy sibling still ran to completion
        assert_eq!(*provisioner.created.lock().await, vec!["listUsers".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_table_stops_before_endpoints() {
        let (config, bindings) = resolved(false);
        let mut provisioner = FlakyProvisioner::new(&[]);
        provisioner.missing_table = Some("shop-dev-users".to_string());

        let err = deploy(&config, &bindings, &provisioner).await.unwrap_err();
        assert!(matches!(err, Error::ResourceNotFound(name) if name == "shop-dev-users"));
        assert!(provisioner.created.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_plan_is_fresh_per_request() {
        let (config, bindings) = resolved(true);

        let first = plan(
            config.clone(),
            bindings.clone(),
            Arc::new(DryRunProvisioner::new()),
        )
        .await
        .unwrap();
        let second = plan(config, bindings, Arc::new(DryRunProvisioner::new()))
            .await
            .unwrap();

        assert_ne!(first.deployment_id, second.deployment_id);
        assert_eq!(first.bindings, second.bindings);
        assert_eq!(first.requests, second.requests);

        let json = serde_json::to_value(&first).unwrap();
        assert_eq!(json["config"]["apiGatewayName"], "usersApi");
        assert_eq!(json["requests"][0]["request"], "lookupTable");
    }
}

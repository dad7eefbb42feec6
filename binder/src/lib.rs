//! Endpoint resource binder for serverless API stacks.
//!
//! Resolves a declarative API description into the environment maps, table
//! grants and compute unit locations each endpoint needs, and drives a
//! [`Provisioner`] with them.

pub mod aws;
pub mod binding;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod naming;
pub mod provision;
pub mod stack;

pub use aws::DynamoDbTableVerifier;
pub use binding::{
    bind, check_service_method_name, locate_compute_unit, resolve_authorization,
    resolve_authorizer_environment, resolve_endpoint_environment, resolve_grants, resolve_stack,
    AuthorizerBinding, EndpointBinding, EnvironmentBinding, Grant, Principal, ResolvedTables,
    RoleSpec, StackBindings, TableRef,
};
pub use config::{load_input, BinderSettings, DeploymentTarget, LambdaCreationType};
pub use descriptor::{ApiDescriptor, EndpointDescriptor, Features, GroupEndpoints};
pub use error::{EndpointFailure, Error, Result};
pub use naming::{
    resolve_naming_keys, DefaultNamingConvention, NamingConvention, ResourceConstant,
    ResourceNamingKey,
};
pub use provision::{deploy, plan, DeploymentPlan, DryRunProvisioner, Provisioner};
pub use stack::ResolvedStackConfig;

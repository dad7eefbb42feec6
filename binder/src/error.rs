//! Error types for stack resolution and provisioning.

use std::fmt;

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// One endpoint whose provisioning failed after dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointFailure {
    /// `serviceMethodName` of the failed endpoint
    pub service_method_name: String,
    /// Rendered cause
    pub cause: String,
}

impl fmt::Display for EndpointFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.service_method_name, self.cause)
    }
}

/// Errors that can occur while resolving or provisioning a stack.
#[derive(Error, Debug)]
pub enum Error {
    /// Required descriptor field absent or malformed
    #[error("Configuration error: {0}")]
    Config(String),

    /// A named table could not be located
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Some endpoints failed after others were already dispatched
    #[error(
        "Provisioning failed for {} endpoint(s) ({} succeeded): {}",
        .failures.len(),
        .succeeded,
        .failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
    )]
    PartialProvisioning {
        failures: Vec<EndpointFailure>,
        succeeded: usize,
    },

    /// A non-endpoint provisioning step failed
    #[error("Provisioning error: {0}")]
    Provisioning(String),

    /// AWS SDK error
    #[error("AWS error: {0}")]
    Aws(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Process exit code for this error. 2 is left to clap usage errors.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config(_) => 3,
            Error::ResourceNotFound(_) => 4,
            Error::PartialProvisioning { .. } | Error::Provisioning(_) => 5,
            _ => 1,
        }
    }

    /// Names of the endpoints that failed, if this is an aggregate failure.
    pub fn failed_endpoints(&self) -> Vec<&str> {
        match self {
            Error::PartialProvisioning { failures, .. } => failures
                .iter()
                .map(|f| f.service_method_name.as_str())
                .collect(),
            _ => Vec::new(),
        }
    }
}

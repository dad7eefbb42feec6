//! Deployment configuration loaded from the environment and input files.

use std::env;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::descriptor::GroupEndpoints;
use crate::Result;

/// Region and account the stack deploys into.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeploymentTarget {
    /// CDK_DEFAULT_REGION
    pub region: Option<String>,
    /// CDK_DEFAULT_ACCOUNT
    pub account: Option<String>,
}

impl DeploymentTarget {
    /// Load the target from environment variables.
    pub fn from_env() -> Self {
        Self {
            region: env::var("CDK_DEFAULT_REGION").ok().filter(|v| !v.is_empty()),
            account: env::var("CDK_DEFAULT_ACCOUNT").ok().filter(|v| !v.is_empty()),
        }
    }
}

/// How compute units are packaged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LambdaCreationType {
    #[default]
    Asset,
    Image,
}

/// Settings that do not come from the descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BinderSettings {
    /// Directory authorizer and endpoint sources are resolved against
    pub base_dir: PathBuf,
    pub discovery_table_prefix: String,
    pub lambda_creation_type: LambdaCreationType,
}

impl BinderSettings {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Self::default()
        }
    }
}

impl Default for BinderSettings {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            discovery_table_prefix: "root".to_string(),
            lambda_creation_type: LambdaCreationType::Asset,
        }
    }
}

/// Read the nested group/gateway descriptor document from a JSON file.
pub fn load_input(path: impl AsRef<Path>) -> Result<GroupEndpoints> {
    let content = std::fs::read_to_string(path.as_ref())?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    #[serial]
    fn test_target_from_env() {
        env::set_var("CDK_DEFAULT_REGION", "eu-west-1");
        env::set_var("CDK_DEFAULT_ACCOUNT", "123456789012");
        let target = DeploymentTarget::from_env();
        assert_eq!(target.region.as_deref(), Some("eu-west-1"));
        assert_eq!(target.account.as_deref(), Some("123456789012"));

        env::remove_var("CDK_DEFAULT_REGION");
        env::set_var("CDK_DEFAULT_ACCOUNT", "");
        let target = DeploymentTarget::from_env();
        assert_eq!(target, DeploymentTarget::default());

        env::remove_var("CDK_DEFAULT_ACCOUNT");
    }

    #[test]
    fn test_default_settings() {
        let settings = BinderSettings::new("/srv/app");
        assert_eq!(settings.base_dir, PathBuf::from("/srv/app"));
        assert_eq!(settings.discovery_table_prefix, "root");
        assert_eq!(settings.lambda_creation_type, LambdaCreationType::Asset);
    }

    #[test]
    fn test_load_input() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"g": {{"api": {{"productShortName": "shop", "stage": "dev"}}}}}}"#
        )
        .unwrap();

        let input = load_input(file.path()).unwrap();
        assert_eq!(input["g"]["api"].stage, "dev");
    }

    #[test]
    fn test_load_input_missing_file() {
        let err = load_input("/nonexistent/apigen-input.json").unwrap_err();
        assert!(matches!(err, crate::Error::Io(_)));
    }
}

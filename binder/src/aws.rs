//! DynamoDB table verification.

use aws_sdk_dynamodb::Client as DynamoDbClient;
use tracing::debug;

use crate::{Error, Result};

/// Confirms looked-up tables exist before anything is provisioned against them.
#[derive(Debug, Clone)]
pub struct DynamoDbTableVerifier {
    client: DynamoDbClient,
}

impl DynamoDbTableVerifier {
    pub fn new(client: DynamoDbClient) -> Self {
        Self { client }
    }

    /// Build a verifier from the default AWS configuration chain.
    pub async fn from_env(region: Option<String>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        let config = loader.load().await;
        Self::new(DynamoDbClient::new(&config))
    }

    /// Describe the table, mapping a missing table to [`Error::ResourceNotFound`].
    pub async fn verify(&self, table_name: &str) -> Result<()> {
        match self
            .client
            .describe_table()
            .table_name(table_name)
            .send()
            .await
        {
            Ok(output) => {
                debug!(
                    table = table_name,
                    arn = output.table().and_then(|t| t.table_arn()).unwrap_or_default(),
                    "Table found"
                );
                Ok(())
            }
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_resource_not_found_exception() {
                    Err(Error::ResourceNotFound(table_name.to_string()))
                } else {
                    Err(Error::Aws(format!(
                        "Failed to describe table {}: {}",
                        table_name, service_error
                    )))
                }
            }
        }
    }
}

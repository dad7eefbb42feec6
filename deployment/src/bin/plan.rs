//! apigen-plan - Resolves an API stack and prints its deployment plan.
//!
//! Reads the group/gateway descriptor document, binds every endpoint and runs a
//! dry-run deployment. The plan JSON goes to stdout, logs go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use binder::{
    load_input, plan, resolve_stack, BinderSettings, DefaultNamingConvention, DeploymentTarget,
    DryRunProvisioner, DynamoDbTableVerifier,
};
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "apigen-plan", about = "Resolve an API stack into its deployment plan")]
struct Args {
    /// Descriptor document (group -> API gateway -> API)
    #[arg(long, short, env = "APIGEN_INPUT")]
    input: PathBuf,

    /// Directory authorizer and endpoint sources are resolved against
    #[arg(long, default_value = ".", env = "APIGEN_BASE_DIR")]
    base_dir: PathBuf,

    /// Check every looked-up table exists in DynamoDB
    #[arg(long)]
    verify_tables: bool,

    /// Pretty-print the plan
    #[arg(long)]
    pretty: bool,
}

async fn run(args: Args) -> anyhow::Result<String> {
    let input = load_input(&args.input)?;
    let target = DeploymentTarget::from_env();
    let settings = BinderSettings::new(&args.base_dir);

    let (config, bindings) = resolve_stack(&input, target, &settings, &DefaultNamingConvention)?;

    let provisioner = if args.verify_tables {
        let verifier = DynamoDbTableVerifier::from_env(config.target().region.clone()).await;
        DryRunProvisioner::with_verifier(verifier)
    } else {
        DryRunProvisioner::new()
    };

    let plan = plan(config, bindings, Arc::new(provisioner)).await?;

    let output = if args.pretty {
        serde_json::to_string_pretty(&plan)?
    } else {
        serde_json::to_string(&plan)?
    };
    Ok(output)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let args = Args::parse();

    match run(args).await {
        Ok(output) => {
            println!("{}", output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            let code = e
                .downcast_ref::<binder::Error>()
                .map(binder::Error::exit_code)
                .unwrap_or(1);
            error!(error = %e, "Stack planning failed");
            eprintln!("error: {:#}", e);
            ExitCode::from(code as u8)
        }
    }
}

//! The `undeploy` subcommand.

use anyhow::Result;
use clap::Args;

use crate::client::{parse_task_location, Client};

/// Arguments of the `undeploy` subcommand.
#[derive(Debug, Args)]
pub struct UndeployArgs {
    /// The deployment to undeploy.
    pub deployment_id: String,

    /// Also remove the deployment from the store once undeployed.
    #[arg(long)]
    pub purge: bool,
}

/// Submits the undeploy and prints the resulting task.
///
/// # Errors
///
/// Returns an error on transport failure or server rejection.
pub async fn execute(args: UndeployArgs, api_url: &str) -> Result<()> {
    let client = Client::new(api_url);
    let location = client.undeploy(&args.deployment_id, args.purge).await?;
    let (deployment_id, task_id) = parse_task_location(&location)?;
    println!("Undeployment of {deployment_id} submitted, task {task_id}");
    println!("Follow it with: maestro tasks get {deployment_id} {task_id}");
    Ok(())
}

//! The `tasks` subcommand family.

use anyhow::Result;
use clap::{Args, Subcommand};

use crate::client::Client;

/// Arguments of the `tasks` subcommand.
#[derive(Debug, Args)]
pub struct TasksArgs {
    /// The operation to perform.
    #[command(subcommand)]
    pub command: TasksCommand,
}

/// Task operations.
#[derive(Debug, Subcommand)]
pub enum TasksCommand {
    /// Shows a task.
    Get {
        /// The deployment the task targets.
        deployment_id: String,
        /// The task to show.
        task_id: String,
    },
    /// Requests cancellation of a task.
    Cancel {
        /// The deployment the task targets.
        deployment_id: String,
        /// The task to cancel.
        task_id: String,
    },
    /// Resumes a failed task.
    Resume {
        /// The deployment the task targets.
        deployment_id: String,
        /// The task to resume.
        task_id: String,
    },
}

/// Executes the selected task operation.
///
/// # Errors
///
/// Returns an error on transport failure or server rejection.
pub async fn execute(args: TasksArgs, api_url: &str) -> Result<()> {
    let client = Client::new(api_url);
    match args.command {
        TasksCommand::Get {
            deployment_id,
            task_id,
        } => {
            let task = client.get_task(&deployment_id, &task_id).await?;
            println!(
                "Task {} [{}] on {}: {}",
                task.id, task.task_type, task.target_id, task.status
            );
        }
        TasksCommand::Cancel {
            deployment_id,
            task_id,
        } => {
            client.cancel_task(&deployment_id, &task_id).await?;
            println!("Cancellation of task {task_id} requested");
        }
        TasksCommand::Resume {
            deployment_id,
            task_id,
        } => {
            client.resume_task(&deployment_id, &task_id).await?;
            println!("Task {task_id} resumed");
        }
    }
    Ok(())
}

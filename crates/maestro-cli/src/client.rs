//! HTTP client for the Maestro REST API.

use anyhow::{bail, Context, Result};
use reqwest::StatusCode;
use serde::Deserialize;

/// A task as returned by the API.
#[derive(Debug, Deserialize)]
pub struct Task {
    /// Task ID.
    pub id: String,
    /// The deployment the task targets.
    #[serde(rename = "targetId")]
    pub target_id: String,
    /// Task type.
    #[serde(rename = "type")]
    pub task_type: String,
    /// Task status.
    pub status: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    errors: Vec<ErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct ErrorEntry {
    title: String,
    detail: String,
}

/// Client over a Maestro server's REST API.
pub struct Client {
    base_url: String,
    http: reqwest::Client,
}

impl Client {
    /// Creates a client for the given base URL.
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Submits an undeploy (or purge) and returns the task location.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-2xx response.
    pub async fn undeploy(&self, deployment_id: &str, purge: bool) -> Result<String> {
        let url = format!(
            "{}/deployments/{deployment_id}?purge={purge}",
            self.base_url
        );
        let response = self
            .http
            .delete(&url)
            .send()
            .await
            .context("failed to reach the Maestro server")?;

        if response.status() != StatusCode::ACCEPTED {
            return Err(Self::response_error(response).await);
        }
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .context("server did not return a task location")?
            .to_string();
        Ok(location)
    }

    /// Fetches a task.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-2xx response.
    pub async fn get_task(&self, deployment_id: &str, task_id: &str) -> Result<Task> {
        let url = format!(
            "{}/deployments/{deployment_id}/tasks/{task_id}",
            self.base_url
        );
        let response = self.http.get(&url).send().await.context("failed to reach the Maestro server")?;
        if !response.status().is_success() {
            return Err(Self::response_error(response).await);
        }
        response.json().await.context("malformed task response")
    }

    /// Requests cancellation of a task.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-2xx response.
    pub async fn cancel_task(&self, deployment_id: &str, task_id: &str) -> Result<()> {
        let url = format!(
            "{}/deployments/{deployment_id}/tasks/{task_id}",
            self.base_url
        );
        let response = self.http.delete(&url).send().await.context("failed to reach the Maestro server")?;
        if response.status() != StatusCode::ACCEPTED {
            return Err(Self::response_error(response).await);
        }
        Ok(())
    }

    /// Resumes a failed task.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-2xx response.
    pub async fn resume_task(&self, deployment_id: &str, task_id: &str) -> Result<()> {
        let url = format!(
            "{}/deployments/{deployment_id}/tasks/{task_id}/resume",
            self.base_url
        );
        let response = self.http.put(&url).send().await.context("failed to reach the Maestro server")?;
        if response.status() != StatusCode::ACCEPTED {
            return Err(Self::response_error(response).await);
        }
        Ok(())
    }

    async fn response_error(response: reqwest::Response) -> anyhow::Error {
        let status = response.status();
        match response.json::<ErrorBody>().await {
            Ok(body) if !body.errors.is_empty() => {
                let entry = &body.errors[0];
                anyhow::anyhow!("{status}: {}: {}", entry.title, entry.detail)
            }
            _ => anyhow::anyhow!("unexpected response status {status}"),
        }
    }
}

/// Splits a task location (`/deployments/<id>/tasks/<taskID>`) into its
/// deployment and task IDs.
///
/// # Errors
///
/// Returns an error when the path does not look like a task location.
pub fn parse_task_location(location: &str) -> Result<(String, String)> {
    let segments: Vec<&str> = location.trim_matches('/').split('/').collect();
    match segments.as_slice() {
        ["deployments", deployment_id, "tasks", task_id] => {
            Ok(((*deployment_id).to_string(), (*task_id).to_string()))
        }
        _ => bail!("unexpected task location {location:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_location_parses() {
        let (deployment, task) =
            parse_task_location("/deployments/dep-1/tasks/01J00000000000000000000000").unwrap();
        assert_eq!(deployment, "dep-1");
        assert_eq!(task, "01J00000000000000000000000");
    }

    #[test]
    fn malformed_location_is_rejected() {
        assert!(parse_task_location("/deployments/dep-1").is_err());
    }
}

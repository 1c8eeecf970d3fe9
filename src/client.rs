//! HTTP client for the scheduler API.
//!
//! Used by the `task` subcommands to submit and inspect tasks, and by remote
//! workers as their [`SchedulerLink`]. Error responses are mapped back onto
//! [`SchedulerError`] so callers handle a remote master like a local one.

use std::time::Duration;

use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::api::{
    ErrorResponse, HeartbeatResponse, ListTasksQuery, ResultReport, SubmitTaskRequest,
};
use crate::error::{Result, SchedulerError};
use crate::scheduler::{Assignment, Submission, Task, TaskId, TaskResult, WorkerId};
use crate::worker::SchedulerLink;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Talks to a master at `base_url` (for example `http://127.0.0.1:8080`).
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(SchedulerError::Config(
                "master URL must not be empty".to_string(),
            ));
        }
        Ok(Self { base_url, http })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn submit(&self, request: &SubmitTaskRequest) -> Result<Submission> {
        let response = self.http.post(self.url("/tasks")).json(request).send().await?;
        read_json(response).await
    }

    pub async fn get_task(&self, task_id: &TaskId) -> Result<Task> {
        let response = self
            .http
            .get(self.url(&format!("/tasks/{task_id}")))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(SchedulerError::TaskNotFound(task_id.clone()));
        }
        read_json(response).await
    }

    pub async fn list_tasks(&self, query: &ListTasksQuery) -> Result<Vec<Task>> {
        let response = self
            .http
            .get(self.url("/tasks"))
            .query(query)
            .send()
            .await?;
        read_json(response).await
    }

    fn worker_url(&self, worker_id: &WorkerId, path: &str) -> String {
        self.url(&format!("/workers/{worker_id}{path}"))
    }

    /// Maps the conflicts a worker can run into on a task it thinks it owns.
    async fn read_task_report(
        &self,
        response: Response,
        worker_id: &WorkerId,
        task_id: &TaskId,
    ) -> Result<Task> {
        match response.status() {
            StatusCode::CONFLICT => Err(SchedulerError::NotAssigned {
                task_id: task_id.clone(),
                worker_id: worker_id.clone(),
            }),
            StatusCode::NOT_FOUND => Err(SchedulerError::WorkerNotFound(worker_id.clone())),
            _ => read_json(response).await,
        }
    }
}

impl SchedulerLink for ApiClient {
    async fn heartbeat(&self, worker_id: &WorkerId) -> Result<Option<Assignment>> {
        let response = self
            .http
            .post(self.worker_url(worker_id, "/heartbeat"))
            .send()
            .await?;
        let body: HeartbeatResponse = read_json(response).await?;
        Ok(body.assignment)
    }

    async fn assign_next(&self, worker_id: &WorkerId) -> Result<Option<Assignment>> {
        let response = self
            .http
            .post(self.worker_url(worker_id, "/assign"))
            .send()
            .await?;
        match response.status() {
            StatusCode::NO_CONTENT => Ok(None),
            StatusCode::NOT_FOUND => Err(SchedulerError::WorkerNotFound(worker_id.clone())),
            _ => read_json(response).await.map(Some),
        }
    }

    async fn start_task(&self, worker_id: &WorkerId, task_id: &TaskId) -> Result<Task> {
        let response = self
            .http
            .post(self.worker_url(worker_id, &format!("/tasks/{task_id}/start")))
            .send()
            .await?;
        self.read_task_report(response, worker_id, task_id).await
    }

    async fn report_result(&self, worker_id: &WorkerId, result: TaskResult) -> Result<Task> {
        // The master stamps completion with its own clock
        let report = ResultReport {
            success: result.success,
            output: result.output,
            error: result.error,
        };
        let response = self
            .http
            .post(self.worker_url(worker_id, &format!("/tasks/{}/result", result.task_id)))
            .json(&report)
            .send()
            .await?;
        self.read_task_report(response, worker_id, &result.task_id)
            .await
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&body)
        .map(|e| e.error)
        .unwrap_or(body);
    Err(SchedulerError::Api {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_drops_trailing_slash() {
        let client = ApiClient::new("http://127.0.0.1:8080/").unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:8080");
        assert_eq!(client.url("/tasks"), "http://127.0.0.1:8080/tasks");
        assert_eq!(
            client.worker_url(&WorkerId::from("w1"), "/assign"),
            "http://127.0.0.1:8080/workers/w1/assign"
        );
    }

    #[test]
    fn empty_base_url_is_rejected() {
        assert!(matches!(
            ApiClient::new("/"),
            Err(SchedulerError::Config(_))
        ));
    }
}

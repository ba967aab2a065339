// HTTP client for the dashboard backend

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::models::{
    CancelResponse, HostInfo, PlaybookInfo, RunRequest, RunResponse, StatusResponse,
};
use super::Backend;
use crate::output::errors::DashError;

pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, DashError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DashError::Settings {
                message: format!("Failed to create HTTP client: {}", e),
                suggestion: None,
            })?;

        let base_url = base_url.into().trim_end_matches('/').to_string();

        Ok(ApiClient { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Reject non-2xx responses, keeping the body for the error message
    async fn check(operation: &str, response: Response) -> Result<Response, DashError> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(DashError::Transport {
            operation: operation.to_string(),
            status: Some(status.as_u16()),
            message: if body.is_empty() {
                format!("backend answered {}", status)
            } else {
                format!("backend answered {}: {}", status, body.trim())
            },
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, DashError> {
        let operation = format!("GET {}", path);
        debug!(%operation, "request");

        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| DashError::transport(&operation, e.to_string()))?;

        Self::check(&operation, response)
            .await?
            .json()
            .await
            .map_err(|e| DashError::transport(&operation, format!("invalid response body: {}", e)))
    }
}

#[async_trait]
impl Backend for ApiClient {
    async fn hosts(&self) -> Result<HashMap<String, HostInfo>, DashError> {
        self.get_json("/api/hosts").await
    }

    async fn playbooks(&self) -> Result<Vec<PlaybookInfo>, DashError> {
        self.get_json("/api/playbooks").await
    }

    async fn run(&self, request: &RunRequest) -> Result<RunResponse, DashError> {
        let operation = "POST /api/run";
        debug!(
            playbook = %request.playbook,
            hosts = ?request.hosts,
            "submitting run"
        );

        let response = self
            .client
            .post(self.url("/api/run"))
            .json(request)
            .send()
            .await
            .map_err(|e| DashError::transport(operation, e.to_string()))?;

        Self::check(operation, response)
            .await?
            .json()
            .await
            .map_err(|e| DashError::transport(operation, format!("invalid response body: {}", e)))
    }

    async fn status(&self, job_id: &str) -> Result<StatusResponse, DashError> {
        self.get_json(&format!("/api/status/{}", job_id)).await
    }

    async fn cancel(&self, job_id: &str) -> Result<(), DashError> {
        let operation = format!("POST /api/cancel/{}", job_id);
        debug!(%operation, "request");

        let response = self
            .client
            .post(self.url(&format!("/api/cancel/{}", job_id)))
            .send()
            .await
            .map_err(|e| DashError::transport(&operation, e.to_string()))?;

        let body = Self::check(&operation, response)
            .await?
            .text()
            .await
            .unwrap_or_default();

        // An empty body is a success; an explicit {"success": false} is not
        let parsed: CancelResponse = serde_json::from_str(&body).unwrap_or_default();
        if parsed.success == Some(false) {
            return Err(DashError::transport(
                operation,
                "backend refused to cancel the job",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation_trims_base_url() {
        let client = ApiClient::new("http://127.0.0.1:5000/", Duration::from_secs(5)).unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:5000");
        assert_eq!(client.url("/api/hosts"), "http://127.0.0.1:5000/api/hosts");
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_transport_error() {
        // Port 9 (discard) is essentially never listening on localhost
        let client = ApiClient::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let err = client.status("abc").await.unwrap_err();
        assert!(err.is_transient());
    }
}

// Backend REST surface consumed by the dashboard

use std::collections::HashMap;

use async_trait::async_trait;

use crate::output::errors::DashError;

pub mod client;
pub mod models;
#[cfg(test)]
pub(crate) mod testing;

pub use client::ApiClient;
pub use models::{
    CancelResponse, ExtraVars, HostFacts, HostInfo, JobStatus, PlaybookInfo, RunRequest,
    RunResponse, StatusResponse,
};

/// Operations the dashboard needs from the execution backend.
///
/// `ApiClient` talks HTTP; tests plug in a scripted double.
#[async_trait]
pub trait Backend: Send + Sync {
    /// `GET /api/hosts`
    async fn hosts(&self) -> Result<HashMap<String, HostInfo>, DashError>;

    /// `GET /api/playbooks`
    async fn playbooks(&self) -> Result<Vec<PlaybookInfo>, DashError>;

    /// `POST /api/run`
    async fn run(&self, request: &RunRequest) -> Result<RunResponse, DashError>;

    /// `GET /api/status/:id`
    async fn status(&self, job_id: &str) -> Result<StatusResponse, DashError>;

    /// `POST /api/cancel/:id`
    async fn cancel(&self, job_id: &str) -> Result<(), DashError>;
}

// Scripted backend used by unit tests

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::models::{HostInfo, JobStatus, PlaybookInfo, RunRequest, RunResponse, StatusResponse};
use super::Backend;
use crate::output::errors::DashError;

/// Something the mock observed, in call order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    RunStarted(Vec<String>),
    RunFinished(Vec<String>),
    Status(String),
    Cancel(String),
}

#[derive(Default)]
struct MockInner {
    calls: Vec<Call>,
    runs: Vec<RunRequest>,
    next_job: usize,
    failing_run_hosts: HashSet<String>,
    failing_cancels: HashSet<String>,
    statuses: HashMap<String, VecDeque<Result<StatusResponse, String>>>,
    last_status: HashMap<String, StatusResponse>,
    hosts: HashMap<String, HostInfo>,
    playbooks: Vec<PlaybookInfo>,
}

#[derive(Default)]
pub struct MockBackend {
    inner: Mutex<MockInner>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `POST /api/run` fail whenever `host` is among the targets
    pub fn fail_run_for(&self, host: &str) {
        self.inner.lock().failing_run_hosts.insert(host.to_string());
    }

    pub fn fail_cancel_for(&self, job_id: &str) {
        self.inner.lock().failing_cancels.insert(job_id.to_string());
    }

    /// Queue a status answer for a job; the last answer repeats once the queue drains
    pub fn push_status(
        &self,
        job_id: &str,
        status: JobStatus,
        progress: Option<f64>,
        output: &str,
    ) {
        self.inner
            .lock()
            .statuses
            .entry(job_id.to_string())
            .or_default()
            .push_back(Ok(StatusResponse {
                status,
                progress,
                output: Some(output.to_string()),
            }));
    }

    /// Queue a transport failure for the next status fetch of a job
    pub fn push_status_error(&self, job_id: &str, message: &str) {
        self.inner
            .lock()
            .statuses
            .entry(job_id.to_string())
            .or_default()
            .push_back(Err(message.to_string()));
    }

    pub fn set_hosts(&self, hosts: HashMap<String, HostInfo>) {
        self.inner.lock().hosts = hosts;
    }

    pub fn set_playbooks(&self, playbooks: Vec<PlaybookInfo>) {
        self.inner.lock().playbooks = playbooks;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().calls.clone()
    }

    pub fn runs(&self) -> Vec<RunRequest> {
        self.inner.lock().runs.clone()
    }

    pub fn status_calls(&self, job_id: &str) -> usize {
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|c| matches!(c, Call::Status(id) if id == job_id))
            .count()
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn hosts(&self) -> Result<HashMap<String, HostInfo>, DashError> {
        Ok(self.inner.lock().hosts.clone())
    }

    async fn playbooks(&self) -> Result<Vec<PlaybookInfo>, DashError> {
        Ok(self.inner.lock().playbooks.clone())
    }

    async fn run(&self, request: &RunRequest) -> Result<RunResponse, DashError> {
        self.inner
            .lock()
            .calls
            .push(Call::RunStarted(request.hosts.clone()));

        // Give other tasks a chance to run between request and response
        tokio::task::yield_now().await;

        let mut inner = self.inner.lock();
        inner.calls.push(Call::RunFinished(request.hosts.clone()));

        if request
            .hosts
            .iter()
            .any(|h| inner.failing_run_hosts.contains(h))
        {
            return Err(DashError::transport("POST /api/run", "connection reset"));
        }

        inner.next_job += 1;
        inner.runs.push(request.clone());
        Ok(RunResponse {
            job_id: format!("job-{}", inner.next_job),
        })
    }

    async fn status(&self, job_id: &str) -> Result<StatusResponse, DashError> {
        self.inner
            .lock()
            .calls
            .push(Call::Status(job_id.to_string()));

        tokio::task::yield_now().await;

        let mut inner = self.inner.lock();

        let next = inner.statuses.get_mut(job_id).and_then(|q| q.pop_front());
        match next {
            Some(Ok(status)) => {
                inner.last_status.insert(job_id.to_string(), status.clone());
                Ok(status)
            }
            Some(Err(message)) => Err(DashError::transport(
                format!("GET /api/status/{}", job_id),
                message,
            )),
            None => inner.last_status.get(job_id).cloned().ok_or_else(|| {
                DashError::Transport {
                    operation: format!("GET /api/status/{}", job_id),
                    status: Some(404),
                    message: "unknown job".to_string(),
                }
            }),
        }
    }

    async fn cancel(&self, job_id: &str) -> Result<(), DashError> {
        let mut inner = self.inner.lock();
        inner.calls.push(Call::Cancel(job_id.to_string()));
        if inner.failing_cancels.contains(job_id) {
            return Err(DashError::transport(
                format!("POST /api/cancel/{}", job_id),
                "backend refused to cancel the job",
            ));
        }
        Ok(())
    }
}

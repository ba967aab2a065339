// Executor module - playbook dispatch to the backend

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::api::{Backend, PlaybookInfo};
use crate::baseline::ConfigStore;
use crate::jobs::JobTracker;
use crate::output::errors::DashError;
use crate::output::events::EventEmitter;

pub mod agents;
pub mod dispatcher;
pub mod extra_vars;
pub mod group;
pub mod sequential;

pub use agents::{AgentDispatch, AgentKind, AgentSettings};
pub use dispatcher::Dispatcher;
pub use extra_vars::{credential_vars, single_host_vars};
pub use group::{BaselineDispatch, GroupDispatch};
pub use sequential::SequentialRun;

/// Playbook as known to the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybookRef {
    pub name: String,
    pub path: String,
}

impl PlaybookRef {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        PlaybookRef {
            name: name.into(),
            path: path.into(),
        }
    }

    /// Value sent as `playbook` in run requests
    pub fn run_target(&self) -> &str {
        if self.path.is_empty() {
            &self.name
        } else {
            &self.path
        }
    }

    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.path
        } else {
            &self.name
        }
    }
}

impl From<&PlaybookInfo> for PlaybookRef {
    fn from(info: &PlaybookInfo) -> Self {
        PlaybookRef::new(info.name.clone(), info.path.clone())
    }
}

/// Where one run request stands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionState {
    Pending,
    Submitting,
    Submitted { job_id: String },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub hosts: Vec<String>,
    pub state: SubmissionState,
}

impl Submission {
    pub fn pending(hosts: Vec<String>) -> Self {
        Submission {
            hosts,
            state: SubmissionState::Pending,
        }
    }

    pub fn job_id(&self) -> Option<&str> {
        match &self.state {
            SubmissionState::Submitted { job_id } => Some(job_id),
            _ => None,
        }
    }
}

/// What a dispatch sent and how to follow it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub playbook: PlaybookRef,
    /// Id to watch or cancel; none when nothing reached the backend
    pub master_job_id: Option<String>,
    pub strategy: &'static str,
    pub submissions: Vec<Submission>,
}

impl DispatchReport {
    pub fn submitted(&self) -> usize {
        self.submissions.iter().filter(|s| s.job_id().is_some()).count()
    }

    pub fn failed(&self) -> usize {
        self.submissions
            .iter()
            .filter(|s| matches!(s.state, SubmissionState::Failed { .. }))
            .count()
    }

    pub fn job_ids(&self) -> Vec<&str> {
        self.submissions.iter().filter_map(|s| s.job_id()).collect()
    }
}

/// Components a dispatch strategy works against
#[derive(Clone)]
pub struct DispatchContext {
    pub backend: Arc<dyn Backend>,
    pub tracker: Arc<JobTracker>,
    pub configs: Arc<ConfigStore>,
    pub events: EventEmitter,
    /// Pause between sequential submissions
    pub submission_delay: Duration,
}

/// How a playbook reaches the backend for a set of hosts
#[async_trait]
pub trait DispatchStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Submit `playbook` for `hosts`. Submission failures are part of the
    /// report; errors are reserved for failures before anything was sent.
    async fn dispatch(
        &self,
        ctx: &DispatchContext,
        playbook: &PlaybookRef,
        hosts: &[String],
    ) -> Result<DispatchReport, DashError>;
}

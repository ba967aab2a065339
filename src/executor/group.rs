// Dispatch strategies: one job for the host set, or per-host baseline jobs

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use super::extra_vars::credential_vars;
use super::sequential::SequentialRun;
use super::{
    DispatchContext, DispatchReport, DispatchStrategy, PlaybookRef, Submission, SubmissionState,
};
use crate::api::{ExtraVars, RunRequest};
use crate::jobs::{JobRecord, MasterJob};
use crate::output::errors::DashError;
use crate::output::events::DashEvent;

/// Send one run request and record the resulting job.
///
/// Returns the backend job id. Nothing is recorded when the request fails.
pub(crate) async fn submit(
    ctx: &DispatchContext,
    playbook: &PlaybookRef,
    hosts: &[String],
    extra_vars: Option<ExtraVars>,
) -> Result<String, DashError> {
    ctx.events.emit(DashEvent::SubmissionStarted {
        playbook: playbook.label().to_string(),
        hosts: hosts.to_vec(),
    });

    let request = RunRequest {
        playbook: playbook.run_target().to_string(),
        hosts: hosts.to_vec(),
        extra_vars: extra_vars.clone(),
    };
    debug!(
        playbook = %request.playbook,
        hosts = ?request.hosts,
        extra_vars = ?extra_vars.as_ref().map(|v| v.keys().collect::<Vec<_>>()),
        "submitting run request"
    );

    match ctx.backend.run(&request).await {
        Ok(response) => {
            ctx.tracker.record(JobRecord::new(
                response.job_id.clone(),
                playbook.label(),
                hosts.to_vec(),
                extra_vars.unwrap_or_default(),
            ));
            info!(
                playbook = playbook.label(),
                hosts = ?hosts,
                job_id = %response.job_id,
                "job submitted"
            );
            ctx.events.emit(DashEvent::Submitted {
                playbook: playbook.label().to_string(),
                hosts: hosts.to_vec(),
                job_id: response.job_id.clone(),
            });
            Ok(response.job_id)
        }
        Err(e) => {
            let message = e.summary();
            warn!(
                playbook = playbook.label(),
                hosts = ?hosts,
                error = %message,
                "submission failed"
            );
            ctx.events.emit(DashEvent::SubmissionFailed {
                playbook: playbook.label().to_string(),
                hosts: hosts.to_vec(),
                error: message,
            });
            Err(e)
        }
    }
}

/// Register a backend job as the master of the hosts it covers
fn register_job_master(
    ctx: &DispatchContext,
    playbook: &PlaybookRef,
    hosts: &[String],
    job_id: &str,
) {
    ctx.tracker.register_master(MasterJob {
        master_job_id: job_id.to_string(),
        playbook: playbook.label().to_string(),
        hosts: hosts.to_vec(),
        created_at: Utc::now(),
        logical: false,
    });
    for host in hosts {
        ctx.tracker.associate(job_id, job_id, host);
    }
}

pub(super) fn single_report(
    strategy: &'static str,
    ctx: &DispatchContext,
    playbook: &PlaybookRef,
    hosts: &[String],
    result: Result<String, DashError>,
) -> DispatchReport {
    let state = match result {
        Ok(job_id) => {
            register_job_master(ctx, playbook, hosts, &job_id);
            SubmissionState::Submitted { job_id }
        }
        Err(e) => SubmissionState::Failed {
            error: e.summary(),
        },
    };

    let submission = Submission {
        hosts: hosts.to_vec(),
        state,
    };
    DispatchReport {
        playbook: playbook.clone(),
        master_job_id: submission.job_id().map(str::to_string),
        strategy,
        submissions: vec![submission],
    }
}

/// One job for the whole host set, extra vars untouched
pub struct GroupDispatch;

#[async_trait]
impl DispatchStrategy for GroupDispatch {
    fn name(&self) -> &'static str {
        "group"
    }

    async fn dispatch(
        &self,
        ctx: &DispatchContext,
        playbook: &PlaybookRef,
        hosts: &[String],
    ) -> Result<DispatchReport, DashError> {
        let result = submit(ctx, playbook, hosts, None).await;
        Ok(single_report(self.name(), ctx, playbook, hosts, result))
    }
}

/// Per-host credentials: a single job for one host, a sequential run for several
pub struct BaselineDispatch;

#[async_trait]
impl DispatchStrategy for BaselineDispatch {
    fn name(&self) -> &'static str {
        "baseline"
    }

    async fn dispatch(
        &self,
        ctx: &DispatchContext,
        playbook: &PlaybookRef,
        hosts: &[String],
    ) -> Result<DispatchReport, DashError> {
        if hosts.len() > 1 {
            let report = SequentialRun::new(ctx.clone(), playbook.clone(), hosts.to_vec())
                .run()
                .await;
            return Ok(report);
        }

        let host = match hosts.first() {
            Some(host) => host,
            None => {
                return Err(DashError::NotReady {
                    message: "no hosts selected".to_string(),
                })
            }
        };
        let config = ctx.configs.get(host).ok_or_else(|| DashError::DispatchBlocked {
            playbook: playbook.label().to_string(),
            hosts: vec![host.clone()],
        })?;

        let result = submit(ctx, playbook, hosts, Some(credential_vars(&config))).await;
        Ok(single_report(self.name(), ctx, playbook, hosts, result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::MockBackend;
    use crate::baseline::{ConfigStore, HostConfig};
    use crate::executor::extra_vars::NEW_HOSTNAME_VAR;
    use crate::jobs::JobTracker;
    use crate::output::events::EventEmitter;
    use crate::storage::KvStore;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;

    fn context(backend: Arc<MockBackend>) -> DispatchContext {
        DispatchContext {
            backend,
            tracker: Arc::new(JobTracker::new(20)),
            configs: Arc::new(ConfigStore::new(Arc::new(KvStore::in_memory()), 8)),
            events: EventEmitter::disabled(),
            submission_delay: Duration::ZERO,
        }
    }

    fn hosts(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_group_dispatch_sends_one_job() {
        let backend = Arc::new(MockBackend::new());
        let ctx = context(backend.clone());
        let playbook = PlaybookRef::new("agent.yml", "linux/ubuntu22/agents/agent.yml");

        let report = GroupDispatch
            .dispatch(&ctx, &playbook, &hosts(&["10.0.0.5", "10.0.0.6"]))
            .await
            .unwrap();

        let runs = backend.runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].playbook, "linux/ubuntu22/agents/agent.yml");
        assert_eq!(runs[0].hosts, hosts(&["10.0.0.5", "10.0.0.6"]));
        assert_eq!(runs[0].extra_vars, None);

        assert_eq!(report.master_job_id.as_deref(), Some("job-1"));
        let recent = ctx.tracker.recent();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].target_hosts, hosts(&["10.0.0.5", "10.0.0.6"]));
        assert_eq!(ctx.tracker.expected_hosts("job-1"), hosts(&["10.0.0.5", "10.0.0.6"]));
    }

    #[tokio::test]
    async fn test_group_failure_is_reported_not_raised() {
        let backend = Arc::new(MockBackend::new());
        backend.fail_run_for("10.0.0.6");
        let ctx = context(backend);

        let report = GroupDispatch
            .dispatch(&ctx, &PlaybookRef::new("agent.yml", ""), &hosts(&["10.0.0.5", "10.0.0.6"]))
            .await
            .unwrap();

        assert_eq!(report.master_job_id, None);
        assert_eq!(report.failed(), 1);
        assert!(ctx.tracker.recent().is_empty());
    }

    #[tokio::test]
    async fn test_single_host_baseline_carries_credentials() {
        let backend = Arc::new(MockBackend::new());
        let ctx = context(backend.clone());
        ctx.configs
            .save("10.0.0.5", HostConfig::new("SKY-INT-SDL-01", "Sup3rSecret!", "R00tPass!!"))
            .unwrap();

        let report = BaselineDispatch
            .dispatch(
                &ctx,
                &PlaybookRef::new("baseline.yml", "baseline.yml"),
                &hosts(&["10.0.0.5"]),
            )
            .await
            .unwrap();

        assert_eq!(report.submitted(), 1);
        let vars = backend.runs()[0].extra_vars.clone().unwrap();
        assert_eq!(vars[NEW_HOSTNAME_VAR], "SKY-INT-SDL-01");
        assert_eq!(ctx.tracker.associated("job-1")[0].hostname, "10.0.0.5");
    }
}

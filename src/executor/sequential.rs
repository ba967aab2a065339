// Sequential multi-host baseline dispatch
//
// Hosts are popped FIFO and submitted one at a time, each with its own
// credentials. The next request is only sent after the previous response
// (success or failure) has been observed, with a fixed pause in between.

use std::collections::VecDeque;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::extra_vars::single_host_vars;
use super::group::submit;
use super::{DispatchContext, DispatchReport, PlaybookRef, Submission, SubmissionState};
use crate::jobs::{generate_group_id, MasterJob};
use crate::output::events::DashEvent;

/// Where the run as a whole stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    /// Hosts left in the queue, nothing in flight
    Pending,
    /// A run request is awaiting its response
    Submitting,
    /// Queue drained
    Done,
}

pub struct SequentialRun {
    ctx: DispatchContext,
    playbook: PlaybookRef,
    master_job_id: String,
    pending: VecDeque<String>,
    submissions: Vec<Submission>,
    phase: RunPhase,
}

impl SequentialRun {
    /// Register a logical master for `hosts` and queue them in order
    pub fn new(ctx: DispatchContext, playbook: PlaybookRef, hosts: Vec<String>) -> Self {
        let master_job_id = generate_group_id();
        ctx.tracker.register_master(MasterJob {
            master_job_id: master_job_id.clone(),
            playbook: playbook.label().to_string(),
            hosts: hosts.clone(),
            created_at: Utc::now(),
            logical: true,
        });
        info!(
            master_job_id = %master_job_id,
            playbook = playbook.label(),
            hosts = hosts.len(),
            "sequential dispatch queued"
        );

        let submissions = hosts
            .iter()
            .map(|h| Submission::pending(vec![h.clone()]))
            .collect();
        let phase = if hosts.is_empty() {
            RunPhase::Done
        } else {
            RunPhase::Pending
        };

        SequentialRun {
            ctx,
            playbook,
            master_job_id,
            pending: hosts.into(),
            submissions,
            phase,
        }
    }

    pub fn master_job_id(&self) -> &str {
        &self.master_job_id
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn submissions(&self) -> &[Submission] {
        &self.submissions
    }

    /// Pop one host and submit it. Returns the finished submission, or None
    /// once the queue is empty.
    pub async fn step(&mut self) -> Option<&Submission> {
        let host = match self.pending.pop_front() {
            Some(host) => host,
            None => {
                self.phase = RunPhase::Done;
                return None;
            }
        };
        let index = self.submissions.len() - self.pending.len() - 1;

        self.phase = RunPhase::Submitting;
        self.submissions[index].state = SubmissionState::Submitting;
        debug!(master_job_id = %self.master_job_id, host = %host, "submitting");

        let state = match self.ctx.configs.get(&host) {
            Some(config) => {
                let vars = single_host_vars(&config, &host);
                let hosts = [host.clone()];
                match submit(&self.ctx, &self.playbook, &hosts, Some(vars)).await {
                    Ok(job_id) => {
                        self.ctx.tracker.associate(&self.master_job_id, &job_id, &host);
                        SubmissionState::Submitted { job_id }
                    }
                    Err(e) => SubmissionState::Failed { error: e.summary() },
                }
            }
            // Configuration removed after the pre-flight check
            None => {
                warn!(
                    master_job_id = %self.master_job_id,
                    host = %host,
                    "baseline configuration missing"
                );
                let error = "baseline configuration missing".to_string();
                self.ctx.events.emit(DashEvent::SubmissionFailed {
                    playbook: self.playbook.label().to_string(),
                    hosts: vec![host.clone()],
                    error: error.clone(),
                });
                SubmissionState::Failed { error }
            }
        };

        if let SubmissionState::Failed { error } = &state {
            self.ctx.tracker.record_failure(&self.master_job_id, &host, error);
        }
        self.submissions[index].state = state;
        self.phase = if self.pending.is_empty() {
            RunPhase::Done
        } else {
            RunPhase::Pending
        };

        self.submissions.get(index)
    }

    /// Drain the queue, pausing between submissions
    pub async fn run(mut self) -> DispatchReport {
        while self.step().await.is_some() {
            if self.phase == RunPhase::Pending && !self.ctx.submission_delay.is_zero() {
                tokio::time::sleep(self.ctx.submission_delay).await;
            }
        }

        let report = DispatchReport {
            playbook: self.playbook,
            master_job_id: Some(self.master_job_id),
            strategy: "baseline-sequential",
            submissions: self.submissions,
        };

        let (submitted, failed) = (report.submitted(), report.failed());
        info!(
            master_job_id = report.master_job_id.as_deref().unwrap_or_default(),
            submitted,
            failed,
            "sequential dispatch finished"
        );
        self.ctx.events.emit(DashEvent::SequenceFinished {
            master_job_id: report.master_job_id.clone().unwrap_or_default(),
            submitted,
            failed,
        });
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{Call, MockBackend};
    use crate::baseline::{ConfigStore, HostConfig};
    use crate::jobs::{JobTracker, HOST_SPECIFIC_VAR, SINGLE_HOST_EXECUTION_VAR};
    use crate::output::events::{create_event_channel, EventEmitter};
    use crate::storage::KvStore;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;

    fn hosts(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn baseline() -> PlaybookRef {
        PlaybookRef::new("baseline.yml", "")
    }

    fn context(
        backend: Arc<MockBackend>,
        events: EventEmitter,
        configured: &[&str],
    ) -> DispatchContext {
        let configs = Arc::new(ConfigStore::new(Arc::new(KvStore::in_memory()), 8));
        for (i, host) in configured.iter().enumerate() {
            let hostname = format!("SKY-INT-SDL-0{}", i + 1);
            configs
                .save(host, HostConfig::new(hostname, "Sup3rSecret!", "R00tPass!!"))
                .unwrap();
        }
        DispatchContext {
            backend,
            tracker: Arc::new(JobTracker::new(20)),
            configs,
            events,
            submission_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_submissions_are_strictly_sequential() {
        let backend = Arc::new(MockBackend::new());
        let ctx = context(backend.clone(), EventEmitter::disabled(), &["h1", "h2", "h3"]);

        let report = SequentialRun::new(ctx.clone(), baseline(), hosts(&["h1", "h2", "h3"]))
            .run()
            .await;

        let expected: Vec<Call> = ["h1", "h2", "h3"]
            .iter()
            .flat_map(|h| {
                vec![
                    Call::RunStarted(vec![h.to_string()]),
                    Call::RunFinished(vec![h.to_string()]),
                ]
            })
            .collect();
        assert_eq!(backend.calls(), expected);
        assert_eq!(report.submitted(), 3);
        assert_eq!(report.job_ids(), vec!["job-1", "job-2", "job-3"]);
    }

    #[tokio::test]
    async fn test_each_host_gets_a_tagged_single_host_record() {
        let backend = Arc::new(MockBackend::new());
        let ctx = context(backend.clone(), EventEmitter::disabled(), &["h1", "h2", "h3"]);

        let report = SequentialRun::new(ctx.clone(), baseline(), hosts(&["h1", "h2", "h3"]))
            .run()
            .await;

        let records = ctx.tracker.recent();
        assert_eq!(records.len(), 3);
        for (record, host) in records.iter().zip(["h1", "h2", "h3"]) {
            assert_eq!(record.target_hosts, vec![host.to_string()]);
            assert!(record.single_host_execution());
            assert_eq!(record.host_specific(), Some(host));
        }

        let runs = backend.runs();
        assert_eq!(runs[1].extra_vars.as_ref().unwrap()[SINGLE_HOST_EXECUTION_VAR], "true");
        assert_eq!(runs[1].extra_vars.as_ref().unwrap()[HOST_SPECIFIC_VAR], "h2");
        assert_eq!(runs[1].extra_vars.as_ref().unwrap()["new_hostname"], "SKY-INT-SDL-02");

        let master = report.master_job_id.unwrap();
        assert_eq!(ctx.tracker.associated(&master).len(), 3);
        assert_eq!(ctx.tracker.expected_hosts(&master), hosts(&["h1", "h2", "h3"]));
    }

    #[tokio::test]
    async fn test_failed_host_does_not_stop_the_queue() {
        let backend = Arc::new(MockBackend::new());
        backend.fail_run_for("h2");
        let (events, mut rx) = create_event_channel();
        let ctx = context(backend.clone(), events, &["h1", "h2", "h3"]);

        let report = SequentialRun::new(ctx.clone(), baseline(), hosts(&["h1", "h2", "h3"]))
            .run()
            .await;

        assert_eq!(report.submitted(), 2);
        assert_eq!(report.failed(), 1);
        assert!(matches!(report.submissions[1].state, SubmissionState::Failed { .. }));
        assert_eq!(backend.runs().len(), 2);

        let master = report.master_job_id.unwrap();
        assert_eq!(ctx.tracker.failures(&master)[0].hostname, "h2");

        let mut failed_events = 0;
        let mut finished = None;
        while let Ok(event) = rx.try_recv() {
            match event {
                DashEvent::SubmissionFailed { hosts, .. } => {
                    assert_eq!(hosts, vec!["h2"]);
                    failed_events += 1;
                }
                DashEvent::SequenceFinished {
                    submitted, failed, ..
                } => finished = Some((submitted, failed)),
                _ => {}
            }
        }
        assert_eq!(failed_events, 1);
        assert_eq!(finished, Some((2, 1)));
    }

    #[tokio::test]
    async fn test_step_walks_the_state_machine() {
        let backend = Arc::new(MockBackend::new());
        let ctx = context(backend, EventEmitter::disabled(), &["h1", "h2"]);
        let mut run = SequentialRun::new(ctx, baseline(), hosts(&["h1", "h2"]));

        assert_eq!(run.phase(), RunPhase::Pending);
        assert!(run
            .submissions()
            .iter()
            .all(|s| s.state == SubmissionState::Pending));

        let first = run.step().await.cloned().unwrap();
        assert_eq!(first.job_id(), Some("job-1"));
        assert_eq!(run.phase(), RunPhase::Pending);
        assert_eq!(run.submissions()[1].state, SubmissionState::Pending);

        run.step().await;
        assert_eq!(run.phase(), RunPhase::Done);
        assert!(run.step().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_only_between_submissions() {
        let backend = Arc::new(MockBackend::new());
        let mut ctx = context(backend.clone(), EventEmitter::disabled(), &["h1", "h2", "h3"]);
        ctx.submission_delay = Duration::from_secs(1);

        let started = tokio::time::Instant::now();
        let report = SequentialRun::new(ctx.clone(), baseline(), hosts(&["h1", "h2", "h3"]))
            .run()
            .await;
        assert_eq!(report.submitted(), 3);
        // Two gaps for three hosts, nothing before the first or after the last
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(2500), "{:?}", elapsed);

        let started = tokio::time::Instant::now();
        SequentialRun::new(ctx, baseline(), hosts(&["h1"])).run().await;
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_missing_config_marks_host_failed() {
        let backend = Arc::new(MockBackend::new());
        let ctx = context(backend.clone(), EventEmitter::disabled(), &["h1"]);

        let report = SequentialRun::new(ctx, baseline(), hosts(&["h1", "h2"]))
            .run()
            .await;

        assert_eq!(report.submitted(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(backend.runs().len(), 1);
    }
}

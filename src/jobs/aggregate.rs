// Consolidated view of a logical multi-host job

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::association::{HeuristicResolver, JobResolver, JobTracker, ResolvedJob};
use super::cache::{OutputCache, OutputCacheEntry};
use crate::api::{Backend, JobStatus};

/// Running jobs contribute at most this much to the master progress
const RUNNING_PROGRESS_CAP: u8 = 90;

#[derive(Debug, Clone, PartialEq)]
pub enum SectionBody {
    Output(String),
    /// Job resolved but it has not produced output yet
    Waiting,
    /// Last refresh failed; the section shows the error instead of output
    FetchError(String),
    /// The run request for this host was rejected
    SubmissionFailed(String),
    /// No job could be associated with the host (yet)
    Unresolved,
}

/// One block of the merged transcript
#[derive(Debug, Clone, PartialEq)]
pub struct HostSection {
    /// Hosts served by this job, empty for a standalone job
    pub hosts: Vec<String>,
    pub job_id: Option<String>,
    pub status: Option<JobStatus>,
    pub progress: u8,
    pub body: SectionBody,
}

impl HostSection {
    fn from_entry(host: Option<&str>, entry: &OutputCacheEntry) -> Self {
        let body = match &entry.fetch_error {
            Some(error) => SectionBody::FetchError(error.clone()),
            None if entry.output.trim().is_empty() => SectionBody::Waiting,
            None => SectionBody::Output(entry.output.clone()),
        };
        HostSection {
            hosts: host.map(|h| vec![h.to_string()]).unwrap_or_default(),
            job_id: Some(entry.job_id.clone()),
            status: Some(entry.status),
            progress: entry.progress,
            body,
        }
    }

    fn without_job(host: &str, body: SectionBody) -> Self {
        let status = match body {
            SectionBody::SubmissionFailed(_) => Some(JobStatus::Failed),
            _ => None,
        };
        HostSection {
            hosts: vec![host.to_string()],
            job_id: None,
            status,
            progress: 0,
            body,
        }
    }

    /// `==== HOST: ... ====` header line
    pub fn header(&self) -> String {
        match (&self.job_id, self.hosts.is_empty()) {
            (Some(job_id), true) => format!("==== JOB: {} ====", job_id),
            (Some(job_id), false) => {
                format!("==== HOST: {} (Job: {}) ====", self.hosts.join(", "), job_id)
            }
            (None, _) => match self.body {
                SectionBody::SubmissionFailed(_) => {
                    format!("==== HOST: {} (not submitted) ====", self.hosts.join(", "))
                }
                _ => format!("==== HOST: {} (unresolved) ====", self.hosts.join(", ")),
            },
        }
    }

    pub fn text(&self) -> String {
        match &self.body {
            SectionBody::Output(output) => output.clone(),
            SectionBody::Waiting => "Waiting for output...".to_string(),
            SectionBody::FetchError(error) => format!("Error fetching output: {}", error),
            SectionBody::SubmissionFailed(error) => format!("Submission failed: {}", error),
            SectionBody::Unresolved => "No job associated with this host yet".to_string(),
        }
    }
}

/// Snapshot of a master job
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateView {
    pub master_job_id: String,
    pub playbook: Option<String>,
    pub status: JobStatus,
    /// Never lower than a previous view of the same master
    pub progress: u8,
    pub sections: Vec<HostSection>,
    /// Expected hosts with no job yet
    pub unresolved: Vec<String>,
    /// True once no further change is expected: every job is terminal and
    /// every host either has a job or was rejected at submission
    pub settled: bool,
    pub merged_text: String,
}

/// Outcome of cancelling a master job
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CancelReport {
    pub cancelled: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl CancelReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Combine individual job states into the master status.
///
/// Completed only when every job completed, failed as soon as one failed,
/// running otherwise. A cancelled job therefore keeps the master running;
/// whether anything is still moving is `AggregateView::settled`.
pub fn aggregate_status(statuses: &[JobStatus]) -> JobStatus {
    if statuses.is_empty() {
        return JobStatus::Running;
    }
    if statuses.iter().any(|s| s.is_failure()) {
        JobStatus::Failed
    } else if statuses.iter().all(|s| *s == JobStatus::Completed) {
        JobStatus::Completed
    } else {
        JobStatus::Running
    }
}

/// Mean of per-job progress; running jobs are capped, finished ones count as 100
pub fn aggregate_progress(jobs: &[(JobStatus, u8)]) -> u8 {
    if jobs.is_empty() {
        return 0;
    }
    let total: u32 = jobs
        .iter()
        .map(|(status, progress)| {
            if status.is_terminal() {
                100
            } else {
                u32::from((*progress).min(RUNNING_PROGRESS_CAP))
            }
        })
        .sum();
    (total / jobs.len() as u32) as u8
}

pub struct Aggregator {
    backend: Arc<dyn Backend>,
    tracker: Arc<JobTracker>,
    resolver: Arc<dyn JobResolver>,
    cache: Arc<OutputCache>,
    master_progress: RwLock<HashMap<String, u8>>,
}

impl Aggregator {
    pub fn new(
        backend: Arc<dyn Backend>,
        tracker: Arc<JobTracker>,
        cache: Arc<OutputCache>,
    ) -> Self {
        let resolver = Arc::new(HeuristicResolver::new(tracker.clone()));
        Aggregator {
            backend,
            tracker,
            resolver,
            cache,
            master_progress: RwLock::new(HashMap::new()),
        }
    }

    /// Swap the job resolution strategy
    pub fn with_resolver(mut self, resolver: Arc<dyn JobResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn tracker(&self) -> &Arc<JobTracker> {
        &self.tracker
    }

    /// Individual jobs of a master, in expected-host order
    pub fn resolve_individual_jobs(&self, master_job_id: &str) -> Vec<ResolvedJob> {
        let expected = self.tracker.expected_hosts(master_job_id);
        self.resolver.resolve(master_job_id, &expected)
    }

    /// Cached state of a single backend job
    pub async fn fetch_output(&self, job_id: &str) -> OutputCacheEntry {
        self.cache.fetch(self.backend.as_ref(), job_id).await
    }

    fn raise_master_progress(&self, master_job_id: &str, progress: u8) -> u8 {
        let mut floors = self.master_progress.write();
        let floor = floors.entry(master_job_id.to_string()).or_insert(0);
        if progress > *floor {
            *floor = progress;
        }
        *floor
    }

    /// Build the consolidated view of a master job.
    ///
    /// An id the tracker has never seen is treated as a single backend job.
    pub async fn aggregate(&self, master_job_id: &str) -> AggregateView {
        self.tracker.refresh();
        if !self.tracker.is_known(master_job_id) {
            return self.aggregate_standalone(master_job_id).await;
        }

        let master = self.tracker.master(master_job_id);
        let expected = self.tracker.expected_hosts(master_job_id);
        let resolved = self.resolver.resolve(master_job_id, &expected);
        let failures = self.tracker.failures(master_job_id);

        // A group job serves several hosts; fetch each job once
        let mut job_ids: Vec<String> = Vec::new();
        for r in &resolved {
            if !job_ids.contains(&r.job_id) {
                job_ids.push(r.job_id.clone());
            }
        }
        let fetched = join_all(job_ids.iter().map(|id| self.fetch_output(id))).await;
        let entries: HashMap<String, OutputCacheEntry> =
            job_ids.iter().cloned().zip(fetched).collect();

        let mut sections: Vec<HostSection> = Vec::new();
        let mut unresolved: Vec<String> = Vec::new();
        let mut statuses: Vec<JobStatus> = Vec::new();

        for host in &expected {
            let job = resolved
                .iter()
                .find(|r| &r.hostname == host)
                .and_then(|r| entries.get(&r.job_id));

            match job {
                Some(entry) => {
                    if let Some(section) = sections
                        .iter_mut()
                        .find(|s| s.job_id.as_deref() == Some(entry.job_id.as_str()))
                    {
                        section.hosts.push(host.clone());
                    } else {
                        sections.push(HostSection::from_entry(Some(host), entry));
                    }
                }
                None => match failures.iter().find(|f| &f.hostname == host) {
                    Some(failure) => {
                        statuses.push(JobStatus::Failed);
                        sections.push(HostSection::without_job(
                            host,
                            SectionBody::SubmissionFailed(failure.error.clone()),
                        ));
                    }
                    None => {
                        unresolved.push(host.clone());
                        sections.push(HostSection::without_job(host, SectionBody::Unresolved));
                    }
                },
            }
        }

        if !unresolved.is_empty() {
            debug!(master_job_id, unresolved = ?unresolved, "hosts without a job");
        }

        let jobs: Vec<(JobStatus, u8)> = job_ids
            .iter()
            .filter_map(|id| entries.get(id))
            .map(|e| (e.status, e.progress))
            .collect();
        statuses.extend(jobs.iter().map(|(s, _)| *s));

        let status = aggregate_status(&statuses);
        let settled = unresolved.is_empty()
            && !statuses.is_empty()
            && jobs.iter().all(|(s, _)| s.is_terminal());
        let progress = if settled {
            100
        } else {
            aggregate_progress(&jobs)
        };
        let progress = self.raise_master_progress(master_job_id, progress);

        if settled {
            info!(master_job_id, status = %status, "master job settled");
        }

        let merged_text = merge_sections(expected.len(), &sections);
        AggregateView {
            master_job_id: master_job_id.to_string(),
            playbook: master.map(|m| m.playbook),
            status,
            progress,
            sections,
            unresolved,
            settled,
            merged_text,
        }
    }

    async fn aggregate_standalone(&self, job_id: &str) -> AggregateView {
        let entry = self.fetch_output(job_id).await;
        let progress = if entry.status.is_terminal() {
            100
        } else {
            entry.progress
        };
        let progress = self.raise_master_progress(job_id, progress);
        let sections = vec![HostSection::from_entry(None, &entry)];

        AggregateView {
            master_job_id: job_id.to_string(),
            playbook: None,
            status: aggregate_status(&[entry.status]),
            progress,
            merged_text: merge_sections(1, &sections),
            sections,
            unresolved: Vec::new(),
            settled: entry.status.is_terminal(),
        }
    }

    /// Cancel every individual job of a master. Each job is attempted
    /// regardless of the others; failures are reported, not retried.
    pub async fn cancel(&self, master_job_id: &str) -> CancelReport {
        self.tracker.refresh();
        let job_ids: Vec<String> = if self.tracker.is_known(master_job_id) {
            let mut ids: Vec<String> = Vec::new();
            for r in self.resolve_individual_jobs(master_job_id) {
                if !ids.contains(&r.job_id) {
                    ids.push(r.job_id);
                }
            }
            ids
        } else {
            vec![master_job_id.to_string()]
        };

        let results = join_all(job_ids.iter().map(|id| self.backend.cancel(id))).await;

        let mut report = CancelReport::default();
        for (job_id, result) in job_ids.into_iter().zip(results) {
            match result {
                Ok(()) => {
                    info!(master_job_id, %job_id, "job cancelled");
                    report.cancelled.push(job_id);
                }
                Err(e) => {
                    let message = e.summary();
                    warn!(master_job_id, %job_id, error = %message, "cancel failed");
                    report.failed.push((job_id, message));
                }
            }
        }
        report
    }
}

/// Concatenate sections into the transcript shown to the operator
fn merge_sections(host_count: usize, sections: &[HostSection]) -> String {
    let mut text = String::new();
    if host_count > 1 {
        text.push_str(&format!(
            "====== MULTI-HOST EXECUTION ({} hosts) ======\n",
            host_count
        ));
    }
    for section in sections {
        text.push('\n');
        text.push_str(&section.header());
        text.push('\n');
        text.push_str(&section.text());
        text.push('\n');
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::MockBackend;
    use crate::api::ExtraVars;
    use crate::jobs::association::{JobRecord, MasterJob};
    use crate::output::errors::DashError;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn hosts(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn setup(backend: Arc<MockBackend>) -> Aggregator {
        Aggregator::new(
            backend,
            Arc::new(JobTracker::new(20)),
            Arc::new(OutputCache::new(Duration::ZERO, 30)),
        )
    }

    fn register_sequence(tracker: &JobTracker, id: &str, members: &[&str]) {
        tracker.register_master(MasterJob {
            master_job_id: id.to_string(),
            playbook: "baseline.yml".to_string(),
            hosts: hosts(members),
            created_at: Utc::now(),
            logical: true,
        });
    }

    #[test]
    fn test_status_rules() {
        use JobStatus::*;
        assert_eq!(aggregate_status(&[]), Running);
        assert_eq!(aggregate_status(&[Completed, Completed]), Completed);
        assert_eq!(aggregate_status(&[Completed, Running]), Running);
        assert_eq!(aggregate_status(&[Completed, Failed, Running]), Failed);
        assert_eq!(aggregate_status(&[Completed, NotFound]), Failed);
        assert_eq!(aggregate_status(&[Completed, Cancelled]), Running);
        assert_eq!(aggregate_status(&[Cancelled, Cancelled]), Running);
        assert_eq!(aggregate_status(&[Cancelled, Failed]), Failed);
        assert_eq!(aggregate_status(&[Unknown, Completed]), Running);
    }

    #[test]
    fn test_progress_caps_running_jobs() {
        use JobStatus::*;
        assert_eq!(aggregate_progress(&[]), 0);
        assert_eq!(aggregate_progress(&[(Running, 99)]), 90);
        assert_eq!(aggregate_progress(&[(Running, 50), (Completed, 100)]), 75);
        assert_eq!(aggregate_progress(&[(Failed, 10), (Completed, 100)]), 100);
    }

    #[tokio::test]
    async fn test_partial_failure_view() {
        let backend = Arc::new(MockBackend::new());
        backend.push_status("j1", JobStatus::Completed, Some(100.0), "ok: [A]");
        backend.push_status("j2", JobStatus::Failed, Some(100.0), "fatal: [B]");
        backend.push_status("j3", JobStatus::Running, Some(50.0), "TASK [C]");
        let aggregator = setup(backend);

        let tracker = aggregator.tracker().clone();
        register_sequence(&tracker, "m", &["A", "B", "C"]);
        tracker.associate("m", "j1", "A");
        tracker.associate("m", "j2", "B");
        tracker.associate("m", "j3", "C");

        let view = aggregator.aggregate("m").await;

        assert_eq!(view.status, JobStatus::Failed);
        assert!(!view.settled);
        // (100 + 100 + 50) / 3
        assert_eq!(view.progress, 83);
        assert!(view.merged_text.starts_with("====== MULTI-HOST EXECUTION (3 hosts) ======"));
        let a = view.merged_text.find("==== HOST: A (Job: j1) ====").unwrap();
        let b = view.merged_text.find("==== HOST: B (Job: j2) ====").unwrap();
        let c = view.merged_text.find("==== HOST: C (Job: j3) ====").unwrap();
        assert!(a < b && b < c);
        assert!(view.merged_text.contains("fatal: [B]"));
    }

    #[tokio::test]
    async fn test_fetch_failure_degrades_one_section() {
        let backend = Arc::new(MockBackend::new());
        backend.push_status("j1", JobStatus::Running, Some(40.0), "TASK [A]");
        backend.push_status("j1", JobStatus::Running, Some(60.0), "TASK [A] more");
        backend.push_status("j2", JobStatus::Running, Some(40.0), "TASK [B]");
        backend.push_status_error("j2", "connection reset");
        let aggregator = setup(backend);

        let tracker = aggregator.tracker().clone();
        register_sequence(&tracker, "m", &["A", "B"]);
        tracker.associate("m", "j1", "A");
        tracker.associate("m", "j2", "B");

        let first = aggregator.aggregate("m").await;
        let second = aggregator.aggregate("m").await;

        assert_eq!(second.status, JobStatus::Running);
        assert!(second.progress >= first.progress);
        assert!(second.merged_text.contains("TASK [A] more"));
        assert!(second.merged_text.contains("Error fetching output:"));
        assert!(matches!(second.sections[1].body, SectionBody::FetchError(_)));
        assert_eq!(second.sections[1].status, Some(JobStatus::Running));
    }

    #[tokio::test]
    async fn test_not_completed_until_every_job_completed() {
        let backend = Arc::new(MockBackend::new());
        backend.push_status("j1", JobStatus::Completed, None, "done");
        backend.push_status_error("j2", "timed out");
        let aggregator = setup(backend);

        let tracker = aggregator.tracker().clone();
        register_sequence(&tracker, "m", &["A", "B"]);
        tracker.associate("m", "j1", "A");
        tracker.associate("m", "j2", "B");

        let view = aggregator.aggregate("m").await;
        assert_eq!(view.status, JobStatus::Running);
        assert!(!view.settled);
    }

    #[tokio::test]
    async fn test_group_job_renders_once_for_all_hosts() {
        let backend = Arc::new(MockBackend::new());
        backend.push_status("j1", JobStatus::Completed, None, "PLAY RECAP");
        let aggregator = setup(backend.clone());

        let tracker = aggregator.tracker().clone();
        tracker.register_master(MasterJob {
            master_job_id: "j1".to_string(),
            playbook: "agent.yml".to_string(),
            hosts: hosts(&["A", "B"]),
            created_at: Utc::now(),
            logical: false,
        });
        tracker.associate("j1", "j1", "A");
        tracker.associate("j1", "j1", "B");

        let view = aggregator.aggregate("j1").await;

        assert_eq!(view.sections.len(), 1);
        assert!(view.merged_text.contains("==== HOST: A, B (Job: j1) ===="));
        assert_eq!(view.status, JobStatus::Completed);
        assert_eq!(view.progress, 100);
        assert!(view.settled);
        assert_eq!(backend.status_calls("j1"), 1);
    }

    #[tokio::test]
    async fn test_unresolved_and_rejected_hosts() {
        let backend = Arc::new(MockBackend::new());
        backend.push_status("j1", JobStatus::Completed, None, "done");
        let aggregator = setup(backend);

        let tracker = aggregator.tracker().clone();
        register_sequence(&tracker, "m", &["A", "B", "C"]);
        tracker.associate("m", "j1", "A");
        tracker.record_failure("m", "B", "connection reset");

        let view = aggregator.aggregate("m").await;
        assert_eq!(view.unresolved, vec!["C"]);
        assert_eq!(view.status, JobStatus::Failed);
        assert!(!view.settled);
        assert!(view.merged_text.contains("==== HOST: B (not submitted) ===="));
        assert!(view.merged_text.contains("==== HOST: C (unresolved) ===="));

        // C shows up on the recent stack later
        tracker.record(JobRecord::new("j3", "baseline.yml", hosts(&["C"]), ExtraVars::new()));
        let resolved = aggregator.resolve_individual_jobs("m");
        assert_eq!(resolved.len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_host_settles_without_completing() {
        let backend = Arc::new(MockBackend::new());
        backend.push_status("j1", JobStatus::Completed, None, "done");
        backend.push_status("j2", JobStatus::Cancelled, None, "cancelled");
        let aggregator = setup(backend);

        let tracker = aggregator.tracker().clone();
        register_sequence(&tracker, "m", &["A", "B"]);
        tracker.associate("m", "j1", "A");
        tracker.associate("m", "j2", "B");

        let view = aggregator.aggregate("m").await;
        assert_eq!(view.status, JobStatus::Running);
        assert!(view.settled);
        assert_eq!(view.progress, 100);
    }

    struct FixedResolver(Vec<(&'static str, &'static str)>);

    impl JobResolver for FixedResolver {
        fn resolve_host(
            &self,
            master_job_id: &str,
            hostname: &str,
        ) -> Result<ResolvedJob, DashError> {
            self.0
                .iter()
                .find(|(host, _)| *host == hostname)
                .map(|(host, job)| ResolvedJob {
                    job_id: job.to_string(),
                    hostname: host.to_string(),
                })
                .ok_or_else(|| DashError::ResolutionMiss {
                    master_job_id: master_job_id.to_string(),
                    host: hostname.to_string(),
                })
        }
    }

    #[tokio::test]
    async fn test_custom_resolver_drives_the_view() {
        let backend = Arc::new(MockBackend::new());
        backend.push_status("x1", JobStatus::Completed, None, "ok: [A]");
        let aggregator =
            setup(backend.clone()).with_resolver(Arc::new(FixedResolver(vec![("A", "x1")])));

        let tracker = aggregator.tracker().clone();
        register_sequence(&tracker, "m", &["A", "B"]);
        // Ignored: the custom resolver is the only source of jobs
        tracker.associate("m", "j9", "B");

        let view = aggregator.aggregate("m").await;
        assert_eq!(view.unresolved, vec!["B"]);
        assert!(view.merged_text.contains("==== HOST: A (Job: x1) ===="));
        assert_eq!(backend.status_calls("j9"), 0);

        let report = aggregator.cancel("m").await;
        assert_eq!(report.cancelled, vec!["x1"]);
    }

    #[tokio::test]
    async fn test_unknown_id_is_a_standalone_job() {
        let backend = Arc::new(MockBackend::new());
        backend.push_status("job-9", JobStatus::Running, Some(30.0), "TASK [x]");
        let aggregator = setup(backend);

        let view = aggregator.aggregate("job-9").await;
        assert_eq!(view.sections.len(), 1);
        assert!(view.merged_text.contains("==== JOB: job-9 ===="));
        assert!(!view.merged_text.contains("MULTI-HOST"));
        assert_eq!(view.progress, 30);
    }

    #[tokio::test]
    async fn test_master_progress_is_monotonic() {
        let backend = Arc::new(MockBackend::new());
        backend.push_status("j1", JobStatus::Running, Some(80.0), "");
        let aggregator = setup(backend.clone());

        let tracker = aggregator.tracker().clone();
        register_sequence(&tracker, "m", &["A", "B"]);
        tracker.associate("m", "j1", "A");

        // One of two hosts: mean over resolved jobs only
        let first = aggregator.aggregate("m").await;
        assert_eq!(first.progress, 80);

        // Second host joins at 0, the mean drops to 40 but the view holds
        backend.push_status("j2", JobStatus::Running, Some(0.0), "");
        tracker.associate("m", "j2", "B");
        let second = aggregator.aggregate("m").await;
        assert_eq!(second.progress, 80);
    }

    #[tokio::test]
    async fn test_cancel_attempts_every_job() {
        let backend = Arc::new(MockBackend::new());
        backend.fail_cancel_for("j2");
        let aggregator = setup(backend.clone());

        let tracker = aggregator.tracker().clone();
        register_sequence(&tracker, "m", &["A", "B", "C"]);
        tracker.associate("m", "j1", "A");
        tracker.associate("m", "j2", "B");
        tracker.associate("m", "j3", "C");

        let report = aggregator.cancel("m").await;
        assert_eq!(report.cancelled, vec!["j1", "j3"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "j2");
        assert!(!report.is_complete());
    }
}

// Job association table
//
// The backend runs one job per request and has no notion of a group, so the
// logical multi-host job ("master") is reconstructed here from what was
// dispatched: explicit associations recorded at dispatch time, a bounded
// stack of recent dispatches, and a direct host -> latest job lookup.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::api::ExtraVars;
use crate::output::errors::DashError;
use crate::storage::{KvStore, JOB_TRACKER_KEY};

/// Marker set on every job submitted by sequential baseline dispatch
pub const SINGLE_HOST_EXECUTION_VAR: &str = "single_host_execution";
/// Host a single-host job was submitted for
pub const HOST_SPECIFIC_VAR: &str = "host_specific";

/// Extra vars whose name contains one of these are never persisted
const REDACTED_VAR_MARKERS: &[&str] = &["password", "_key", "_content"];

/// One backend execution unit
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub playbook: String,
    pub target_hosts: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub extra_vars: ExtraVars,
}

impl JobRecord {
    pub fn new(
        job_id: impl Into<String>,
        playbook: impl Into<String>,
        target_hosts: Vec<String>,
        extra_vars: ExtraVars,
    ) -> Self {
        JobRecord {
            job_id: job_id.into(),
            playbook: playbook.into(),
            target_hosts,
            created_at: Utc::now(),
            extra_vars,
        }
    }

    pub fn is_single_host(&self) -> bool {
        self.target_hosts.len() == 1
    }

    pub fn single_host_execution(&self) -> bool {
        self.extra_vars
            .get(SINGLE_HOST_EXECUTION_VAR)
            .map(|v| v == "true")
            .unwrap_or(false)
    }

    pub fn host_specific(&self) -> Option<&str> {
        self.extra_vars.get(HOST_SPECIFIC_VAR).map(String::as_str)
    }

    /// Copy without credentials, agent keys or inline scripts, for anything
    /// that outlives the process
    fn redacted(&self) -> JobRecord {
        let mut record = self.clone();
        record
            .extra_vars
            .retain(|k, _| !REDACTED_VAR_MARKERS.iter().any(|m| k.contains(m)));
        record
    }
}

// Extra vars carry credentials; only their names are printed
impl fmt::Debug for JobRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRecord")
            .field("job_id", &self.job_id)
            .field("playbook", &self.playbook)
            .field("target_hosts", &self.target_hosts)
            .field("created_at", &self.created_at)
            .field("extra_vars", &self.extra_vars.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A logical job covering a set of hosts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterJob {
    pub master_job_id: String,
    pub playbook: String,
    pub hosts: Vec<String>,
    pub created_at: DateTime<Utc>,
    /// True when the id is client-side only (sequential dispatch), false when
    /// it is a real backend job
    pub logical: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssociatedJob {
    pub job_id: String,
    pub hostname: String,
    pub associated_at: DateTime<Utc>,
}

/// A host whose run request was rejected, so it never got a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionFailure {
    pub hostname: String,
    pub error: String,
}

/// An individual job resolved for one host of a master
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedJob {
    pub job_id: String,
    pub hostname: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HostJob {
    job_id: String,
    playbook: String,
    created_at: DateTime<Utc>,
}

#[derive(Default, Serialize, Deserialize)]
#[serde(default)]
struct TrackerState {
    recent: VecDeque<JobRecord>,
    masters: HashMap<String, MasterJob>,
    associations: HashMap<String, Vec<AssociatedJob>>,
    failures: HashMap<String, Vec<SubmissionFailure>>,
    host_jobs: HashMap<String, HostJob>,
}

impl TrackerState {
    fn snapshot(&self) -> TrackerState {
        TrackerState {
            recent: self.recent.iter().map(JobRecord::redacted).collect(),
            masters: self.masters.clone(),
            associations: self.associations.clone(),
            failures: self.failures.clone(),
            host_jobs: self.host_jobs.clone(),
        }
    }

    /// Bound every table by `capacity`.
    ///
    /// The recent stack keeps its newest records. Masters keep the newest
    /// `capacity` by creation time, and an evicted master takes its
    /// associations and failures with it. Host lookups older than every
    /// remaining master can no longer match one and are dropped too.
    fn evict(&mut self, capacity: usize) {
        while self.recent.len() > capacity {
            if let Some(evicted) = self.recent.pop_front() {
                debug!(job_id = %evicted.job_id, "evicted from recent jobs");
            }
        }

        if self.masters.len() <= capacity {
            return;
        }

        let mut by_age: Vec<(DateTime<Utc>, String)> = self
            .masters
            .values()
            .map(|m| (m.created_at, m.master_job_id.clone()))
            .collect();
        by_age.sort();
        let excess = by_age.len() - capacity;
        for (_, master_job_id) in by_age.into_iter().take(excess) {
            self.masters.remove(&master_job_id);
            self.associations.remove(&master_job_id);
            self.failures.remove(&master_job_id);
            debug!(%master_job_id, "evicted master job");
        }

        if let Some(oldest) = self.masters.values().map(|m| m.created_at).min() {
            self.host_jobs.retain(|_, job| job.created_at >= oldest);
        }
    }
}

/// Table of dispatched jobs and their grouping.
///
/// With a backing store every mutation is applied to the stored table under
/// the store's lock and written back minus credentials, so `watch` and
/// `cancel` work from a later invocation and two invocations dispatching at
/// once both keep their jobs.
pub struct JobTracker {
    state: RwLock<TrackerState>,
    capacity: usize,
    store: Option<Arc<KvStore>>,
}

impl JobTracker {
    pub fn new(capacity: usize) -> Self {
        JobTracker {
            state: RwLock::new(TrackerState::default()),
            capacity: capacity.max(1),
            store: None,
        }
    }

    /// Tracker restored from and persisted to `store`
    pub fn with_store(capacity: usize, store: Arc<KvStore>) -> Self {
        let state: TrackerState = store.get(JOB_TRACKER_KEY).unwrap_or_default();
        debug!(
            masters = state.masters.len(),
            recent = state.recent.len(),
            "job tracker restored"
        );
        JobTracker {
            state: RwLock::new(state),
            capacity: capacity.max(1),
            store: Some(store),
        }
    }

    /// Pick up jobs recorded by other invocations since this one started
    pub fn refresh(&self) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.reload() {
            warn!(error = %e.summary(), "failed to reload job tracker");
            return;
        }
        *self.state.write() = store.get(JOB_TRACKER_KEY).unwrap_or_default();
    }

    /// Apply `change` and bound the result. With a store the change is made
    /// to the latest stored table so concurrent writers merge.
    fn mutate(&self, change: impl Fn(&mut TrackerState)) {
        let mut state = self.state.write();
        let capacity = self.capacity;

        if let Some(store) = &self.store {
            let stored = store.update(JOB_TRACKER_KEY, |stored: Option<TrackerState>| {
                let mut latest = stored.unwrap_or_default();
                change(&mut latest);
                latest.evict(capacity);
                latest.snapshot()
            });
            match stored {
                Ok(latest) => {
                    *state = latest;
                    return;
                }
                Err(e) => warn!(error = %e.summary(), "stored job tracker unusable, rewriting it"),
            }
        }

        change(&mut state);
        state.evict(capacity);

        if let Some(store) = &self.store {
            // Losing the snapshot only degrades later invocations
            if let Err(e) = store.set(JOB_TRACKER_KEY, &state.snapshot()) {
                warn!(error = %e.summary(), "failed to persist job tracker");
            }
        }
    }

    /// Push a dispatched job onto the recency stack, evicting the oldest past capacity
    pub fn record(&self, record: JobRecord) {
        debug!(job_id = %record.job_id, hosts = ?record.target_hosts, "job recorded");
        self.mutate(|state| {
            if record.is_single_host() {
                state.host_jobs.insert(
                    record.target_hosts[0].clone(),
                    HostJob {
                        job_id: record.job_id.clone(),
                        playbook: record.playbook.clone(),
                        created_at: record.created_at,
                    },
                );
            }
            state.recent.push_back(record.clone());
        });
    }

    /// Declare the expected host set of a master job
    pub fn register_master(&self, master: MasterJob) {
        debug!(
            master_job_id = %master.master_job_id,
            hosts = ?master.hosts,
            logical = master.logical,
            "master registered"
        );
        self.mutate(|state| {
            state
                .masters
                .insert(master.master_job_id.clone(), master.clone());
        });
    }

    /// Link an individual job to a master; a host keeps exactly one job
    pub fn associate(&self, master_job_id: &str, job_id: &str, hostname: &str) {
        let associated_at = Utc::now();
        self.mutate(|state| {
            let jobs = state
                .associations
                .entry(master_job_id.to_string())
                .or_default();

            let entry = AssociatedJob {
                job_id: job_id.to_string(),
                hostname: hostname.to_string(),
                associated_at,
            };

            match jobs.iter_mut().find(|j| j.hostname == hostname) {
                Some(existing) => {
                    if existing.job_id != job_id {
                        warn!(
                            master_job_id,
                            hostname,
                            old = %existing.job_id,
                            new = job_id,
                            "replacing job association"
                        );
                    }
                    *existing = entry;
                }
                None => jobs.push(entry),
            }
        });
    }

    /// Remember that a host of a master never got a job
    pub fn record_failure(&self, master_job_id: &str, hostname: &str, error: &str) {
        self.mutate(|state| {
            let failures = state.failures.entry(master_job_id.to_string()).or_default();
            failures.retain(|f| f.hostname != hostname);
            failures.push(SubmissionFailure {
                hostname: hostname.to_string(),
                error: error.to_string(),
            });
        });
    }

    pub fn failures(&self, master_job_id: &str) -> Vec<SubmissionFailure> {
        self.state
            .read()
            .failures
            .get(master_job_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn master(&self, master_job_id: &str) -> Option<MasterJob> {
        self.state.read().masters.get(master_job_id).cloned()
    }

    /// Masters newest first
    pub fn masters(&self) -> Vec<MasterJob> {
        let mut masters: Vec<MasterJob> = self.state.read().masters.values().cloned().collect();
        masters.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        masters
    }

    pub fn associated(&self, master_job_id: &str) -> Vec<AssociatedJob> {
        self.state
            .read()
            .associations
            .get(master_job_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Expected hosts of a master; falls back to the hosts associated so far
    pub fn expected_hosts(&self, master_job_id: &str) -> Vec<String> {
        let state = self.state.read();
        if let Some(master) = state.masters.get(master_job_id) {
            return master.hosts.clone();
        }
        state
            .associations
            .get(master_job_id)
            .map(|jobs| jobs.iter().map(|j| j.hostname.clone()).collect())
            .unwrap_or_default()
    }

    pub fn is_known(&self, master_job_id: &str) -> bool {
        let state = self.state.read();
        state.masters.contains_key(master_job_id) || state.associations.contains_key(master_job_id)
    }

    /// Recent dispatches, oldest first
    pub fn recent(&self) -> Vec<JobRecord> {
        self.state.read().recent.iter().cloned().collect()
    }

    /// Most recent single-host job on the stack for `hostname`
    pub fn latest_recent_for_host(
        &self,
        hostname: &str,
        playbook: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Option<JobRecord> {
        self.state
            .read()
            .recent
            .iter()
            .rev()
            .find(|r| {
                r.is_single_host()
                    && r.target_hosts[0] == hostname
                    && playbook.map_or(true, |p| r.playbook == p)
                    && since.map_or(true, |t| r.created_at >= t)
            })
            .cloned()
    }

    /// Latest job dispatched for `hostname` alone, whatever the stack still holds
    pub fn job_for_host(
        &self,
        hostname: &str,
        playbook: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Option<String> {
        let state = self.state.read();
        let job = state.host_jobs.get(hostname)?;
        if playbook.map_or(false, |p| job.playbook != p)
            || since.map_or(false, |t| job.created_at < t)
        {
            return None;
        }
        Some(job.job_id.clone())
    }
}

/// Client-side id for a logical job spanning several backend jobs
pub fn generate_group_id() -> String {
    let now = Utc::now().timestamp_millis();
    let random: u32 = rand::random();
    format!("group-{:x}_{:x}", now, random)
}

/// Maps a master job to the individual jobs backing it
pub trait JobResolver: Send + Sync {
    /// The job serving `hostname` within `master_job_id`, or
    /// [`DashError::ResolutionMiss`] when none can be found yet
    fn resolve_host(&self, master_job_id: &str, hostname: &str) -> Result<ResolvedJob, DashError>;

    /// Jobs for every expected host that resolves. Misses are not fatal:
    /// those hosts are simply absent from the result.
    fn resolve(&self, master_job_id: &str, expected_hosts: &[String]) -> Vec<ResolvedJob> {
        let mut resolved: Vec<ResolvedJob> = Vec::new();
        for host in expected_hosts {
            if resolved.iter().any(|r| &r.hostname == host) {
                continue;
            }
            match self.resolve_host(master_job_id, host) {
                Ok(job) => resolved.push(job),
                Err(e) => debug!(error = %e.summary(), "host left unresolved"),
            }
        }
        resolved
    }
}

/// Resolution over the association table, the recent stack, then the host lookup
pub struct HeuristicResolver {
    tracker: Arc<JobTracker>,
}

impl HeuristicResolver {
    pub fn new(tracker: Arc<JobTracker>) -> Self {
        HeuristicResolver { tracker }
    }
}

impl JobResolver for HeuristicResolver {
    fn resolve_host(&self, master_job_id: &str, hostname: &str) -> Result<ResolvedJob, DashError> {
        if let Some(job) = self
            .tracker
            .associated(master_job_id)
            .into_iter()
            .find(|j| j.hostname == hostname)
        {
            return Ok(ResolvedJob {
                job_id: job.job_id,
                hostname: hostname.to_string(),
            });
        }

        // Stack and lookup matches must belong to the same run as the master
        let master = self.tracker.master(master_job_id);
        let playbook = master.as_ref().map(|m| m.playbook.as_str());
        let since = master.as_ref().map(|m| m.created_at);

        let job_id = self
            .tracker
            .latest_recent_for_host(hostname, playbook, since)
            .map(|r| r.job_id)
            .or_else(|| self.tracker.job_for_host(hostname, playbook, since))
            .ok_or_else(|| DashError::ResolutionMiss {
                master_job_id: master_job_id.to_string(),
                host: hostname.to_string(),
            })?;

        debug!(master_job_id, hostname, %job_id, "associated by recency");
        self.tracker.associate(master_job_id, &job_id, hostname);
        Ok(ResolvedJob {
            job_id,
            hostname: hostname.to_string(),
        })
    }
}

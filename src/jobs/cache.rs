// Per-job status cache with TTL and monotonic progress

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::api::{Backend, JobStatus, StatusResponse};

/// Last known state of one backend job
#[derive(Debug, Clone, PartialEq)]
pub struct OutputCacheEntry {
    pub job_id: String,
    pub output: String,
    pub status: JobStatus,
    /// 0..=100, never lower than a previously observed value for this job
    pub progress: u8,
    pub fetched_at: DateTime<Utc>,
    /// Set when this answer comes from a failed refresh
    pub fetch_error: Option<String>,
}

impl OutputCacheEntry {
    fn placeholder(job_id: &str, progress: u8) -> Self {
        OutputCacheEntry {
            job_id: job_id.to_string(),
            output: String::new(),
            status: JobStatus::Running,
            progress,
            fetched_at: Utc::now(),
            fetch_error: None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.fetch_error.is_some()
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        let age = Utc::now().signed_duration_since(self.fetched_at);
        age.to_std().map(|age| age < ttl).unwrap_or(true)
    }
}

/// Progress as reported, or implied by a completed status
fn observed_progress(response: &StatusResponse) -> u8 {
    match response.progress {
        Some(p) if p.is_finite() => p.round().clamp(0.0, 100.0) as u8,
        _ if response.status == JobStatus::Completed => 100,
        _ => 0,
    }
}

/// Clears the in-flight marker however the fetch ends
struct InFlight<'a> {
    map: &'a DashMap<String, ()>,
    job_id: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.job_id);
    }
}

/// Bounded TTL cache in front of `GET /api/status/:id`
pub struct OutputCache {
    entries: RwLock<HashMap<String, OutputCacheEntry>>,
    /// Highest progress seen per job; outlives eviction
    high_water: RwLock<HashMap<String, u8>>,
    in_flight: DashMap<String, ()>,
    ttl: Duration,
    capacity: usize,
}

impl OutputCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        OutputCache {
            entries: RwLock::new(HashMap::new()),
            high_water: RwLock::new(HashMap::new()),
            in_flight: DashMap::new(),
            ttl,
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, job_id: &str) -> Option<OutputCacheEntry> {
        self.entries.read().get(job_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Highest progress ever observed for a job
    pub fn progress_floor(&self, job_id: &str) -> u8 {
        self.high_water.read().get(job_id).copied().unwrap_or(0)
    }

    fn placeholder(&self, job_id: &str) -> OutputCacheEntry {
        OutputCacheEntry::placeholder(job_id, self.progress_floor(job_id))
    }

    pub fn is_in_flight(&self, job_id: &str) -> bool {
        self.in_flight.contains_key(job_id)
    }

    /// Current state of a job.
    ///
    /// Fresh entries are returned without a request. At most one request per
    /// job is outstanding; concurrent callers get the last known entry. A failed
    /// refresh returns the last known entry tagged with the error and leaves the
    /// cache untouched.
    pub async fn fetch(&self, backend: &dyn Backend, job_id: &str) -> OutputCacheEntry {
        let cached = self.get(job_id);
        if let Some(entry) = &cached {
            if entry.is_fresh(self.ttl) {
                debug!(job_id, "status cache hit");
                return entry.clone();
            }
        }

        if self.in_flight.insert(job_id.to_string(), ()).is_some() {
            debug!(job_id, "status fetch already in flight");
            return cached.unwrap_or_else(|| self.placeholder(job_id));
        }
        let _guard = InFlight {
            map: &self.in_flight,
            job_id: job_id.to_string(),
        };

        match backend.status(job_id).await {
            Ok(response) => {
                let progress = self.raise_floor(job_id, observed_progress(&response));
                let entry = OutputCacheEntry {
                    job_id: job_id.to_string(),
                    output: response.output.unwrap_or_default(),
                    status: response.status,
                    progress,
                    fetched_at: Utc::now(),
                    fetch_error: None,
                };
                self.store(entry.clone());
                entry
            }
            Err(e) => {
                let message = e.summary();
                warn!(job_id, error = %message, "status fetch failed");
                let mut entry = cached.unwrap_or_else(|| self.placeholder(job_id));
                entry.fetch_error = Some(message);
                entry
            }
        }
    }

    fn raise_floor(&self, job_id: &str, observed: u8) -> u8 {
        let mut high_water = self.high_water.write();
        let floor = high_water.entry(job_id.to_string()).or_insert(0);
        if observed > *floor {
            *floor = observed;
        }
        *floor
    }

    fn store(&self, entry: OutputCacheEntry) {
        let mut entries = self.entries.write();
        entries.insert(entry.job_id.clone(), entry);

        while entries.len() > self.capacity {
            let oldest = entries
                .values()
                .min_by_key(|e| e.fetched_at)
                .map(|e| e.job_id.clone());
            match oldest {
                Some(job_id) => {
                    debug!(job_id = %job_id, "evicting cached status");
                    entries.remove(&job_id);
                }
                None => break,
            }
        }
    }

    /// Drop every cached entry; progress floors are kept
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

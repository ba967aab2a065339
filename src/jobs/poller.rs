// Periodic refresh of consolidated job views

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::aggregate::{AggregateView, Aggregator};

const VIEW_BUFFER: usize = 4;

type Handles = Arc<Mutex<HashMap<String, (u64, JoinHandle<()>)>>>;

/// One refresh loop per watched master.
///
/// Each loop aggregates, publishes the view, and sleeps until the next round.
/// It ends on its own once the master settles or the receiver goes away.
pub struct Poller {
    aggregator: Arc<Aggregator>,
    interval: Duration,
    handles: Handles,
    generation: AtomicU64,
}

impl Poller {
    pub fn new(aggregator: Arc<Aggregator>, interval: Duration) -> Self {
        Poller {
            aggregator,
            interval,
            handles: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// Start watching a master; a previous watch of the same master is replaced
    pub fn watch(&self, master_job_id: &str) -> mpsc::Receiver<AggregateView> {
        let (tx, rx) = mpsc::channel(VIEW_BUFFER);
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);

        let aggregator = self.aggregator.clone();
        let handles = self.handles.clone();
        let interval = self.interval;
        let master = master_job_id.to_string();

        // Hold the table while spawning so a loop that ends at once cannot
        // remove its entry before it is inserted
        let mut table = self.handles.lock();
        let handle = tokio::spawn(async move {
            loop {
                let view = aggregator.aggregate(&master).await;
                let settled = view.settled;

                if tx.send(view).await.is_err() {
                    debug!(master_job_id = %master, "view receiver dropped");
                    break;
                }
                if settled {
                    info!(master_job_id = %master, "polling finished");
                    break;
                }

                tokio::time::sleep(interval).await;
            }

            // Only remove our own entry, a newer watch may have replaced it
            let mut handles = handles.lock();
            if handles.get(&master).map(|(g, _)| *g) == Some(generation) {
                handles.remove(&master);
            }
        });

        if let Some((_, previous)) = table.insert(master_job_id.to_string(), (generation, handle)) {
            debug!(master_job_id, "replacing existing watch");
            previous.abort();
        }

        rx
    }

    /// Stop watching a master; returns false if it was not watched
    pub fn stop(&self, master_job_id: &str) -> bool {
        match self.handles.lock().remove(master_job_id) {
            Some((_, handle)) => {
                handle.abort();
                debug!(master_job_id, "watch stopped");
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self) {
        for (master, (_, handle)) in self.handles.lock().drain() {
            debug!(master_job_id = %master, "watch stopped");
            handle.abort();
        }
    }

    pub fn is_watching(&self, master_job_id: &str) -> bool {
        self.handles.lock().contains_key(master_job_id)
    }

    pub fn active(&self) -> usize {
        self.handles.lock().len()
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop_all();
    }
}

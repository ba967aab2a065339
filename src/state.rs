// Application state shared by every command

use std::sync::Arc;

use tracing::{debug, info};

use crate::api::{ApiClient, Backend};
use crate::baseline::{BaselineClassifier, ConfigStore, HostnameSequence};
use crate::executor::{DispatchContext, Dispatcher};
use crate::inventory::{Catalog, SelectionTracker};
use crate::jobs::{Aggregator, JobTracker, OutputCache, Poller};
use crate::output::errors::DashError;
use crate::output::events::EventEmitter;
use crate::settings::Settings;
use crate::storage::KvStore;

/// Every long-lived component, wired once per process
pub struct AppState {
    pub settings: Settings,
    /// Durable store: baseline configurations
    pub local: Arc<KvStore>,
    /// Session store: listings, filters, job tracker
    pub session: Arc<KvStore>,
    pub configs: Arc<ConfigStore>,
    pub selection: SelectionTracker,
    pub catalog: Catalog,
    pub tracker: Arc<JobTracker>,
    pub cache: Arc<OutputCache>,
    pub aggregator: Arc<Aggregator>,
    pub poller: Poller,
    pub dispatcher: Dispatcher,
    pub hostnames: HostnameSequence,
}

impl AppState {
    /// Open both stores under `settings.state_dir` and talk to the configured backend
    pub fn open(settings: Settings, events: EventEmitter) -> Result<Self, DashError> {
        let local = Arc::new(KvStore::open(settings.local_store_path())?);
        let session = Arc::new(KvStore::open(settings.session_store_path())?);
        let backend: Arc<dyn Backend> =
            Arc::new(ApiClient::new(settings.api_url.clone(), settings.request_timeout())?);

        info!(
            api_url = %settings.api_url,
            state_dir = %settings.state_dir.display(),
            "state opened"
        );
        Ok(Self::with_parts(settings, backend, local, session, events))
    }

    pub fn with_parts(
        settings: Settings,
        backend: Arc<dyn Backend>,
        local: Arc<KvStore>,
        session: Arc<KvStore>,
        events: EventEmitter,
    ) -> Self {
        let configs = Arc::new(ConfigStore::new(local.clone(), settings.min_password_length));
        let tracker = Arc::new(JobTracker::with_store(
            settings.recent_jobs_capacity,
            session.clone(),
        ));
        let cache = Arc::new(OutputCache::new(settings.cache_ttl(), settings.cache_capacity));
        let aggregator = Arc::new(Aggregator::new(backend.clone(), tracker.clone(), cache.clone()));
        let poller = Poller::new(aggregator.clone(), settings.poll_interval());

        let ctx = DispatchContext {
            backend: backend.clone(),
            tracker: tracker.clone(),
            configs: configs.clone(),
            events,
            submission_delay: settings.submission_delay(),
        };
        let dispatcher = Dispatcher::new(ctx, BaselineClassifier::new(&settings.baseline_keywords))
            .with_agents(settings.agents.clone());

        AppState {
            catalog: Catalog::new(backend, session.clone()),
            selection: SelectionTracker::new(),
            hostnames: HostnameSequence::new(settings.hostname_prefix.clone()),
            settings,
            local,
            session,
            configs,
            tracker,
            cache,
            aggregator,
            poller,
            dispatcher,
        }
    }

    /// Forget listings, filters and tracked jobs. Baseline configurations survive.
    pub fn reset_session(&self) -> Result<(), DashError> {
        self.poller.stop_all();
        self.cache.clear();
        self.selection.clear();
        self.session.clear()?;
        self.tracker.refresh();
        debug!("session state cleared");
        Ok(())
    }
}

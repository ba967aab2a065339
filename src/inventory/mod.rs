// Inventory module: host/playbook catalog and selection

mod selection;

pub use selection::*;

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::api::{Backend, HostInfo, PlaybookInfo};
use crate::output::errors::DashError;
use crate::storage::{
    KvStore, HOSTS_DATA_KEY, HOSTS_LOADED_KEY, LAST_CATEGORY_FILTER_KEY, LAST_OS_FILTER_KEY,
    PLAYBOOKS_DATA_KEY, PLAYBOOKS_LOADED_KEY,
};

/// Operating system a playbook set targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OsTarget {
    pub key: &'static str,
    /// Fragment of the playbook path that identifies this OS
    pub path: &'static str,
    pub display: &'static str,
    pub family: &'static str,
}

const fn target(
    key: &'static str,
    path: &'static str,
    display: &'static str,
    family: &'static str,
) -> OsTarget {
    OsTarget {
        key,
        path,
        display,
        family,
    }
}

pub const OS_TARGETS: &[OsTarget] = &[
    target("oracle_linux_8", "linux/oracle8", "Oracle Linux 8", "linux"),
    target("oracle_linux_9", "linux/oracle9", "Oracle Linux 9", "linux"),
    target("ubuntu_20", "linux/ubuntu20", "Ubuntu 20.04", "linux"),
    target("ubuntu_22", "linux/ubuntu22", "Ubuntu 22.04", "linux"),
    target("ubuntu_24", "linux/ubuntu24", "Ubuntu 24.04", "linux"),
    target("windows_server_2019", "windows/server2019", "Windows Server 2019", "windows"),
    target("windows_server_2022", "windows/server2022", "Windows Server 2022", "windows"),
];

pub fn os_target(key: &str) -> Option<&'static OsTarget> {
    OS_TARGETS.iter().find(|t| t.key == key)
}

/// Category value matching every playbook
pub const ALL_CATEGORIES: &str = "all";

/// OS/category filter remembered for the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybookFilter {
    pub os: Option<String>,
    pub category: String,
}

impl Default for PlaybookFilter {
    fn default() -> Self {
        PlaybookFilter {
            os: None,
            category: ALL_CATEGORIES.to_string(),
        }
    }
}

impl PlaybookFilter {
    pub fn matches(&self, playbook: &PlaybookInfo) -> bool {
        let os_match = match self.os.as_deref() {
            None => true,
            Some(key) => match os_target(key) {
                Some(target) => playbook.path.contains(target.path),
                None => false,
            },
        };
        let category_match =
            self.category == ALL_CATEGORIES || playbook.category == self.category;

        os_match && category_match
    }

    pub fn apply(&self, playbooks: &[PlaybookInfo]) -> Vec<PlaybookInfo> {
        playbooks.iter().filter(|p| self.matches(p)).cloned().collect()
    }
}

/// Host and playbook listings, cached in the session store
pub struct Catalog {
    backend: Arc<dyn Backend>,
    session: Arc<KvStore>,
}

impl Catalog {
    pub fn new(backend: Arc<dyn Backend>, session: Arc<KvStore>) -> Self {
        Catalog { backend, session }
    }

    /// Hosts known to the backend; the session copy is reused unless refreshing
    pub async fn hosts(
        &self,
        force_refresh: bool,
    ) -> Result<BTreeMap<String, HostInfo>, DashError> {
        if !force_refresh && self.session.get::<bool>(HOSTS_LOADED_KEY) == Some(true) {
            if let Some(hosts) = self.session.get::<BTreeMap<String, HostInfo>>(HOSTS_DATA_KEY) {
                debug!(count = hosts.len(), "using cached hosts");
                return Ok(hosts);
            }
        }

        let hosts: BTreeMap<String, HostInfo> = self.backend.hosts().await?.into_iter().collect();
        info!(count = hosts.len(), "hosts loaded from backend");

        self.session.set(HOSTS_DATA_KEY, &hosts)?;
        self.session.set(HOSTS_LOADED_KEY, &true)?;
        Ok(hosts)
    }

    /// Filter stored from the previous listing
    pub fn last_filter(&self) -> PlaybookFilter {
        PlaybookFilter {
            os: self.session.get(LAST_OS_FILTER_KEY),
            category: self
                .session
                .get(LAST_CATEGORY_FILTER_KEY)
                .unwrap_or_else(|| ALL_CATEGORIES.to_string()),
        }
    }

    fn remember_filter(&self, filter: &PlaybookFilter) -> Result<(), DashError> {
        match &filter.os {
            Some(os) => self.session.set(LAST_OS_FILTER_KEY, os)?,
            None => self.session.remove(LAST_OS_FILTER_KEY)?,
        }
        self.session.set(LAST_CATEGORY_FILTER_KEY, &filter.category)
    }

    /// Every playbook the backend offers, unfiltered
    pub async fn all_playbooks(&self, force_refresh: bool) -> Result<Vec<PlaybookInfo>, DashError> {
        if !force_refresh && self.session.get::<bool>(PLAYBOOKS_LOADED_KEY) == Some(true) {
            if let Some(playbooks) = self.session.get::<Vec<PlaybookInfo>>(PLAYBOOKS_DATA_KEY) {
                debug!(count = playbooks.len(), "using cached playbooks");
                return Ok(playbooks);
            }
        }

        let playbooks = self.backend.playbooks().await?;
        info!(count = playbooks.len(), "playbooks loaded from backend");

        self.session.set(PLAYBOOKS_DATA_KEY, &playbooks)?;
        self.session.set(PLAYBOOKS_LOADED_KEY, &true)?;
        Ok(playbooks)
    }

    /// Playbooks matching `filter`. A filter different from the last one
    /// drops the cached listing and refetches it.
    pub async fn playbooks(
        &self,
        filter: &PlaybookFilter,
        force_refresh: bool,
    ) -> Result<Vec<PlaybookInfo>, DashError> {
        let filter_changed = self.last_filter() != *filter;
        if filter_changed {
            debug!(?filter, "playbook filter changed, dropping cached playbooks");
            self.session.remove(PLAYBOOKS_DATA_KEY)?;
            self.session.remove(PLAYBOOKS_LOADED_KEY)?;
        }
        self.remember_filter(filter)?;

        let playbooks = self.all_playbooks(force_refresh || filter_changed).await?;
        Ok(filter.apply(&playbooks))
    }

    /// Look a playbook up by name or path
    pub async fn find_playbook(
        &self,
        name_or_path: &str,
    ) -> Result<Option<PlaybookInfo>, DashError> {
        let playbooks = self.all_playbooks(false).await?;
        Ok(playbooks
            .into_iter()
            .find(|p| p.name == name_or_path || p.path == name_or_path))
    }
}

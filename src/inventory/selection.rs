// Host and playbook selection with readiness notifications

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::debug;

/// Whether there is something to execute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness {
    pub hosts: usize,
    pub playbooks: usize,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        self.hosts > 0 && self.playbooks > 0
    }
}

#[derive(Debug, Default)]
struct SelectionState {
    available_hosts: Vec<String>,
    available_playbooks: Vec<String>,
    /// Selected items in selection order, no duplicates
    hosts: Vec<String>,
    playbooks: Vec<String>,
}

/// Tracks the selected hosts and playbooks.
///
/// Every mutation re-derives [`Readiness`] and publishes it to subscribers.
pub struct SelectionTracker {
    state: RwLock<SelectionState>,
    readiness: watch::Sender<Readiness>,
}

fn toggle(items: &mut Vec<String>, item: &str) -> bool {
    if let Some(pos) = items.iter().position(|i| i == item) {
        items.remove(pos);
        false
    } else {
        items.push(item.to_string());
        true
    }
}

impl SelectionTracker {
    pub fn new() -> Self {
        let (readiness, _) = watch::channel(Readiness::default());
        SelectionTracker {
            state: RwLock::new(SelectionState::default()),
            readiness,
        }
    }

    /// Receive the readiness value after every mutation
    pub fn subscribe(&self) -> watch::Receiver<Readiness> {
        self.readiness.subscribe()
    }

    pub fn readiness(&self) -> Readiness {
        *self.readiness.borrow()
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut SelectionState) -> R) -> R {
        let (result, readiness) = {
            let mut state = self.state.write();
            let result = f(&mut state);
            let readiness = Readiness {
                hosts: state.hosts.len(),
                playbooks: state.playbooks.len(),
            };
            (result, readiness)
        };

        debug!(
            hosts = readiness.hosts,
            playbooks = readiness.playbooks,
            ready = readiness.is_ready(),
            "selection changed"
        );
        self.readiness.send_replace(readiness);
        result
    }

    /// Set the hosts `select_all_hosts(true)` selects
    pub fn set_available_hosts<I, S>(&self, hosts: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let hosts: Vec<String> = hosts.into_iter().map(Into::into).collect();
        self.state.write().available_hosts = hosts;
    }

    pub fn set_available_playbooks<I, S>(&self, playbooks: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let playbooks: Vec<String> = playbooks.into_iter().map(Into::into).collect();
        self.state.write().available_playbooks = playbooks;
    }

    /// Flip a host's membership; returns true if it is now selected
    pub fn toggle_host(&self, host: &str) -> bool {
        self.mutate(|s| toggle(&mut s.hosts, host))
    }

    pub fn toggle_playbook(&self, name: &str) -> bool {
        self.mutate(|s| toggle(&mut s.playbooks, name))
    }

    pub fn select_all_hosts(&self, selected: bool) {
        self.mutate(|s| {
            s.hosts = if selected {
                s.available_hosts.clone()
            } else {
                Vec::new()
            };
        })
    }

    pub fn select_all_playbooks(&self, selected: bool) {
        self.mutate(|s| {
            s.playbooks = if selected {
                s.available_playbooks.clone()
            } else {
                Vec::new()
            };
        })
    }

    pub fn clear(&self) {
        self.mutate(|s| {
            s.hosts.clear();
            s.playbooks.clear();
        })
    }

    pub fn selected_hosts(&self) -> Vec<String> {
        self.state.read().hosts.clone()
    }

    pub fn selected_playbooks(&self) -> Vec<String> {
        self.state.read().playbooks.clone()
    }

    pub fn is_host_selected(&self, host: &str) -> bool {
        self.state.read().hosts.iter().any(|h| h == host)
    }
}

impl Default for SelectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

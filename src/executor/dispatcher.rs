// Dispatcher: configuration gate and strategy selection

use tracing::{debug, info, warn};

use super::agents::{AgentDispatch, AgentSettings};
use super::group::{BaselineDispatch, GroupDispatch};
use super::{DispatchContext, DispatchReport, DispatchStrategy, PlaybookRef};
use crate::baseline::BaselineClassifier;
use crate::inventory::{Catalog, SelectionTracker};
use crate::output::errors::DashError;
use crate::output::events::DashEvent;

/// Routes playbooks to a dispatch strategy: baseline first, then agent
/// installers, then a plain group job.
///
/// Baseline playbooks are refused outright when any target host lacks a
/// complete configuration; nothing is submitted and no job is recorded.
pub struct Dispatcher {
    ctx: DispatchContext,
    classifier: BaselineClassifier,
    group: GroupDispatch,
    baseline: BaselineDispatch,
    agents: AgentDispatch,
}

fn dedup(hosts: &[String]) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(hosts.len());
    for host in hosts {
        if !unique.contains(host) {
            unique.push(host.clone());
        }
    }
    unique
}

impl Dispatcher {
    pub fn new(ctx: DispatchContext, classifier: BaselineClassifier) -> Self {
        Dispatcher {
            ctx,
            classifier,
            group: GroupDispatch,
            baseline: BaselineDispatch,
            agents: AgentDispatch::new(AgentSettings::default()),
        }
    }

    /// Variables attached to agent installer runs
    pub fn with_agents(mut self, settings: AgentSettings) -> Self {
        self.agents = AgentDispatch::new(settings);
        self
    }

    pub fn context(&self) -> &DispatchContext {
        &self.ctx
    }

    pub fn is_baseline(&self, playbook: &PlaybookRef) -> bool {
        self.classifier.is_baseline(&playbook.name) || self.classifier.is_baseline(&playbook.path)
    }

    pub fn strategy_for(&self, playbook: &PlaybookRef) -> &dyn DispatchStrategy {
        if self.is_baseline(playbook) {
            &self.baseline
        } else if self.agents.handles(playbook) {
            &self.agents
        } else {
            &self.group
        }
    }

    /// Hosts that block `playbook`, empty when it may run
    pub fn incomplete_hosts(&self, playbook: &PlaybookRef, hosts: &[String]) -> Vec<String> {
        if !self.is_baseline(playbook) {
            return Vec::new();
        }
        self.ctx.configs.list_incomplete(hosts)
    }

    fn blocked(&self, playbook: &str, hosts: Vec<String>) -> DashError {
        warn!(playbook, hosts = ?hosts, "dispatch blocked by missing baseline configuration");
        self.ctx.events.emit(DashEvent::DispatchBlocked {
            playbook: playbook.to_string(),
            hosts: hosts.clone(),
        });
        DashError::DispatchBlocked {
            playbook: playbook.to_string(),
            hosts,
        }
    }

    /// Submit one playbook for `hosts`
    pub async fn dispatch(
        &self,
        playbook: &PlaybookRef,
        hosts: &[String],
    ) -> Result<DispatchReport, DashError> {
        let hosts = dedup(hosts);
        if hosts.is_empty() {
            return Err(DashError::NotReady {
                message: "no hosts selected".to_string(),
            });
        }

        let incomplete = self.incomplete_hosts(playbook, &hosts);
        if !incomplete.is_empty() {
            return Err(self.blocked(playbook.label(), incomplete));
        }

        let strategy = self.strategy_for(playbook);
        debug!(
            playbook = playbook.label(),
            strategy = strategy.name(),
            hosts = hosts.len(),
            "dispatching"
        );
        strategy.dispatch(&self.ctx, playbook, &hosts).await
    }

    /// Submit several playbooks for the same hosts, in order.
    ///
    /// Every baseline playbook is checked first; if any host is incomplete
    /// for any of them nothing at all is submitted.
    pub async fn dispatch_all(
        &self,
        playbooks: &[PlaybookRef],
        hosts: &[String],
    ) -> Result<Vec<DispatchReport>, DashError> {
        let hosts = dedup(hosts);
        if hosts.is_empty() || playbooks.is_empty() {
            return Err(DashError::NotReady {
                message: "select at least one host and one playbook".to_string(),
            });
        }

        let mut incomplete: Vec<String> = Vec::new();
        let mut blocking: Vec<&str> = Vec::new();
        for playbook in playbooks {
            let missing = self.incomplete_hosts(playbook, &hosts);
            if !missing.is_empty() {
                blocking.push(playbook.label());
            }
            for host in missing {
                if !incomplete.contains(&host) {
                    incomplete.push(host);
                }
            }
        }
        if !incomplete.is_empty() {
            return Err(self.blocked(&blocking.join(", "), incomplete));
        }

        let mut reports = Vec::with_capacity(playbooks.len());
        for playbook in playbooks {
            reports.push(self.dispatch(playbook, &hosts).await?);
        }

        info!(
            playbooks = reports.len(),
            submitted = reports.iter().map(|r| r.submitted()).sum::<usize>(),
            failed = reports.iter().map(|r| r.failed()).sum::<usize>(),
            "selection dispatched"
        );
        Ok(reports)
    }

    /// Dispatch whatever the selection tracker currently holds
    pub async fn dispatch_selected(
        &self,
        selection: &SelectionTracker,
        catalog: &Catalog,
    ) -> Result<Vec<DispatchReport>, DashError> {
        if !selection.readiness().is_ready() {
            return Err(DashError::NotReady {
                message: "select at least one host and one playbook".to_string(),
            });
        }

        let mut playbooks = Vec::new();
        for name in selection.selected_playbooks() {
            let playbook = match catalog.find_playbook(&name).await? {
                Some(info) => PlaybookRef::from(&info),
                None => {
                    debug!(playbook = %name, "playbook not in catalog, sending name as-is");
                    PlaybookRef::new(name.clone(), name)
                }
            };
            playbooks.push(playbook);
        }

        self.dispatch_all(&playbooks, &selection.selected_hosts()).await
    }
}

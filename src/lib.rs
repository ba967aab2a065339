// playdash - command-line dashboard for an Ansible execution backend
//
// Keeps per-host baseline credentials, gates and dispatches playbook runs,
// and follows the resulting jobs as one consolidated view.

pub mod api;
pub mod baseline;
pub mod executor;
pub mod inventory;
pub mod jobs;
pub mod output;
pub mod settings;
pub mod state;
pub mod storage;

pub use api::{ApiClient, Backend, JobStatus};
pub use baseline::{BaselineClassifier, ConfigStore, HostConfig};
pub use executor::{DispatchReport, Dispatcher, PlaybookRef};
pub use jobs::{AggregateView, Aggregator, JobTracker, Poller};
pub use output::{DashError, DashEvent, TerminalOutput};
pub use settings::Settings;
pub use state::AppState;

/// Version of the playdash tool
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Transient notifications emitted while dispatching and watching jobs

use tokio::sync::mpsc;

/// Severity of a notification, mirrors how it is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Success,
    Warning,
    Error,
}

/// Events emitted by the dispatcher and the job watcher
#[derive(Debug, Clone, PartialEq)]
pub enum DashEvent {
    /// Submission refused: hosts lack baseline configuration
    DispatchBlocked {
        playbook: String,
        hosts: Vec<String>,
    },

    /// A run request is about to be sent
    SubmissionStarted {
        playbook: String,
        hosts: Vec<String>,
    },

    /// The backend accepted a run request
    Submitted {
        playbook: String,
        hosts: Vec<String>,
        job_id: String,
    },

    /// A run request failed; sequential dispatch continues with the next host
    SubmissionFailed {
        playbook: String,
        hosts: Vec<String>,
        error: String,
    },

    /// Sequential dispatch drained its queue
    SequenceFinished {
        master_job_id: String,
        submitted: usize,
        failed: usize,
    },

    /// Free-form message
    Notice { level: Level, message: String },
}

impl DashEvent {
    pub fn level(&self) -> Level {
        match self {
            DashEvent::DispatchBlocked { .. } => Level::Warning,
            DashEvent::SubmissionStarted { .. } => Level::Info,
            DashEvent::Submitted { .. } => Level::Success,
            DashEvent::SubmissionFailed { .. } => Level::Error,
            DashEvent::SequenceFinished { failed, .. } => {
                if *failed > 0 {
                    Level::Warning
                } else {
                    Level::Success
                }
            }
            DashEvent::Notice { level, .. } => *level,
        }
    }

    /// One-line description for notifications
    pub fn message(&self) -> String {
        match self {
            DashEvent::DispatchBlocked { playbook, hosts } => format!(
                "{} blocked: configure {} first",
                playbook,
                hosts.join(", ")
            ),
            DashEvent::SubmissionStarted { playbook, hosts } => {
                format!("Submitting {} for {}", playbook, hosts.join(", "))
            }
            DashEvent::Submitted {
                playbook,
                hosts,
                job_id,
            } => format!("{} started for {} (job {})", playbook, hosts.join(", "), job_id),
            DashEvent::SubmissionFailed {
                playbook,
                hosts,
                error,
            } => format!("{} failed for {}: {}", playbook, hosts.join(", "), error),
            DashEvent::SequenceFinished {
                master_job_id,
                submitted,
                failed,
            } => format!(
                "Sequence {} finished: {} submitted, {} failed",
                master_job_id, submitted, failed
            ),
            DashEvent::Notice { message, .. } => message.clone(),
        }
    }
}

/// Event emitter for sending notifications; a disabled emitter drops everything
#[derive(Clone, Default)]
pub struct EventEmitter {
    tx: Option<mpsc::UnboundedSender<DashEvent>>,
}

impl EventEmitter {
    pub fn new(tx: mpsc::UnboundedSender<DashEvent>) -> Self {
        EventEmitter { tx: Some(tx) }
    }

    pub fn disabled() -> Self {
        EventEmitter { tx: None }
    }

    pub fn emit(&self, event: DashEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn notice(&self, level: Level, message: impl Into<String>) {
        self.emit(DashEvent::Notice {
            level,
            message: message.into(),
        });
    }
}

/// Create a new event channel
pub fn create_event_channel() -> (EventEmitter, mpsc::UnboundedReceiver<DashEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventEmitter::new(tx), rx)
}

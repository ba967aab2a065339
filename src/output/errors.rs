// Human-readable error messages for playdash

use std::fmt;
use std::io::IsTerminal;
use std::path::PathBuf;

use colored::*;
use thiserror::Error;

/// Initialize color output based on TTY detection and NO_COLOR environment variable
fn should_use_colors() -> bool {
    // https://no-color.org/
    if std::env::var("NO_COLOR").is_ok() {
        return false;
    }

    std::io::stderr().is_terminal()
}

/// Which credential field of a baseline configuration failed validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordField {
    Primary,
    Secondary,
}

impl fmt::Display for PasswordField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PasswordField::Primary => write!(f, "primary password"),
            PasswordField::Secondary => write!(f, "secondary password"),
        }
    }
}

/// Field-level rejection of a baseline configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("hostname cannot be empty")]
    EmptyHostname,

    #[error("the {field} must be at least {min} characters")]
    PasswordTooShort { field: PasswordField, min: usize },
}

/// All error types in playdash
#[derive(Debug)]
pub enum DashError {
    /// A configuration save was rejected before reaching storage
    Validation(ValidationError),

    /// Baseline dispatch refused because some target hosts are not configured
    DispatchBlocked {
        playbook: String,
        hosts: Vec<String>,
    },

    /// Request to the backend failed (connection error or non-2xx)
    Transport {
        operation: String,
        status: Option<u16>,
        message: String,
    },

    /// A host's individual job could not be associated with its master
    ResolutionMiss {
        master_job_id: String,
        host: String,
    },

    /// Nothing to dispatch (empty host or playbook selection)
    NotReady {
        message: String,
    },

    /// Client-side state could not be read or written
    Storage {
        message: String,
        path: Option<PathBuf>,
    },

    /// Invalid runtime settings
    Settings {
        message: String,
        suggestion: Option<String>,
    },
}

impl DashError {
    pub fn transport(operation: impl Into<String>, message: impl Into<String>) -> Self {
        DashError::Transport {
            operation: operation.into(),
            status: None,
            message: message.into(),
        }
    }

    /// True for errors caused by the network or the backend rather than local state
    pub fn is_transient(&self) -> bool {
        matches!(self, DashError::Transport { .. })
    }

    /// Plain one-line form for notifications and transcript sections
    pub fn summary(&self) -> String {
        match self {
            DashError::Validation(err) => err.to_string(),
            DashError::DispatchBlocked { playbook, hosts } => {
                format!("{} blocked: unconfigured hosts {}", playbook, hosts.join(", "))
            }
            DashError::Transport {
                operation,
                status: Some(status),
                message,
            } => format!("{} returned {}: {}", operation, status, message),
            DashError::Transport {
                operation, message, ..
            } => format!("{} failed: {}", operation, message),
            DashError::ResolutionMiss {
                master_job_id,
                host,
            } => format!("no job for {} in {}", host, master_job_id),
            DashError::NotReady { message }
            | DashError::Storage { message, .. }
            | DashError::Settings { message, .. } => message.clone(),
        }
    }
}

impl From<ValidationError> for DashError {
    fn from(err: ValidationError) -> Self {
        DashError::Validation(err)
    }
}

impl std::error::Error for DashError {}

impl fmt::Display for DashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !should_use_colors() {
            colored::control::set_override(false);
        }

        match self {
            DashError::Validation(err) => {
                writeln!(f, "{}: {}", "INVALID CONFIGURATION".red().bold(), err)
            }

            DashError::DispatchBlocked { playbook, hosts } => {
                writeln!(
                    f,
                    "{}: {} requires baseline configuration",
                    "DISPATCH BLOCKED".red().bold(),
                    playbook
                )?;
                writeln!(f, "  {} {}", "Unconfigured:".dimmed(), hosts.join(", "))?;
                writeln!(f)?;
                writeln!(
                    f,
                    "{}: run `playdash configure {}` first",
                    "Hint".yellow().bold(),
                    hosts.join(" ")
                )
            }

            DashError::Transport {
                operation,
                status,
                message,
            } => {
                writeln!(f, "{}: {}", "REQUEST FAILED".red().bold(), message)?;
                writeln!(f, "  {} {}", "Operation:".dimmed(), operation)?;
                if let Some(status) = status {
                    writeln!(f, "  {} {}", "HTTP status:".dimmed(), status)?;
                }
                Ok(())
            }

            DashError::ResolutionMiss {
                master_job_id,
                host,
            } => {
                writeln!(
                    f,
                    "{}: no job found for host {}",
                    "UNRESOLVED".yellow().bold(),
                    host
                )?;
                writeln!(f, "  {} {}", "Master job:".dimmed(), master_job_id)
            }

            DashError::NotReady { message } => {
                writeln!(f, "{}: {}", "NOTHING TO RUN".yellow().bold(), message)
            }

            DashError::Storage { message, path } => {
                writeln!(f, "{}: {}", "STORAGE ERROR".red().bold(), message)?;
                if let Some(path) = path {
                    writeln!(f, "  {} {}", "Path:".dimmed(), path.display())?;
                }
                Ok(())
            }

            DashError::Settings {
                message,
                suggestion,
            } => {
                writeln!(f, "{}: {}", "SETTINGS ERROR".red().bold(), message)?;

                if let Some(suggestion) = suggestion {
                    writeln!(f)?;
                    writeln!(f, "{}: {}", "Hint".yellow().bold(), suggestion)?;
                }

                Ok(())
            }
        }
    }
}

/// Suggest common fixes for errors
pub fn suggest_fix(error: &DashError) -> Option<String> {
    match error {
        DashError::Transport {
            message, status, ..
        } => {
            if message.contains("connection refused") || message.contains("error sending request") {
                Some("Ensure the dashboard backend is running and --api-url is correct".to_string())
            } else if message.contains("timed out") {
                Some("Check network connectivity or raise request_timeout_secs".to_string())
            } else if *status == Some(404) {
                Some("The job may have been cleaned up by the backend".to_string())
            } else {
                None
            }
        }
        DashError::Storage { .. } => {
            Some("Check permissions on the state directory".to_string())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_blocked_display() {
        let err = DashError::DispatchBlocked {
            playbook: "baseline-ubuntu.yml".to_string(),
            hosts: vec!["10.0.0.6".to_string(), "10.0.0.7".to_string()],
        };

        let output = format!("{}", err);
        let clean_output = console::strip_ansi_codes(&output);

        assert!(clean_output.contains("baseline-ubuntu.yml"));
        assert!(clean_output.contains("10.0.0.6, 10.0.0.7"));
        assert!(clean_output.contains("playdash configure 10.0.0.6 10.0.0.7"));
    }

    #[test]
    fn test_validation_message_names_field() {
        let err = ValidationError::PasswordTooShort {
            field: PasswordField::Secondary,
            min: 8,
        };
        assert_eq!(
            err.to_string(),
            "the secondary password must be at least 8 characters"
        );
    }

    #[test]
    fn test_only_transport_is_transient() {
        assert!(DashError::transport("GET /api/hosts", "boom").is_transient());
        assert!(!DashError::Validation(ValidationError::EmptyHostname).is_transient());
    }

    #[test]
    fn test_suggest_fix_for_missing_job() {
        let err = DashError::Transport {
            operation: "GET /api/status/abc".to_string(),
            status: Some(404),
            message: "not found".to_string(),
        };
        assert!(suggest_fix(&err).is_some());
    }
}

// Runtime settings loaded from YAML

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::executor::AgentSettings;
use crate::output::errors::DashError;

/// File looked up in the working directory when no --config is given
pub const DEFAULT_SETTINGS_FILE: &str = "playdash.yaml";

/// Environment variable overriding `api_url`
pub const API_URL_ENV: &str = "PLAYDASH_API_URL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Base URL of the execution backend
    pub api_url: String,
    /// Directory holding local.json and session.json
    pub state_dir: PathBuf,
    pub request_timeout_secs: u64,
    /// Delay between consolidated-view refreshes
    pub poll_interval_ms: u64,
    /// Age after which a cached job status is refetched
    pub cache_ttl_ms: u64,
    pub cache_capacity: usize,
    /// Size of the recent-dispatch stack used for job association
    pub recent_jobs_capacity: usize,
    /// Pause between sequential baseline submissions
    pub submission_delay_ms: u64,
    pub min_password_length: usize,
    pub generated_password_length: usize,
    /// Case-insensitive fragments that flag a playbook as baseline
    pub baseline_keywords: Vec<String>,
    /// Prefix of generated hostnames
    pub hostname_prefix: String,
    /// Variables for monitoring and antivirus installer playbooks
    pub agents: AgentSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            api_url: "http://127.0.0.1:5000".to_string(),
            state_dir: PathBuf::from(".playdash"),
            request_timeout_secs: 30,
            poll_interval_ms: 2500,
            cache_ttl_ms: 3000,
            cache_capacity: 30,
            recent_jobs_capacity: 20,
            submission_delay_ms: 1000,
            min_password_length: 8,
            generated_password_length: 15,
            baseline_keywords: vec![
                "baseline".to_string(),
                "configuracao-base".to_string(),
                "configuração-base".to_string(),
            ],
            hostname_prefix: "SKY-INT-SDL-".to_string(),
            agents: AgentSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings: explicit file, else `playdash.yaml` if present, else
    /// defaults. `PLAYDASH_API_URL` overrides the file.
    pub fn load(path: Option<&Path>) -> Result<Self, DashError> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Path::new(DEFAULT_SETTINGS_FILE);
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    Settings::default()
                }
            }
        };

        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                settings.api_url = url;
            }
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, DashError> {
        let content = fs::read_to_string(path).map_err(|e| DashError::Settings {
            message: format!("Failed to read {}: {}", path.display(), e),
            suggestion: Some("Check the --config path".to_string()),
        })?;

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, DashError> {
        if content.trim().is_empty() {
            return Ok(Settings::default());
        }

        serde_yaml::from_str(content).map_err(|e| DashError::Settings {
            message: format!("Invalid settings: {}", e),
            suggestion: Some(
                "Settings are a YAML mapping, e.g. `api_url: http://host:5000`".to_string(),
            ),
        })
    }

    pub fn validate(&self) -> Result<(), DashError> {
        let invalid = |message: &str| DashError::Settings {
            message: message.to_string(),
            suggestion: None,
        };

        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            return Err(DashError::Settings {
                message: format!("api_url '{}' is not an http(s) URL", self.api_url),
                suggestion: Some("Use e.g. http://127.0.0.1:5000".to_string()),
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(invalid("poll_interval_ms must be greater than zero"));
        }
        if self.request_timeout_secs == 0 {
            return Err(invalid("request_timeout_secs must be greater than zero"));
        }
        if self.min_password_length == 0 {
            return Err(invalid("min_password_length must be at least 1"));
        }
        if self.cache_capacity == 0 || self.recent_jobs_capacity == 0 {
            return Err(invalid("cache_capacity and recent_jobs_capacity must be at least 1"));
        }
        if self.baseline_keywords.iter().all(|k| k.trim().is_empty()) {
            return Err(invalid("baseline_keywords must contain at least one keyword"));
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn submission_delay(&self) -> Duration {
        Duration::from_millis(self.submission_delay_ms)
    }

    pub fn local_store_path(&self) -> PathBuf {
        self.state_dir.join("local.json")
    }

    pub fn session_store_path(&self) -> PathBuf {
        self.state_dir.join("session.json")
    }
}

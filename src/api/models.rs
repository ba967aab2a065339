// Wire types for the dashboard backend REST API

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// Extra variables passed to the backend with a run request
pub type ExtraVars = BTreeMap<String, String>;

/// Entry of `GET /api/hosts`, keyed by hostname
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostInfo {
    #[serde(default)]
    pub valid: bool,
    #[serde(default)]
    pub facts: HostFacts,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostFacts {
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub public_ip: Option<String>,
    #[serde(default)]
    pub private_ip: Option<String>,
    /// Remaining facts the backend reports
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Entry of `GET /api/playbooks`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaybookInfo {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub description: String,
}

/// Body of `POST /api/run`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    pub playbook: String,
    pub hosts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_vars: Option<ExtraVars>,
}

/// Response of `POST /api/run`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RunResponse {
    pub job_id: String,
}

/// Execution status reported by `GET /api/status/:id`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    #[serde(alias = "success")]
    Completed,
    Failed,
    Cancelled,
    /// The backend no longer knows the job
    NotFound,
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    /// A terminal job will never report new output
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled | JobStatus::NotFound
        )
    }

    pub fn is_failure(self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::NotFound)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::NotFound => "not_found",
            JobStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response of `GET /api/status/:id`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatusResponse {
    pub status: JobStatus,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub output: Option<String>,
}

/// Optional body of `POST /api/cancel/:id`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CancelResponse {
    #[serde(default)]
    pub success: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_request_omits_missing_extra_vars() {
        let req = RunRequest {
            playbook: "linux/ubuntu22/agents/install.yml".to_string(),
            hosts: vec!["10.0.0.5".to_string(), "10.0.0.6".to_string()],
            extra_vars: None,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(
            json,
            r#"{"playbook":"linux/ubuntu22/agents/install.yml","hosts":["10.0.0.5","10.0.0.6"]}"#
        );
    }

    #[test]
    fn test_status_aliases_and_unknown_values() {
        let ok: StatusResponse =
            serde_json::from_str(r#"{"status":"success","output":"done"}"#).unwrap();
        assert_eq!(ok.status, JobStatus::Completed);
        assert_eq!(ok.progress, None);

        let gone: StatusResponse =
            serde_json::from_str(r#"{"status":"not_found","output":"","progress":0}"#).unwrap();
        assert_eq!(gone.status, JobStatus::NotFound);
        assert!(gone.status.is_terminal());

        let odd: StatusResponse = serde_json::from_str(r#"{"status":"queued"}"#).unwrap();
        assert_eq!(odd.status, JobStatus::Unknown);
        assert!(!odd.status.is_terminal());
    }

    #[test]
    fn test_host_facts_keep_unknown_fields() {
        let json = r#"{
            "web1": {"valid": true, "facts": {"hostname": "web1", "system": "Ubuntu 22.04",
                     "public_ip": "1.2.3.4", "private_ip": "10.0.0.5", "uptime": "3 days"}}
        }"#;
        let hosts: HashMap<String, HostInfo> = serde_json::from_str(json).unwrap();
        let web1 = &hosts["web1"];
        assert!(web1.valid);
        assert_eq!(web1.facts.system.as_deref(), Some("Ubuntu 22.04"));
        assert!(web1.facts.extra.contains_key("uptime"));
    }
}

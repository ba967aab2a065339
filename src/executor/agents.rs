// Monitoring and antivirus agent installers
//
// These playbooks are generic installers; the site-specific part (which
// monitoring group a device joins, which antivirus script runs) travels as
// extra vars on the run request.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::group::{single_report, submit};
use super::{DispatchContext, DispatchReport, DispatchStrategy, PlaybookRef};
use crate::api::ExtraVars;
use crate::output::errors::DashError;
use crate::output::events::{DashEvent, Level};

pub const DEVICE_KEY_VAR: &str = "device_key";
pub const CUSTOM_SCRIPT_VAR: &str = "custom_script";
pub const SCRIPT_FILENAME_VAR: &str = "script_filename";
pub const SCRIPT_CONTENT_VAR: &str = "script_content";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
    Site24x7,
    Antivirus,
}

/// Agent variables, from the `agents` settings section and `run` flags
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Case-insensitive fragments that flag a Site24x7 installer
    pub site24x7_keywords: Vec<String>,
    /// Case-insensitive fragments that flag an antivirus installer
    pub antivirus_keywords: Vec<String>,
    /// Monitoring group key; empty sends no `device_key`
    pub site24x7_device_key: String,
    /// Predefined installer script known to the backend
    pub antivirus_script: String,
    /// Local script sent inline instead of the predefined one
    pub antivirus_custom_script: Option<PathBuf>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        AgentSettings {
            site24x7_keywords: vec![
                "site24x7".to_string(),
                "24x7".to_string(),
                "site 24x7".to_string(),
            ],
            antivirus_keywords: vec![
                "antivirus".to_string(),
                "antivírus".to_string(),
                "trend".to_string(),
                "trendmicro".to_string(),
                "trend micro".to_string(),
            ],
            site24x7_device_key: String::new(),
            antivirus_script: "antivirus.ps1".to_string(),
            antivirus_custom_script: None,
        }
    }
}

fn matches_any(keywords: &[String], text: &str) -> bool {
    let text = text.to_lowercase();
    keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .any(|k| !k.is_empty() && text.contains(&k))
}

/// Show enough of a key to recognise it
fn key_preview(key: &str) -> String {
    let head: String = key.chars().take(8).collect();
    if head.len() < key.len() {
        format!("{}...", head)
    } else {
        head
    }
}

impl AgentSettings {
    pub fn classify(&self, playbook: &PlaybookRef) -> Option<AgentKind> {
        let is = |keywords: &[String]| {
            matches_any(keywords, &playbook.name) || matches_any(keywords, &playbook.path)
        };
        if is(&self.site24x7_keywords) {
            Some(AgentKind::Site24x7)
        } else if is(&self.antivirus_keywords) {
            Some(AgentKind::Antivirus)
        } else {
            None
        }
    }

    /// Extra vars for `kind`, with a one-line description of what they set.
    /// `None` when nothing is configured for it.
    pub fn extra_vars(&self, kind: AgentKind) -> Result<Option<(ExtraVars, String)>, DashError> {
        let mut vars = ExtraVars::new();

        match kind {
            AgentKind::Site24x7 => {
                let key = self.site24x7_device_key.trim();
                if key.is_empty() {
                    return Ok(None);
                }
                vars.insert(DEVICE_KEY_VAR.to_string(), key.to_string());
                Ok(Some((
                    vars,
                    format!("Site24x7 device key {}", key_preview(key)),
                )))
            }
            AgentKind::Antivirus => match &self.antivirus_custom_script {
                Some(path) => {
                    let (filename, content) = read_script(path)?;
                    vars.insert(CUSTOM_SCRIPT_VAR.to_string(), "true".to_string());
                    vars.insert(SCRIPT_FILENAME_VAR.to_string(), filename.clone());
                    vars.insert(SCRIPT_CONTENT_VAR.to_string(), content);
                    Ok(Some((vars, format!("custom antivirus script \"{}\"", filename))))
                }
                None => {
                    let script = self.antivirus_script.trim();
                    if script.is_empty() {
                        return Ok(None);
                    }
                    vars.insert(CUSTOM_SCRIPT_VAR.to_string(), "false".to_string());
                    vars.insert(SCRIPT_FILENAME_VAR.to_string(), script.to_string());
                    Ok(Some((vars, format!("antivirus script \"{}\"", script))))
                }
            },
        }
    }
}

fn read_script(path: &Path) -> Result<(String, String), DashError> {
    let content = fs::read_to_string(path).map_err(|e| DashError::Settings {
        message: format!("Failed to read antivirus script {}: {}", path.display(), e),
        suggestion: Some(
            "Check agents.antivirus_custom_script or --antivirus-script-file".to_string(),
        ),
    })?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok((filename, content))
}

/// One job for the host set, with the agent variables attached
pub struct AgentDispatch {
    settings: AgentSettings,
}

impl AgentDispatch {
    pub fn new(settings: AgentSettings) -> Self {
        AgentDispatch { settings }
    }

    pub fn handles(&self, playbook: &PlaybookRef) -> bool {
        self.settings.classify(playbook).is_some()
    }
}

#[async_trait]
impl DispatchStrategy for AgentDispatch {
    fn name(&self) -> &'static str {
        "agent"
    }

    async fn dispatch(
        &self,
        ctx: &DispatchContext,
        playbook: &PlaybookRef,
        hosts: &[String],
    ) -> Result<DispatchReport, DashError> {
        let vars = match self.settings.classify(playbook) {
            Some(kind) => self.settings.extra_vars(kind)?,
            None => None,
        };

        let extra_vars = match vars {
            Some((vars, description)) => {
                info!(playbook = playbook.label(), %description, "applying agent configuration");
                ctx.events.emit(DashEvent::Notice {
                    level: Level::Info,
                    message: format!("{}: applying {}", playbook.label(), description),
                });
                Some(vars)
            }
            None => {
                debug!(playbook = playbook.label(), "no agent configuration, sending as-is");
                None
            }
        };

        let result = submit(ctx, playbook, hosts, extra_vars).await;
        Ok(single_report(self.name(), ctx, playbook, hosts, result))
    }
}

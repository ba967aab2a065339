// Baseline configuration store
//
// Per-host credentials required before any baseline playbook may run. Entries
// are keyed by the raw hostname as the backend knows it and persisted in the
// durable client store; they are overwritten on save and never deleted
// implicitly.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::output::errors::{DashError, PasswordField, ValidationError};
use crate::storage::{KvStore, BASELINE_CONFIGS_KEY};

pub mod credentials;

pub use credentials::{generate_password, HostnameSequence};

/// Baseline credentials for one host
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Name applied to the machine during provisioning
    pub hostname: String,
    pub primary_password: String,
    pub secondary_password: String,
    /// Entries written before timestamps were recorded read as the epoch
    #[serde(default)]
    pub saved_at: DateTime<Utc>,
}

impl HostConfig {
    pub fn new(
        hostname: impl Into<String>,
        primary_password: impl Into<String>,
        secondary_password: impl Into<String>,
    ) -> Self {
        HostConfig {
            hostname: hostname.into(),
            primary_password: primary_password.into(),
            secondary_password: secondary_password.into(),
            saved_at: Utc::now(),
        }
    }

    /// Check the fields in form order, reporting the first offending one
    pub fn validate(&self, min_password_length: usize) -> Result<(), ValidationError> {
        if self.hostname.trim().is_empty() {
            return Err(ValidationError::EmptyHostname);
        }
        if self.primary_password.chars().count() < min_password_length {
            return Err(ValidationError::PasswordTooShort {
                field: PasswordField::Primary,
                min: min_password_length,
            });
        }
        if self.secondary_password.chars().count() < min_password_length {
            return Err(ValidationError::PasswordTooShort {
                field: PasswordField::Secondary,
                min: min_password_length,
            });
        }
        Ok(())
    }

    /// Complete configs are the only ones usable for dispatch
    pub fn is_complete(&self, min_password_length: usize) -> bool {
        let min = min_password_length.max(1);
        self.primary_password.chars().count() >= min
            && self.secondary_password.chars().count() >= min
    }
}

impl fmt::Debug for HostConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostConfig")
            .field("hostname", &self.hostname)
            .field("primary_password", &mask(&self.primary_password))
            .field("secondary_password", &mask(&self.secondary_password))
            .field("saved_at", &self.saved_at)
            .finish()
    }
}

/// Render a secret as asterisks of the same length
pub fn mask(secret: &str) -> String {
    "*".repeat(secret.chars().count())
}

/// Durable `hostname -> HostConfig` map
pub struct ConfigStore {
    storage: Arc<KvStore>,
    min_password_length: usize,
}

impl ConfigStore {
    pub fn new(storage: Arc<KvStore>, min_password_length: usize) -> Self {
        ConfigStore {
            storage,
            min_password_length,
        }
    }

    pub fn min_password_length(&self) -> usize {
        self.min_password_length
    }

    /// Every entry that decodes. An unreadable entry is skipped here and
    /// left as is on disk.
    fn load_all(&self) -> BTreeMap<String, HostConfig> {
        let raw: BTreeMap<String, JsonValue> =
            self.storage.get(BASELINE_CONFIGS_KEY).unwrap_or_default();
        raw.into_iter()
            .filter_map(|(host, value)| match serde_json::from_value(value) {
                Ok(config) => Some((host, config)),
                Err(e) => {
                    warn!(host = %host, error = %e, "skipping unreadable baseline configuration");
                    None
                }
            })
            .collect()
    }

    pub fn get(&self, host: &str) -> Option<HostConfig> {
        self.load_all().remove(host)
    }

    /// Validate and persist a configuration. Nothing is written when validation fails.
    pub fn save(&self, host: &str, config: HostConfig) -> Result<(), DashError> {
        if host.trim().is_empty() {
            return Err(ValidationError::EmptyHostname.into());
        }
        config.validate(self.min_password_length)?;

        debug!(
            host,
            hostname = %config.hostname,
            primary_len = config.primary_password.chars().count(),
            secondary_len = config.secondary_password.chars().count(),
            "saving baseline configuration"
        );
        let encoded = serde_json::to_value(&config).map_err(|e| DashError::Storage {
            message: format!("Failed to encode configuration for {}: {}", host, e),
            path: self.storage.path().map(|p| p.to_path_buf()),
        })?;

        // Only this host's entry changes; other entries stay byte-for-byte
        self.storage
            .update(BASELINE_CONFIGS_KEY, |all: Option<BTreeMap<String, JsonValue>>| {
                let mut all = all.unwrap_or_default();
                all.insert(host.to_string(), encoded);
                all
            })?;

        info!(host, "baseline configuration saved");
        Ok(())
    }

    /// Apply the same credentials to several hosts, validating each one on its own
    pub fn save_many<F>(
        &self,
        hosts: &[String],
        primary_password: &str,
        secondary_password: &str,
        mut hostname_for: F,
    ) -> Vec<(String, Result<(), DashError>)>
    where
        F: FnMut(&str) -> String,
    {
        hosts
            .iter()
            .map(|host| {
                let config =
                    HostConfig::new(hostname_for(host), primary_password, secondary_password);
                (host.clone(), self.save(host, config))
            })
            .collect()
    }

    pub fn is_complete(&self, host: &str) -> bool {
        self.get(host)
            .map(|c| c.is_complete(self.min_password_length))
            .unwrap_or(false)
    }

    /// Hosts among `hosts` without a complete configuration, in input order
    pub fn list_incomplete(&self, hosts: &[String]) -> Vec<String> {
        let all = self.load_all();
        let mut incomplete: Vec<String> = Vec::new();
        for host in hosts {
            let complete = all
                .get(host)
                .map(|c| c.is_complete(self.min_password_length))
                .unwrap_or(false);
            if !complete && !incomplete.contains(host) {
                incomplete.push(host.clone());
            }
        }
        incomplete
    }

    /// All saved configurations, sorted by host
    pub fn entries(&self) -> Vec<(String, HostConfig)> {
        self.load_all().into_iter().collect()
    }
}

/// Decides whether a playbook needs per-host baseline configuration
#[derive(Debug, Clone)]
pub struct BaselineClassifier {
    keywords: Vec<String>,
}

impl BaselineClassifier {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        BaselineClassifier {
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    pub fn is_baseline(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.keywords.iter().any(|k| lower.contains(k.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn store() -> ConfigStore {
        ConfigStore::new(Arc::new(KvStore::in_memory()), 8)
    }

    #[test]
    fn test_configured_host_is_complete() {
        let store = store();
        store
            .save(
                "10.0.0.5",
                HostConfig::new("SKY-INT-SDL-01", "Sup3rSecret!", "R00tPass!!"),
            )
            .unwrap();

        assert!(store.is_complete("10.0.0.5"));
        assert!(!store.is_complete("10.0.0.6"));
    }

    #[test]
    fn test_rejected_save_leaves_store_untouched() {
        let store = store();

        let err = store
            .save("10.0.0.5", HostConfig::new("web", "short", "R00tPass!!"))
            .unwrap_err();
        assert!(matches!(
            err,
            DashError::Validation(ValidationError::PasswordTooShort {
                field: PasswordField::Primary,
                min: 8
            })
        ));

        let err = store
            .save("10.0.0.5", HostConfig::new("web", "Sup3rSecret!", "tiny"))
            .unwrap_err();
        assert!(matches!(
            err,
            DashError::Validation(ValidationError::PasswordTooShort {
                field: PasswordField::Secondary,
                ..
            })
        ));

        let err = store
            .save("10.0.0.5", HostConfig::new("  ", "Sup3rSecret!", "R00tPass!!"))
            .unwrap_err();
        assert!(matches!(err, DashError::Validation(ValidationError::EmptyHostname)));

        assert!(store.get("10.0.0.5").is_none());
        assert!(store.entries().is_empty());
    }

    #[test]
    fn test_saving_twice_keeps_last_value() {
        let store = store();
        let config = HostConfig::new("SKY-INT-SDL-01", "Sup3rSecret!", "R00tPass!!");

        store.save("10.0.0.5", config.clone()).unwrap();
        assert!(store.is_complete("10.0.0.5"));
        store.save("10.0.0.5", config.clone()).unwrap();
        assert!(store.is_complete("10.0.0.5"));

        assert_eq!(store.get("10.0.0.5"), Some(config));
    }

    #[test]
    fn test_list_incomplete_preserves_order_and_dedups() {
        let store = store();
        store
            .save("b", HostConfig::new("b", "Sup3rSecret!", "R00tPass!!"))
            .unwrap();

        let hosts: Vec<String> = ["c", "b", "a", "c"].iter().map(|s| s.to_string()).collect();
        assert_eq!(store.list_incomplete(&hosts), vec!["c", "a"]);
    }

    #[test]
    fn test_save_many_reports_per_host() {
        let store = store();
        let hosts = vec!["10.0.0.5".to_string(), "".to_string()];
        let seq = HostnameSequence::new("SKY-INT-SDL-");

        let results =
            store.save_many(&hosts, "Sup3rSecret!", "R00tPass!!", |h| seq.hostname_for(h));

        assert!(results[0].1.is_ok());
        assert!(results[1].1.is_err());
        assert_eq!(store.get("10.0.0.5").unwrap().hostname, "SKY-INT-SDL-01");
    }

    #[test]
    fn test_configs_persist_across_reloads() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("local.json");

        {
            let store = ConfigStore::new(Arc::new(KvStore::open(&path).unwrap()), 8);
            store
                .save("10.0.0.5", HostConfig::new("web", "Sup3rSecret!", "R00tPass!!"))
                .unwrap();
        }

        let store = ConfigStore::new(Arc::new(KvStore::open(&path).unwrap()), 8);
        assert!(store.is_complete("10.0.0.5"));
    }

    #[test]
    fn test_save_keeps_entries_it_cannot_read() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("local.json");
        std::fs::write(
            &path,
            r#"{"baseline_configs": {
                "10.0.0.4": {
                    "hostname": "legacy",
                    "primary_password": "Sup3rSecret!",
                    "secondary_password": "R00tPass!!"
                },
                "10.0.0.3": {"hostname": 42}
            }}"#,
        )
        .unwrap();

        let store = ConfigStore::new(Arc::new(KvStore::open(&path).unwrap()), 8);
        // Missing timestamp still reads; the malformed entry is skipped
        assert!(store.is_complete("10.0.0.4"));
        assert!(store.get("10.0.0.3").is_none());

        store
            .save("10.0.0.5", HostConfig::new("web", "Sup3rSecret!", "R00tPass!!"))
            .unwrap();

        let reopened = ConfigStore::new(Arc::new(KvStore::open(&path).unwrap()), 8);
        let hosts: Vec<String> = reopened.entries().into_iter().map(|(h, _)| h).collect();
        assert_eq!(hosts, vec!["10.0.0.4", "10.0.0.5"]);
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains(r#""hostname": 42"#));
    }

    #[test]
    fn test_save_from_two_stores_keeps_both_hosts() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("local.json");

        let first = ConfigStore::new(Arc::new(KvStore::open(&path).unwrap()), 8);
        let second = ConfigStore::new(Arc::new(KvStore::open(&path).unwrap()), 8);
        first
            .save("a", HostConfig::new("a", "Sup3rSecret!", "R00tPass!!"))
            .unwrap();
        second
            .save("b", HostConfig::new("b", "Sup3rSecret!", "R00tPass!!"))
            .unwrap();

        let reopened = ConfigStore::new(Arc::new(KvStore::open(&path).unwrap()), 8);
        assert!(reopened.is_complete("a"));
        assert!(reopened.is_complete("b"));
    }

    #[test]
    fn test_debug_masks_passwords() {
        let config = HostConfig::new("web", "Sup3rSecret!", "R00tPass!!");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("Sup3rSecret!"));
        assert!(debug.contains("************"));
    }

    #[test]
    fn test_baseline_classification() {
        let classifier = BaselineClassifier::new(["baseline", "configuracao-base"]);
        assert!(classifier.is_baseline("linux/ubuntu22/baseline/Baseline-Ubuntu.yml"));
        assert!(classifier.is_baseline("CONFIGURACAO-BASE windows"));
        assert!(!classifier.is_baseline("linux/ubuntu22/agents/install-agent.yml"));
    }
}

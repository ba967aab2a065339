// Extra variables sent with baseline run requests

use crate::api::ExtraVars;
use crate::baseline::HostConfig;
use crate::jobs::{HOST_SPECIFIC_VAR, SINGLE_HOST_EXECUTION_VAR};

pub const NEW_HOSTNAME_VAR: &str = "new_hostname";

// Linux playbooks
pub const PARCEIRO_PASSWORD_VAR: &str = "parceiro_password";
pub const ROOT_PASSWORD_VAR: &str = "root_password";

// Windows playbooks
pub const USER_PASSWORD_VAR: &str = "user_password";
pub const ADMIN_PASSWORD_VAR: &str = "admin_password";

/// Hostname override plus both credentials under the Linux and Windows names
pub fn credential_vars(config: &HostConfig) -> ExtraVars {
    let mut vars = ExtraVars::new();
    vars.insert(NEW_HOSTNAME_VAR.to_string(), config.hostname.clone());
    vars.insert(PARCEIRO_PASSWORD_VAR.to_string(), config.primary_password.clone());
    vars.insert(ROOT_PASSWORD_VAR.to_string(), config.secondary_password.clone());
    vars.insert(USER_PASSWORD_VAR.to_string(), config.primary_password.clone());
    vars.insert(ADMIN_PASSWORD_VAR.to_string(), config.secondary_password.clone());
    vars
}

/// Credentials tagged as one step of a sequential multi-host run
pub fn single_host_vars(config: &HostConfig, host: &str) -> ExtraVars {
    let mut vars = credential_vars(config);
    vars.insert(SINGLE_HOST_EXECUTION_VAR.to_string(), "true".to_string());
    vars.insert(HOST_SPECIFIC_VAR.to_string(), host.to_string());
    vars
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_credentials_under_both_naming_schemes() {
        let config = HostConfig::new("SKY-INT-SDL-01", "Sup3rSecret!", "R00tPass!!");
        let vars = credential_vars(&config);

        assert_eq!(vars[NEW_HOSTNAME_VAR], "SKY-INT-SDL-01");
        assert_eq!(vars[PARCEIRO_PASSWORD_VAR], "Sup3rSecret!");
        assert_eq!(vars[USER_PASSWORD_VAR], "Sup3rSecret!");
        assert_eq!(vars[ROOT_PASSWORD_VAR], "R00tPass!!");
        assert_eq!(vars[ADMIN_PASSWORD_VAR], "R00tPass!!");
        assert!(!vars.contains_key(SINGLE_HOST_EXECUTION_VAR));
    }

    #[test]
    fn test_single_host_tags() {
        let config = HostConfig::new("web", "Sup3rSecret!", "R00tPass!!");
        let vars = single_host_vars(&config, "10.0.0.5");

        assert_eq!(vars[SINGLE_HOST_EXECUTION_VAR], "true");
        assert_eq!(vars[HOST_SPECIFIC_VAR], "10.0.0.5");
        assert_eq!(vars.len(), 7);
    }
}

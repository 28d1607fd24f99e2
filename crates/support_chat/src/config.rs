use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, SupportChatError};

pub const DEFAULT_CONFIG_FILE: &str = "support_chat.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SupportChatConfig {
    pub api_base: String,
    pub auth_token: Option<String>,
    /// Sender id of the customer; matched against server messages when
    /// reconciling optimistic sends.
    pub customer_id: String,
    pub poll_interval_ms: u64,
    /// Consecutive failed ticks before a user-visible warning.
    pub failure_warning_threshold: u32,
    pub request_timeout_secs: u64,
}

impl Default for SupportChatConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8080/api".to_string(),
            auth_token: None,
            customer_id: "customer".to_string(),
            poll_interval_ms: 3000,
            failure_warning_threshold: 3,
            request_timeout_secs: 10,
        }
    }
}

impl SupportChatConfig {
    /// Read `path` if it exists, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| {
                SupportChatError::Config(format!("failed to read {}: {}", path.display(), e))
            })?;
            toml::from_str::<SupportChatConfig>(&content).map_err(|e| {
                SupportChatError::Config(format!("failed to parse {}: {}", path.display(), e))
            })?
        } else {
            tracing::debug!("No config file at {}, using defaults", path.display());
            SupportChatConfig::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SUPPORT_CHAT_*` overrides from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(api_base) = lookup("SUPPORT_CHAT_API_BASE") {
            self.api_base = api_base;
        }
        if let Some(token) = lookup("SUPPORT_CHAT_TOKEN") {
            self.auth_token = Some(token).filter(|t| !t.trim().is_empty());
        }
        if let Some(customer_id) = lookup("SUPPORT_CHAT_CUSTOMER_ID") {
            self.customer_id = customer_id;
        }
        if let Some(value) = lookup("SUPPORT_CHAT_POLL_INTERVAL_MS") {
            self.poll_interval_ms = parse_number("SUPPORT_CHAT_POLL_INTERVAL_MS", &value)?;
        }
        if let Some(value) = lookup("SUPPORT_CHAT_FAILURE_THRESHOLD") {
            self.failure_warning_threshold =
                parse_number("SUPPORT_CHAT_FAILURE_THRESHOLD", &value)?;
        }
        if let Some(value) = lookup("SUPPORT_CHAT_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = parse_number("SUPPORT_CHAT_REQUEST_TIMEOUT_SECS", &value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_base.trim().is_empty() {
            return Err(SupportChatError::Config("api_base must not be empty".into()));
        }
        if self.customer_id.trim().is_empty() {
            return Err(SupportChatError::Config("customer_id must not be empty".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(SupportChatError::Config("poll_interval_ms must be positive".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(SupportChatError::Config(
                "request_timeout_secs must be positive".into(),
            ));
        }
        if self.failure_warning_threshold == 0 {
            return Err(SupportChatError::Config(
                "failure_warning_threshold must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| SupportChatError::Config(format!("{} is not a valid number: {:?}", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = SupportChatConfig::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.poll_interval(), Duration::from_secs(3));
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(
            &path,
            "api_base = \"https://shop.example/api\"\npoll_interval_ms = 1500\n",
        )
        .unwrap();

        let config = SupportChatConfig::load(&path).unwrap();
        assert_eq!(config.api_base, "https://shop.example/api");
        assert_eq!(config.poll_interval_ms, 1500);
        assert_eq!(config.failure_warning_threshold, 3);
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("SUPPORT_CHAT_TOKEN", "secret"),
            ("SUPPORT_CHAT_CUSTOMER_ID", "cust-42"),
            ("SUPPORT_CHAT_POLL_INTERVAL_MS", " 500 "),
        ]
        .into_iter()
        .collect();

        let mut config = SupportChatConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.auth_token.as_deref(), Some("secret"));
        assert_eq!(config.customer_id, "cust-42");
        assert_eq!(config.poll_interval_ms, 500);
    }

    #[test]
    fn test_bad_override_is_config_error() {
        let mut config = SupportChatConfig::default();
        let err = config
            .apply_overrides(|key| (key == "SUPPORT_CHAT_FAILURE_THRESHOLD").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, SupportChatError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let config = SupportChatConfig {
            poll_interval_ms: 0,
            ..SupportChatConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_request_timeout() {
        let config = SupportChatConfig {
            request_timeout_secs: 0,
            ..SupportChatConfig::default()
        };
        assert!(matches!(config.validate(), Err(SupportChatError::Config(_))));

        let mut config = SupportChatConfig::default();
        config
            .apply_overrides(|key| (key == "SUPPORT_CHAT_REQUEST_TIMEOUT_SECS").then(|| "0".to_string()))
            .unwrap();
        assert!(config.validate().is_err());
    }
}

//! Operator-facing configuration.
//!
//! One JSON file, camelCase keys, validated completely at load. A config
//! that does not validate never starts a tick.

use std::path::Path;

use serde::Deserialize;

use engine::policy::{Policy, PolicyOverrides};
use market::client::{
    DEFAULT_AUTH_HEADER, DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_BACKOFF_MS, DEFAULT_TIMEOUT_MS,
    MarketConfig,
};

use crate::error::AutopilotError;

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AppConfig {
    /// The marketplace identity this worker bids and submits as.
    pub agent_id: String,

    pub market: MarketSection,

    #[serde(default)]
    pub policy: PolicyOverrides,

    pub state: StateSection,

    /// NEAR→USD rate used by settlement reports. The rate is an input, not
    /// something the autopilot fetches; absent means USD totals stay zero.
    #[serde(default)]
    pub near_price_usd: Option<f64>,

    #[serde(default)]
    pub submit_signing_key: Option<String>,

    #[serde(default)]
    pub submit_signer_id: Option<String>,

    /// Where the upstream publishes finished artifacts. Without it, every
    /// submission attempt fails closed through the retry machine.
    #[serde(default)]
    pub artifact: Option<ArtifactSection>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MarketSection {
    pub base_url: String,
    pub api_key: String,

    #[serde(default = "default_auth_header")]
    pub auth_header: String,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub retry: RetrySection,
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RetrySection {
    #[serde(default = "default_retry_attempts")]
    pub attempts: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRY_ATTEMPTS,
            backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StateSection {
    pub driver: StateDriver,
    pub path: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateDriver {
    File,
    Sqlite,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ArtifactSection {
    pub deliverable_url: String,
}

fn default_auth_header() -> String {
    DEFAULT_AUTH_HEADER.to_string()
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}

fn default_retry_backoff_ms() -> u64 {
    DEFAULT_RETRY_BACKOFF_MS
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, AutopilotError> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            AutopilotError::ConfigInvalid(format!("read {}: {err}", path.display()))
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, AutopilotError> {
        let config: AppConfig = serde_json::from_str(raw)
            .map_err(|err| AutopilotError::ConfigInvalid(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AutopilotError> {
        if self.agent_id.trim().is_empty() {
            return Err(invalid("agentId must not be empty"));
        }
        if self.market.base_url.trim().is_empty() {
            return Err(invalid("market.baseUrl must not be empty"));
        }
        if !self.market.base_url.starts_with("http://")
            && !self.market.base_url.starts_with("https://")
        {
            return Err(invalid("market.baseUrl must be an http(s) URL"));
        }
        if self.market.api_key.trim().is_empty() {
            return Err(invalid("market.apiKey must not be empty"));
        }
        if self.market.auth_header.trim().is_empty() {
            return Err(invalid("market.authHeader must not be empty"));
        }
        if self.market.timeout_ms == 0 {
            return Err(invalid("market.timeoutMs must be positive"));
        }
        if self.market.retry.attempts == 0 {
            return Err(invalid("market.retry.attempts must be at least 1"));
        }
        if self.state.path.trim().is_empty() {
            return Err(invalid("state.path must not be empty"));
        }
        if let Some(rate) = self.near_price_usd {
            if !rate.is_finite() || rate <= 0.0 {
                return Err(invalid("nearPriceUsd must be finite and positive"));
            }
        }
        if let Some(key) = &self.submit_signing_key {
            if key.trim().is_empty() {
                return Err(invalid("submitSigningKey must not be empty when set"));
            }
        }

        // Policy overrides must merge into a valid policy.
        self.resolve_policy()?;
        Ok(())
    }

    pub fn resolve_policy(&self) -> Result<Policy, AutopilotError> {
        Ok(Policy::resolve(&self.policy)?)
    }

    pub fn market_config(&self) -> MarketConfig {
        MarketConfig {
            base_url: self.market.base_url.clone(),
            api_key: self.market.api_key.clone(),
            auth_header: self.market.auth_header.clone(),
            timeout_ms: self.market.timeout_ms,
            retry_attempts: self.market.retry.attempts,
            retry_backoff_ms: self.market.retry.backoff_ms,
        }
    }

    /// The identity used in manifest signatures; falls back to the agent id.
    pub fn signer_id(&self) -> &str {
        self.submit_signer_id.as_deref().unwrap_or(&self.agent_id)
    }

    pub fn near_price_usd(&self) -> f64 {
        self.near_price_usd.unwrap_or(0.0)
    }
}

fn invalid(message: &str) -> AutopilotError {
    AutopilotError::ConfigInvalid(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> serde_json::Value {
        serde_json::json!({
            "agentId": "agent-1",
            "market": {
                "baseUrl": "https://market.example",
                "apiKey": "key-123"
            },
            "state": {
                "driver": "file",
                "path": "state.json"
            }
        })
    }

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config = AppConfig::parse(&minimal().to_string()).unwrap();
        assert_eq!(config.agent_id, "agent-1");
        assert_eq!(config.market.auth_header, "authorization");
        assert_eq!(config.market.timeout_ms, 10_000);
        assert_eq!(config.market.retry.attempts, 3);
        assert_eq!(config.state.driver, StateDriver::File);
        assert_eq!(config.near_price_usd(), 0.0);
        assert_eq!(config.signer_id(), "agent-1");
    }

    #[test]
    fn policy_overrides_flow_through() {
        let mut raw = minimal();
        raw["policy"] = serde_json::json!({"minBudgetNear": 1.0, "failClosed": false});

        let config = AppConfig::parse(&raw.to_string()).unwrap();
        let policy = config.resolve_policy().unwrap();
        assert_eq!(policy.min_budget_near, 1.0);
        assert!(!policy.fail_closed);
    }

    #[test]
    fn invalid_policy_override_fails_load() {
        let mut raw = minimal();
        raw["policy"] = serde_json::json!({"bidDiscountBps": 0});
        assert!(AppConfig::parse(&raw.to_string()).is_err());
    }

    #[test]
    fn empty_agent_id_is_rejected() {
        let mut raw = minimal();
        raw["agentId"] = serde_json::json!("  ");
        assert!(AppConfig::parse(&raw.to_string()).is_err());
    }

    #[test]
    fn non_http_base_url_is_rejected() {
        let mut raw = minimal();
        raw["market"]["baseUrl"] = serde_json::json!("ftp://market.example");
        assert!(AppConfig::parse(&raw.to_string()).is_err());
    }

    #[test]
    fn negative_price_is_rejected() {
        let mut raw = minimal();
        raw["nearPriceUsd"] = serde_json::json!(-1.0);
        assert!(AppConfig::parse(&raw.to_string()).is_err());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let mut raw = minimal();
        raw["surprise"] = serde_json::json!(true);
        assert!(AppConfig::parse(&raw.to_string()).is_err());
    }

    #[test]
    fn sqlite_driver_parses() {
        let mut raw = minimal();
        raw["state"] = serde_json::json!({"driver": "sqlite", "path": "markers.db"});
        let config = AppConfig::parse(&raw.to_string()).unwrap();
        assert_eq!(config.state.driver, StateDriver::Sqlite);
    }
}

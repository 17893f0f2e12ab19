// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Gateway configuration.
//!
//! Loaded from a YAML file; secrets may instead come from the environment
//! (`DATAGATE_JWT_SECRET`, `DATAGATE_MDH_PASSWORD`, `DATAGATE_LLM_API_KEY`),
//! which always wins over the file. Missing mandatory secrets are fatal at
//! startup.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::principal::Role;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("missing mandatory secret: {0}")]
    MissingSecret(&'static str),

    #[error("audit directory is not usable: {0}")]
    AuditDirectory(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub oauth: OauthConfig,
    pub mdh: MdhConfig,
    pub security: SecurityConfig,
    pub llm: LlmConfig,
    pub features: FeatureFlags,
    pub audit: AuditConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            oauth: OauthConfig::default(),
            mdh: MdhConfig::default(),
            security: SecurityConfig::default(),
            llm: LlmConfig::default(),
            features: FeatureFlags::default(),
            audit: AuditConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8001".parse().expect("static addr"),
        }
    }
}

/// A registered OAuth subject and its granted scopes.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SubjectEntry {
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Explicit role override; otherwise the role is projected from scopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OauthConfig {
    /// When set, tokens are validated by remote introspection instead of
    /// local signature verification.
    pub introspection_url: Option<String>,
    pub issuer: String,
    pub audience: String,
    pub jwt_secret: Option<String>,
    pub algorithm: String,
    /// Subject → granted scopes. Unknown subjects get role `unknown`.
    pub subjects: HashMap<String, SubjectEntry>,
    /// Confidential clients allowed to call /oauth/revoke.
    pub clients: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MdhConfig {
    pub base_url: String,
    pub account_id: String,
    pub username: String,
    pub password: Option<String>,
    /// Separate credentials for record queries, when the hub requires them.
    pub datahub_username: Option<String>,
    pub datahub_password: Option<String>,
    pub repository_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitRule {
    pub burst: u32,
    pub minute: u32,
    pub hour: u32,
    pub day: u32,
}

impl RateLimitRule {
    pub const fn new(burst: u32, minute: u32, hour: u32, day: u32) -> Self {
        Self {
            burst,
            minute,
            hour,
            day,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub rate_limits: HashMap<String, RateLimitRule>,
    pub whitelist: Vec<String>,
    pub whitelist_bypass_endpoints: Vec<String>,
    pub rule_confidence_threshold: f64,
    pub llm_boost_threshold: f64,
    pub llm_cache_ttl_seconds: u64,
    pub llm_cache_max_entries: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            rate_limits: default_rate_limits(),
            whitelist: vec!["127.0.0.1".into(), "::1".into(), "localhost".into()],
            whitelist_bypass_endpoints: vec!["/test/rate-limit".into()],
            rule_confidence_threshold: 0.7,
            llm_boost_threshold: 0.2,
            llm_cache_ttl_seconds: 3600,
            llm_cache_max_entries: 1000,
        }
    }
}

/// Per-endpoint limits. OAuth endpoints are strict, MCP endpoints are
/// generous for authenticated traffic, the self-test endpoint is tiny.
pub fn default_rate_limits() -> HashMap<String, RateLimitRule> {
    let mut rules = HashMap::new();
    rules.insert("/oauth/register".into(), RateLimitRule::new(2, 5, 20, 100));
    rules.insert(
        "/oauth/authorize".into(),
        RateLimitRule::new(3, 10, 100, 500),
    );
    rules.insert("/oauth/token".into(), RateLimitRule::new(5, 20, 200, 1000));
    rules.insert("/oauth/revoke".into(), RateLimitRule::new(3, 10, 50, 200));
    rules.insert("/mcp".into(), RateLimitRule::new(15, 60, 1000, 5000));
    rules.insert("/health".into(), RateLimitRule::new(5, 30, 300, 1000));
    rules.insert("/test/rate-limit".into(), RateLimitRule::new(1, 3, 10, 50));
    rules.insert("default".into(), RateLimitRule::new(5, 30, 300, 1000));
    rules
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// `anthropic` or `none` (rule-based fallbacks only).
    pub provider: String,
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub advisory_timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "none".into(),
            model: "claude-sonnet-4-20250514".into(),
            api_key: None,
            base_url: None,
            advisory_timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    pub proactive_insights: bool,
    pub follow_up_suggestions: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            proactive_insights: true,
            follow_up_suggestions: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub directory: PathBuf,
    pub retention_days: u32,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("logs/audit"),
            retention_days: 30,
        }
    }
}

impl GatewayConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let mut config: GatewayConfig = serde_yaml::from_str(raw)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(secret) = std::env::var("DATAGATE_JWT_SECRET") {
            self.oauth.jwt_secret = Some(secret);
        }
        if let Ok(password) = std::env::var("DATAGATE_MDH_PASSWORD") {
            self.mdh.password = Some(password);
        }
        if let Ok(password) = std::env::var("DATAGATE_MDH_DATAHUB_PASSWORD") {
            self.mdh.datahub_password = Some(password);
        }
        if let Ok(key) = std::env::var("DATAGATE_LLM_API_KEY") {
            self.llm.api_key = Some(key);
        }
    }

    /// Fail fast on configurations that cannot possibly serve traffic.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.oauth.introspection_url.is_none()
            && self.oauth.jwt_secret.as_deref().unwrap_or("").is_empty()
        {
            return Err(ConfigError::MissingSecret(
                "oauth.jwt_secret (or oauth.introspection_url)",
            ));
        }
        if !self.mdh.base_url.is_empty() && self.mdh.password.as_deref().unwrap_or("").is_empty() {
            return Err(ConfigError::MissingSecret("mdh.password"));
        }
        std::fs::create_dir_all(&self.audit.directory)
            .map_err(|e| ConfigError::AuditDirectory(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_parse_from_empty_yaml() {
        let config = GatewayConfig::from_yaml("{}").unwrap();
        assert_eq!(config.security.rule_confidence_threshold, 0.7);
        assert_eq!(config.security.llm_cache_max_entries, 1000);
        assert_eq!(config.audit.retention_days, 30);
        assert!(config.features.proactive_insights);
    }

    #[test]
    fn test_rate_limit_table_defaults() {
        let rules = default_rate_limits();
        assert_eq!(rules["/test/rate-limit"].burst, 1);
        assert_eq!(rules["/mcp"].minute, 60);
        assert_eq!(rules["default"].day, 1000);
    }

    #[test]
    fn test_yaml_overrides() {
        let yaml = r#"
oauth:
  issuer: https://auth.example.com
  audience: datagate
  jwt_secret: supersecret
security:
  rule_confidence_threshold: 0.8
  rate_limits:
    "/mcp": { burst: 2, minute: 5, hour: 10, day: 20 }
"#;
        let config = GatewayConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.oauth.issuer, "https://auth.example.com");
        assert_eq!(config.security.rule_confidence_threshold, 0.8);
        assert_eq!(
            config.security.rate_limits["/mcp"],
            RateLimitRule::new(2, 5, 10, 20)
        );
    }

    #[test]
    fn test_validate_requires_a_token_secret() {
        let mut config = GatewayConfig::default();
        config.audit.directory = std::env::temp_dir().join("datagate-audit-test");
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingSecret(_)));

        config.oauth.jwt_secret = Some("secret".into());
        assert!(config.validate().is_ok());
    }
}

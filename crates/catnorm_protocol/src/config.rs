//! Persisted configuration document (§6).
//!
//! The document is loaded once at process start and held behind an
//! atomic-swap cell by the binary (see `catnorm::config`); this module
//! only owns the shape and the public/privileged read projections.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

/// One configured LLM provider (§4.4, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Higher priority is tried first by the router.
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_rate_per_sec")]
    pub rate_per_sec: f64,
    /// Write-only: present on load/save, but never echoed back by a
    /// public read (§4.4 "Secrecy", §6).
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
    pub endpoint: String,
}

fn default_true() -> bool {
    true
}
fn default_weight() -> f64 {
    1.0
}
fn default_max_workers() -> usize {
    2
}
fn default_rate_per_sec() -> f64 {
    2.0
}

impl ProviderConfig {
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    /// Projection returned by the public read API: everything except the
    /// key material itself.
    pub fn to_public(&self) -> ProviderConfigPublic {
        ProviderConfigPublic {
            name: self.name.clone(),
            enabled: self.enabled,
            priority: self.priority,
            weight: self.weight,
            max_workers: self.max_workers,
            rate_per_sec: self.rate_per_sec,
            has_api_key: self.has_api_key(),
            model: self.model.clone(),
            endpoint: self.endpoint.clone(),
        }
    }
}

/// What a non-privileged caller gets back for a provider (§4.4, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfigPublic {
    pub name: String,
    pub enabled: bool,
    pub priority: i32,
    pub weight: f64,
    pub max_workers: usize,
    pub rate_per_sec: f64,
    pub has_api_key: bool,
    pub model: String,
    pub endpoint: String,
}

/// Persisted web-search configuration placeholder (§6): out of the
/// core's scope beyond carrying the document shape through untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebSearchConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub provider: Option<String>,
}

/// The full persisted configuration document (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log_level: LogLevel,
    pub port: u16,
    pub database_path: String,
    pub normalized_database_path: String,
    pub service_database_path: String,
    #[serde(default = "default_max_open_conns")]
    pub max_open_conns: u32,
    #[serde(default = "default_max_idle_conns")]
    pub max_idle_conns: u32,
    #[serde(default = "default_conn_max_lifetime_seconds")]
    pub conn_max_lifetime_seconds: u64,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub web_search: WebSearchConfig,
    /// Monotone version, bumped on every successful update (§6).
    #[serde(default)]
    pub version: u64,
}

fn default_max_open_conns() -> u32 {
    10
}
fn default_max_idle_conns() -> u32 {
    5
}
fn default_conn_max_lifetime_seconds() -> u64 {
    1800
}

impl Config {
    /// Projection returned by the public read API (§6): provider secrets
    /// are redacted to `has_api_key`.
    pub fn to_public(&self) -> ConfigPublic {
        ConfigPublic {
            log_level: self.log_level,
            port: self.port,
            max_open_conns: self.max_open_conns,
            max_idle_conns: self.max_idle_conns,
            conn_max_lifetime_seconds: self.conn_max_lifetime_seconds,
            providers: self.providers.iter().map(ProviderConfig::to_public).collect(),
            web_search: self.web_search.clone(),
            version: self.version,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigPublic {
    pub log_level: LogLevel,
    pub port: u16,
    pub max_open_conns: u32,
    pub max_idle_conns: u32,
    pub conn_max_lifetime_seconds: u64,
    pub providers: Vec<ProviderConfigPublic>,
    pub web_search: WebSearchConfig,
    pub version: u64,
}

/// One entry in the configuration change history (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigHistoryEntry {
    pub version: u64,
    pub changed_by: String,
    pub reason: Option<String>,
    pub changed_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_provider() -> ProviderConfig {
        ProviderConfig {
            name: "primary".to_string(),
            enabled: true,
            priority: 10,
            weight: 1.0,
            max_workers: 2,
            rate_per_sec: 2.0,
            api_key: Some("sk-secret".to_string()),
            model: "generic-chat-v1".to_string(),
            endpoint: "https://llm.example.internal/v1/chat/completions".to_string(),
        }
    }

    #[test]
    fn public_projection_redacts_key() {
        let provider = sample_provider();
        let public = provider.to_public();
        assert!(public.has_api_key);
        let json = serde_json::to_string(&public).unwrap();
        assert!(!json.contains("sk-secret"));
    }

    #[test]
    fn has_api_key_false_when_empty() {
        let mut provider = sample_provider();
        provider.api_key = Some(String::new());
        assert!(!provider.has_api_key());
        provider.api_key = None;
        assert!(!provider.has_api_key());
    }
}

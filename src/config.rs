//! Configuration -- TOML file with `SREMEDIC_*` environment overrides.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind: String,
    pub db_path: String,
    pub dedup_window_secs: u64,
    pub notify_webhook_url: Option<String>,
    pub cluster: ClusterConfig,
    pub llm: LlmConfig,
    pub timeouts: TimeoutConfig,
    pub lease: LeaseConfig,
    pub demo_workloads: Vec<DemoWorkload>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: "0.0.0.0:8080".to_string(),
            db_path: "data/sremedic.db".to_string(),
            dedup_window_secs: 120,
            notify_webhook_url: None,
            cluster: ClusterConfig::default(),
            llm: LlmConfig::default(),
            timeouts: TimeoutConfig::default(),
            lease: LeaseConfig::default(),
            demo_workloads: vec![
                DemoWorkload { namespace: "ns-a".into(), workload: "app-a".into() },
                DemoWorkload { namespace: "ns-b".into(), workload: "app-b".into() },
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Kubernetes API base URL. Defaults to the in-cluster service env
    /// (`KUBERNETES_SERVICE_HOST`/`PORT`) when unset.
    pub api_url: Option<String>,
    /// Bearer token file. The in-cluster service account path is tried
    /// when unset.
    pub token_path: Option<String>,
    pub accept_invalid_certs: bool,
    pub log_tail_lines: u32,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            api_url: None,
            token_path: None,
            accept_invalid_certs: false,
            log_tail_lines: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// "mock" or "openai".
    pub provider: String,
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        LlmConfig {
            provider: "mock".to_string(),
            api_url: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            max_tokens: 512,
            temperature: 0.2,
            max_retries: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub per_source_secs: u64,
    pub investigate_secs: u64,
    pub recommend_secs: u64,
    pub llm_request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        TimeoutConfig {
            per_source_secs: 10,
            investigate_secs: 30,
            recommend_secs: 20,
            llm_request_secs: 15,
        }
    }
}

impl TimeoutConfig {
    pub fn per_source(&self) -> Duration {
        Duration::from_secs(self.per_source_secs)
    }

    pub fn investigate(&self) -> Duration {
        Duration::from_secs(self.investigate_secs)
    }

    pub fn recommend(&self) -> Duration {
        Duration::from_secs(self.recommend_secs)
    }

    pub fn llm_request(&self) -> Duration {
        Duration::from_secs(self.llm_request_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    pub ttl_secs: u64,
    pub renew_secs: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        LeaseConfig { ttl_secs: 30, renew_secs: 10 }
    }
}

impl LeaseConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn renew_every(&self) -> Duration {
        Duration::from_secs(self.renew_secs)
    }
}

/// A demo-namespace workload surfaced by `GET /demo/workloads`.
#[derive(Debug, Clone, Deserialize)]
pub struct DemoWorkload {
    pub namespace: String,
    pub workload: String,
}

impl Config {
    /// Load the config file (when present) and apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let mut cfg = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p)
                    .with_context(|| format!("failed to read config file {}", p.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("failed to parse config file {}", p.display()))?
            }
            None => Config::default(),
        };
        cfg.apply_env();
        Ok(cfg)
    }

    fn apply_env(&mut self) {
        if let Ok(bind) = std::env::var("SREMEDIC_BIND") {
            self.bind = bind;
        }
        if let Ok(db) = std::env::var("SREMEDIC_DB_PATH") {
            self.db_path = db;
        }
        if let Ok(url) = std::env::var("SREMEDIC_WEBHOOK_URL") {
            if !url.is_empty() {
                self.notify_webhook_url = Some(url);
            }
        }
        if let Ok(provider) = std::env::var("SREMEDIC_LLM_PROVIDER") {
            self.llm.provider = provider.to_lowercase();
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.is_empty() {
                self.llm.api_key = Some(key);
            }
        }
        if let Ok(model) = std::env::var("SREMEDIC_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Ok(url) = std::env::var("SREMEDIC_CLUSTER_API_URL") {
            self.cluster.api_url = Some(url);
        }
        if let Ok(path) = std::env::var("SREMEDIC_CLUSTER_TOKEN_PATH") {
            self.cluster.token_path = Some(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.timeouts.per_source_secs, 10);
        assert_eq!(cfg.timeouts.investigate_secs, 30);
        assert_eq!(cfg.lease.ttl_secs, 30);
        assert!(cfg.lease.renew_secs < cfg.lease.ttl_secs);
        assert_eq!(cfg.llm.provider, "mock");
        assert_eq!(cfg.demo_workloads.len(), 2);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            bind = "127.0.0.1:9090"

            [timeouts]
            recommend_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:9090");
        assert_eq!(cfg.timeouts.recommend_secs, 5);
        assert_eq!(cfg.timeouts.per_source_secs, 10);
        assert_eq!(cfg.db_path, "data/sremedic.db");
    }
}

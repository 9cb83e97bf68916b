//! File-plus-environment configuration for the murmurd process.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use murmur_provider::ProviderConfig;
use murmur_worker::WorkerConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_queue_path")]
    pub queue_path: PathBuf,
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: i64,
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub worker: WorkerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    #[serde(default = "default_consumer")]
    pub consumer: String,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_claim_idle_secs")]
    pub claim_idle_secs: u64,
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/murmur.db")
}

fn default_queue_path() -> PathBuf {
    PathBuf::from("data/queue.db")
}

fn default_jwt_secret() -> String {
    "dev-secret-change-me".to_string()
}

fn default_token_ttl_hours() -> i64 {
    24
}

fn default_bus_capacity() -> usize {
    32
}

fn default_consumer() -> String {
    "worker-1".to_string()
}

fn default_read_timeout_secs() -> u64 {
    5
}

fn default_claim_idle_secs() -> u64 {
    60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            database_path: default_database_path(),
            queue_path: default_queue_path(),
            jwt_secret: default_jwt_secret(),
            token_ttl_hours: default_token_ttl_hours(),
            bus_capacity: default_bus_capacity(),
            provider: ProviderConfig::default(),
            worker: WorkerSettings::default(),
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            consumer: default_consumer(),
            read_timeout_secs: default_read_timeout_secs(),
            claim_idle_secs: default_claim_idle_secs(),
        }
    }
}

impl ServerConfig {
    /// Load from a YAML file when it exists, otherwise start from defaults.
    /// Environment variables win over the file either way.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_yaml::from_str(&raw)
                .with_context(|| format!("parsing config {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(bind) = std::env::var("MURMUR_BIND") {
            self.bind = bind;
        }
        if let Ok(secret) = std::env::var("MURMUR_JWT_SECRET") {
            self.jwt_secret = secret;
        }
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            self.provider.api_key = Some(key);
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            consumer: self.worker.consumer.clone(),
            read_timeout: Duration::from_secs(self.worker.read_timeout_secs),
            claim_idle: Duration::from_secs(self.worker.claim_idle_secs),
        }
    }
}

use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

use crate::service::retry::RetryPolicy;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// PostgreSQL connection URL; the in-memory store is used when unset
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub locks: LockConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "./logs".to_string(),
            log_file: "bankcore.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
            postgres_url: None,
            locks: LockConfig::default(),
            retry: RetryConfig::default(),
            queue: QueueConfig::default(),
            recovery: RecoveryConfig::default(),
        }
    }
}

/// Lock wait/hold bounds, in seconds.
///
/// Defaults carry the historical values; tune them to the deployment's
/// latency profile.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LockConfig {
    pub account_wait_secs: u64,
    pub account_hold_secs: u64,
    pub execution_wait_secs: u64,
    pub execution_hold_secs: u64,
    pub recovery_wait_secs: u64,
    pub recovery_hold_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            account_wait_secs: 10,
            account_hold_secs: 15,
            execution_wait_secs: 100,
            execution_hold_secs: 300,
            recovery_wait_secs: 1,
            recovery_hold_secs: 600,
        }
    }
}

impl LockConfig {
    pub fn account_wait(&self) -> Duration {
        Duration::from_secs(self.account_wait_secs)
    }
    pub fn account_hold(&self) -> Duration {
        Duration::from_secs(self.account_hold_secs)
    }
    pub fn execution_wait(&self) -> Duration {
        Duration::from_secs(self.execution_wait_secs)
    }
    pub fn execution_hold(&self) -> Duration {
        Duration::from_secs(self.execution_hold_secs)
    }
    pub fn recovery_wait(&self) -> Duration {
        Duration::from_secs(self.recovery_wait_secs)
    }
    pub fn recovery_hold(&self) -> Duration {
        Duration::from_secs(self.recovery_hold_secs)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay_ms: 50 }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QueueConfig {
    /// Redelivery bound for the in-process execution queue
    pub max_deliveries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { max_deliveries: 3 }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecoveryConfig {
    pub scan_interval_secs: u64,
    pub stale_after_secs: u64,
    pub batch_size: i64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self { scan_interval_secs: 3600, stale_after_secs: 3600, batch_size: 1000 }
    }
}

impl RecoveryConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Self {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .unwrap_or_else(|_| panic!("Failed to read config file: {}", config_path));
        serde_yaml::from_str(&content).expect("Failed to parse config yaml")
    }
}

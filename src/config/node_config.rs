use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::drain::OverflowPolicy;
use crate::error::Result;
use crate::utils::ConfigValidator;

use super::env::{
    EnvConfig, DRAINING_VAR, HOLDING_CAPACITY_VAR, RECEIVE_TIMEOUT_VAR, WORKER_THREADS_VAR,
};

pub const DEFAULT_RECEIVE_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_SESSION_TOMBSTONES: usize = 1024;

fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// 节点配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// 同时执行的 flow 上限
    pub worker_threads: usize,
    /// `receive` 的默认超时，`null` 表示不超时
    pub receive_timeout_ms: Option<u64>,
    /// 记住多少个已关闭会话，用于丢弃迟到的重复 Initiate
    pub session_tombstones: usize,
    pub draining: DrainingConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            receive_timeout_ms: Some(DEFAULT_RECEIVE_TIMEOUT_MS),
            session_tombstones: DEFAULT_SESSION_TOMBSTONES,
            draining: DrainingConfig::default(),
        }
    }
}

/// 排空模式配置
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrainingConfig {
    pub enabled_on_start: bool,
    /// 暂存序列上限，`None` 为不限
    pub holding_capacity: Option<usize>,
    pub overflow_policy: OverflowPolicy,
    /// 设置后排空状态写入该文件，重启后恢复
    pub holding_store_path: Option<PathBuf>,
}

impl NodeConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: NodeConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_json_str(&raw)
    }

    /// 用环境变量覆盖配置项
    pub fn apply_env_overrides(mut self) -> Result<Self> {
        if let Some(workers) = EnvConfig::get_parsed::<usize>(WORKER_THREADS_VAR)? {
            self.worker_threads = workers;
        }
        if let Some(timeout) = EnvConfig::get_parsed::<u64>(RECEIVE_TIMEOUT_VAR)? {
            self.receive_timeout_ms = (timeout > 0).then_some(timeout);
        }
        if let Some(enabled) = EnvConfig::get_flag(DRAINING_VAR)? {
            self.draining.enabled_on_start = enabled;
        }
        if let Some(capacity) = EnvConfig::get_parsed::<usize>(HOLDING_CAPACITY_VAR)? {
            self.draining.holding_capacity = Some(capacity);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn receive_timeout(&self) -> Option<Duration> {
        self.receive_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<()> {
        ConfigValidator::validate_node_config(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config = NodeConfig::from_json_str(r#"{ "worker_threads": 2 }"#).unwrap();
        assert_eq!(config.worker_threads, 2);
        assert_eq!(config.receive_timeout_ms, Some(DEFAULT_RECEIVE_TIMEOUT_MS));
        assert!(!config.draining.enabled_on_start);
        assert_eq!(config.draining.overflow_policy, OverflowPolicy::RejectNew);
    }

    #[test]
    fn parses_draining_section() {
        let config = NodeConfig::from_json_str(
            r#"{
                "receive_timeout_ms": null,
                "draining": {
                    "enabled_on_start": true,
                    "holding_capacity": 8,
                    "overflow_policy": "drop_oldest"
                }
            }"#,
        )
        .unwrap();
        assert_eq!(config.receive_timeout(), None);
        assert!(config.draining.enabled_on_start);
        assert_eq!(config.draining.holding_capacity, Some(8));
        assert_eq!(config.draining.overflow_policy, OverflowPolicy::DropOldest);
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(NodeConfig::from_json_str(r#"{ "worker_threads": 0 }"#).is_err());
        assert!(
            NodeConfig::from_json_str(r#"{ "draining": { "holding_capacity": 0 } }"#).is_err()
        );
        assert!(NodeConfig::from_json_str(r#"{ "session_tombstones": 0 }"#).is_err());
    }
}

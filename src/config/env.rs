use crate::error::{P2pFlowError, Result};
use std::env;
use std::str::FromStr;

pub const WORKER_THREADS_VAR: &str = "P2PFLOW_WORKER_THREADS";
pub const RECEIVE_TIMEOUT_VAR: &str = "P2PFLOW_RECEIVE_TIMEOUT_MS";
pub const DRAINING_VAR: &str = "P2PFLOW_DRAINING";
pub const HOLDING_CAPACITY_VAR: &str = "P2PFLOW_HOLDING_CAPACITY";
pub const DEBUG_VAR: &str = "P2PFLOW_DEBUG";

/// 环境变量配置管理
pub struct EnvConfig;

impl EnvConfig {
    /// 从环境变量获取值
    pub fn get_env(key: &str) -> Result<String> {
        env::var(key)
            .map_err(|_| P2pFlowError::Config(format!("environment variable `{key}` is not set")))
    }

    /// 获取可选的环境变量
    pub fn get_env_optional(key: &str) -> Option<String> {
        env::var(key).ok().filter(|value| !value.trim().is_empty())
    }

    /// 获取并解析可选的环境变量
    pub fn get_parsed<T>(key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match Self::get_env_optional(key) {
            Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|err| {
                P2pFlowError::Config(format!("invalid value `{raw}` for `{key}`: {err}"))
            }),
            None => Ok(None),
        }
    }

    /// 解析布尔开关：1/true/yes/on
    pub fn get_flag(key: &str) -> Result<Option<bool>> {
        match Self::get_env_optional(key) {
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(Some(true)),
                "0" | "false" | "no" | "off" => Ok(Some(false)),
                _ => Err(P2pFlowError::Config(format!(
                    "invalid flag `{raw}` for `{key}`"
                ))),
            },
            None => Ok(None),
        }
    }

    /// 检查是否启用调试模式
    pub fn is_debug_mode() -> bool {
        env::var(DEBUG_VAR).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_parsed() {
        env::set_var("P2PFLOW_TEST_PARSED", "12");
        assert_eq!(EnvConfig::get_parsed::<usize>("P2PFLOW_TEST_PARSED").unwrap(), Some(12));
        env::set_var("P2PFLOW_TEST_PARSED", "twelve");
        assert!(EnvConfig::get_parsed::<usize>("P2PFLOW_TEST_PARSED").is_err());
        env::remove_var("P2PFLOW_TEST_PARSED");
        assert_eq!(EnvConfig::get_parsed::<usize>("P2PFLOW_TEST_PARSED").unwrap(), None);
    }

    #[test]
    fn test_get_flag() {
        env::set_var("P2PFLOW_TEST_FLAG", "on");
        assert_eq!(EnvConfig::get_flag("P2PFLOW_TEST_FLAG").unwrap(), Some(true));
        env::set_var("P2PFLOW_TEST_FLAG", "0");
        assert_eq!(EnvConfig::get_flag("P2PFLOW_TEST_FLAG").unwrap(), Some(false));
        env::remove_var("P2PFLOW_TEST_FLAG");
    }

    #[test]
    fn test_get_env_missing() {
        assert!(EnvConfig::get_env("P2PFLOW_TEST_SURELY_MISSING").is_err());
    }
}

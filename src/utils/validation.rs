use crate::config::NodeConfig;
use crate::error::{P2pFlowError, Result};

/// 配置验证器
pub struct ConfigValidator;

impl ConfigValidator {
    /// 验证 worker 数量
    pub fn validate_worker_threads(workers: usize) -> Result<()> {
        if workers == 0 {
            return Err(P2pFlowError::Config(
                "worker_threads must be at least 1".to_string(),
            ));
        }
        if workers > 4096 {
            tracing::warn!(workers, "unusually large worker pool");
        }
        Ok(())
    }

    /// 验证暂存序列容量
    pub fn validate_holding_capacity(capacity: Option<usize>) -> Result<()> {
        if capacity == Some(0) {
            return Err(P2pFlowError::Config(
                "draining.holding_capacity must be at least 1 (omit it for unbounded)".to_string(),
            ));
        }
        Ok(())
    }

    pub fn validate_receive_timeout(timeout_ms: Option<u64>) -> Result<()> {
        if timeout_ms == Some(0) {
            return Err(P2pFlowError::Config(
                "receive_timeout_ms must be positive (use null to disable)".to_string(),
            ));
        }
        Ok(())
    }

    /// 验证会话墓碑容量；为 0 时迟到的重复 Initiate 会再次创建响应方
    pub fn validate_session_tombstones(capacity: usize) -> Result<()> {
        if capacity == 0 {
            return Err(P2pFlowError::Config(
                "session_tombstones must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// 验证完整节点配置
    pub fn validate_node_config(config: &NodeConfig) -> Result<()> {
        Self::validate_worker_threads(config.worker_threads)?;
        Self::validate_receive_timeout(config.receive_timeout_ms)?;
        Self::validate_holding_capacity(config.draining.holding_capacity)?;
        Self::validate_session_tombstones(config.session_tombstones)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_worker_threads() {
        assert!(ConfigValidator::validate_worker_threads(1).is_ok());
        assert!(ConfigValidator::validate_worker_threads(0).is_err());
    }

    #[test]
    fn test_validate_holding_capacity() {
        assert!(ConfigValidator::validate_holding_capacity(None).is_ok());
        assert!(ConfigValidator::validate_holding_capacity(Some(3)).is_ok());
        assert!(ConfigValidator::validate_holding_capacity(Some(0)).is_err());
    }

    #[test]
    fn test_validate_session_tombstones() {
        assert!(ConfigValidator::validate_session_tombstones(1).is_ok());
        assert!(ConfigValidator::validate_session_tombstones(0).is_err());
    }

    #[test]
    fn test_validate_receive_timeout() {
        assert!(ConfigValidator::validate_receive_timeout(None).is_ok());
        assert!(ConfigValidator::validate_receive_timeout(Some(0)).is_err());
    }
}

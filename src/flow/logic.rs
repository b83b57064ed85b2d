use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

use super::context::FlowContext;

static NEXT_FLOW_ID: AtomicU64 = AtomicU64::new(1);

/// Flow 唯一标识
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowId(u64);

impl FlowId {
    pub fn next() -> Self {
        Self(NEXT_FLOW_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "flow-{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowState {
    Created,
    Runnable,
    Suspended,
    Completed,
    Failed,
}

impl FlowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FlowState::Completed | FlowState::Failed)
    }
}

/// 工作流逻辑
///
/// `name` 同时作为发起方 flow 标识随 Initiate 消息发送，
/// 对端据此在 [`ResponderRegistry`](super::ResponderRegistry) 中查找响应方。
/// `call` 在挂起点（`receive`）之间同步执行，不在等待时占用 worker。
#[async_trait]
pub trait FlowLogic: Send + Sync {
    fn name(&self) -> &str;

    async fn call(&self, ctx: &mut FlowContext) -> Result<Value>;
}

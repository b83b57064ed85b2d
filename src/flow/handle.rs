use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{P2pFlowError, Result};
use crate::message::decode_payload;
use crate::runtime::FlowTable;

use super::logic::{FlowId, FlowState};

/// 已启动 flow 的句柄
///
/// flow 结束后其记录保留到结果被观察（`result`）或句柄被丢弃为止。
pub struct FlowHandle {
    id: FlowId,
    name: String,
    result: Option<oneshot::Receiver<Result<Value>>>,
    flows: Arc<FlowTable>,
}

impl FlowHandle {
    pub(crate) fn new(
        id: FlowId,
        name: String,
        result: oneshot::Receiver<Result<Value>>,
        flows: Arc<FlowTable>,
    ) -> Self {
        Self {
            id,
            name,
            result: Some(result),
            flows,
        }
    }

    pub fn id(&self) -> FlowId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> Option<FlowState> {
        self.flows.state(self.id)
    }

    /// 等待 flow 结束，返回其结果或终止错误
    pub async fn result(mut self) -> Result<Value> {
        let receiver = self
            .result
            .take()
            .ok_or_else(|| P2pFlowError::FlowFailure("flow result already taken".to_string()))?;
        receiver.await.unwrap_or_else(|_| {
            Err(P2pFlowError::FlowFailure(
                "flow terminated without a result".to_string(),
            ))
        })
    }

    pub async fn result_as<T: DeserializeOwned>(self) -> Result<T> {
        decode_payload(self.result().await?)
    }
}

impl Drop for FlowHandle {
    fn drop(&mut self) {
        self.flows.release(self.id);
    }
}

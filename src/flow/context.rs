use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::error::{P2pFlowError, Result};
use crate::message::{decode_payload, encode_payload, PeerId, SessionKey};
use crate::runtime::FlowTable;
use crate::session::{FlowSession, Receive, SessionManager};

use super::logic::FlowId;

/// Flow 执行上下文
///
/// flow 逻辑通过它打开会话、发送和接收消息。`receive` 是唯一的挂起点：
/// 挂起期间释放 worker 许可，恢复时重新排队获取。
pub struct FlowContext {
    id: FlowId,
    name: String,
    sessions: Arc<SessionManager>,
    flows: Arc<FlowTable>,
    workers: Arc<Semaphore>,
    permit: Option<OwnedSemaphorePermit>,
    receive_timeout: Option<Duration>,
}

impl FlowContext {
    pub(crate) fn new(
        id: FlowId,
        name: String,
        sessions: Arc<SessionManager>,
        flows: Arc<FlowTable>,
        workers: Arc<Semaphore>,
        receive_timeout: Option<Duration>,
    ) -> Self {
        Self {
            id,
            name,
            sessions,
            flows,
            workers,
            permit: None,
            receive_timeout,
        }
    }

    pub fn id(&self) -> FlowId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 当前节点身份
    pub fn identity(&self) -> &PeerId {
        self.sessions.identity()
    }

    pub fn receive_timeout(&self) -> Option<Duration> {
        self.receive_timeout
    }

    /// 向对端发起新会话（发送 Initiate）
    pub fn initiate_flow(&mut self, counterparty: impl Into<PeerId>) -> Result<FlowSession> {
        self.sessions
            .create_session(self.id, &self.name, counterparty.into())
    }

    /// 发送数据消息，不阻塞
    pub fn send<T>(&mut self, session: &FlowSession, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let payload = encode_payload(value)?;
        self.sessions.send(self.id, session.key(), payload)
    }

    /// 接收下一条消息，使用节点配置的超时
    pub async fn receive<T: DeserializeOwned>(&mut self, session: &FlowSession) -> Result<T> {
        let timeout = self.receive_timeout;
        let payload = self.receive_payload(session, timeout).await?;
        decode_payload(payload)
    }

    pub async fn receive_with_timeout<T: DeserializeOwned>(
        &mut self,
        session: &FlowSession,
        timeout: Duration,
    ) -> Result<T> {
        let payload = self.receive_payload(session, Some(timeout)).await?;
        decode_payload(payload)
    }

    pub async fn send_and_receive<T, R>(&mut self, session: &FlowSession, value: &T) -> Result<R>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.send(session, value)?;
        self.receive(session).await
    }

    /// 主动结束会话，对端收到 Close
    pub fn close(&mut self, session: &FlowSession) -> Result<()> {
        self.sessions.close(self.id, session.key(), None)
    }

    async fn receive_payload(
        &mut self,
        session: &FlowSession,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let key = session.key().clone();
        let mut pending = match self.sessions.receive(self.id, &key)? {
            Receive::Ready(payload) => return Ok(payload),
            Receive::Pending(rx) => rx,
        };

        self.flows.suspend(self.id, key.clone());
        self.release_worker();
        debug!(flow = %self.id, session = %key, "flow suspended on receive");

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut pending).await {
                Ok(delivered) => delivered.unwrap_or_else(|_| Err(self.closed_error(&key))),
                Err(_) => {
                    // 交付与超时竞争：撤回挂起槽后再检查一次
                    self.sessions.abandon_receive(&key);
                    match pending.try_recv() {
                        Ok(delivered) => delivered,
                        Err(_) => Err(P2pFlowError::SessionTimeout {
                            session: key.clone(),
                            timeout: limit,
                        }),
                    }
                }
            },
            None => pending
                .await
                .unwrap_or_else(|_| Err(self.closed_error(&key))),
        };

        self.flows.resume(self.id);
        self.acquire_worker().await?;
        debug!(flow = %self.id, session = %key, ok = outcome.is_ok(), "flow resumed");
        outcome
    }

    fn closed_error(&self, key: &SessionKey) -> P2pFlowError {
        P2pFlowError::SessionClosed {
            session: key.clone(),
            reason: None,
        }
    }

    pub(crate) async fn acquire_worker(&mut self) -> Result<()> {
        let permit = Arc::clone(&self.workers)
            .acquire_owned()
            .await
            .map_err(|_| P2pFlowError::FlowFailure("worker pool closed".to_string()))?;
        self.permit = Some(permit);
        Ok(())
    }

    pub(crate) fn release_worker(&mut self) {
        self.permit = None;
    }
}

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{P2pFlowError, Result};
use crate::flow::FlowId;
use crate::message::{MessageKind, PeerId, SessionKey};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Initiating,
    Established,
    Closed,
}

/// `receive` 的即时结果
#[derive(Debug)]
pub enum Receive {
    Ready(Value),
    /// 无可用消息，flow 需要挂起等待
    Pending(oneshot::Receiver<Result<Value>>),
}

/// 单个会话端点
///
/// 入站消息按序号重排、去重后才交付；`pending` 是挂起中 flow 的延续槽。
pub struct Session {
    key: SessionKey,
    owner: FlowId,
    counterparty: PeerId,
    state: SessionState,
    next_outbound: u64,
    next_inbound: u64,
    reorder: BTreeMap<u64, MessageKind>,
    inbound: VecDeque<Value>,
    pending: Option<oneshot::Sender<Result<Value>>>,
    close_reason: Option<String>,
}

impl Session {
    /// 发起方端点：Initiate 已占用出站序号 0
    pub(crate) fn initiating(key: SessionKey, owner: FlowId, counterparty: PeerId) -> Self {
        Self::with_state(key, owner, counterparty, SessionState::Initiating, 1, 0)
    }

    /// 响应方端点：已消费入站序号 0 的 Initiate
    pub(crate) fn accepted(key: SessionKey, owner: FlowId, counterparty: PeerId) -> Self {
        Self::with_state(key, owner, counterparty, SessionState::Established, 0, 1)
    }

    fn with_state(
        key: SessionKey,
        owner: FlowId,
        counterparty: PeerId,
        state: SessionState,
        next_outbound: u64,
        next_inbound: u64,
    ) -> Self {
        Self {
            key,
            owner,
            counterparty,
            state,
            next_outbound,
            next_inbound,
            reorder: BTreeMap::new(),
            inbound: VecDeque::new(),
            pending: None,
            close_reason: None,
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn owner(&self) -> FlowId {
        self.owner
    }

    pub fn counterparty(&self) -> &PeerId {
        &self.counterparty
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn queued(&self) -> usize {
        self.inbound.len()
    }

    pub fn has_pending_receive(&self) -> bool {
        self.pending.is_some()
    }

    pub(crate) fn next_sequence(&mut self) -> u64 {
        let sequence = self.next_outbound;
        self.next_outbound += 1;
        sequence
    }

    /// 接收一条入站消息；重复（已交付或已缓冲）时返回 false
    pub(crate) fn accept(&mut self, sequence: u64, kind: MessageKind) -> bool {
        if sequence < self.next_inbound || self.reorder.contains_key(&sequence) {
            return false;
        }
        self.reorder.insert(sequence, kind);
        while let Some(kind) = self.reorder.remove(&self.next_inbound) {
            self.next_inbound += 1;
            self.apply(kind);
        }
        true
    }

    fn apply(&mut self, kind: MessageKind) {
        if self.state == SessionState::Initiating {
            debug!(session = %self.key, "session established");
            self.state = SessionState::Established;
        }
        match kind {
            MessageKind::Data { payload } => {
                if self.state == SessionState::Closed {
                    debug!(session = %self.key, "dropping data received after close");
                } else {
                    self.push_payload(payload);
                }
            }
            MessageKind::Close { error } => self.mark_closed(error),
            MessageKind::Initiate { .. } => {
                warn!(session = %self.key, "unexpected initiate inside established session");
            }
        }
    }

    fn push_payload(&mut self, payload: Value) {
        match self.pending.take() {
            Some(waiter) => {
                // 等待方已超时离开时，消息回到队列
                if let Err(Ok(payload)) = waiter.send(Ok(payload)) {
                    self.inbound.push_back(payload);
                }
            }
            None => self.inbound.push_back(payload),
        }
    }

    fn mark_closed(&mut self, reason: Option<String>) {
        self.state = SessionState::Closed;
        self.close_reason = reason;
        if let Some(waiter) = self.pending.take() {
            let _ = waiter.send(Err(self.closed_error()));
        }
    }

    pub(crate) fn closed_error(&self) -> P2pFlowError {
        P2pFlowError::SessionClosed {
            session: self.key.clone(),
            reason: self.close_reason.clone(),
        }
    }

    /// 先返回已排队的消息，其次报告关闭，否则登记挂起槽
    pub(crate) fn poll_receive(&mut self) -> Result<Receive> {
        if let Some(payload) = self.inbound.pop_front() {
            return Ok(Receive::Ready(payload));
        }
        if self.state == SessionState::Closed {
            return Err(self.closed_error());
        }
        let (tx, rx) = oneshot::channel();
        self.pending = Some(tx);
        Ok(Receive::Pending(rx))
    }

    pub(crate) fn abandon_receive(&mut self) {
        self.pending = None;
    }

    /// 本端关闭；返回需要发给对端的 Close 序号（已关闭则为 None）
    pub(crate) fn close_locally(&mut self) -> Option<u64> {
        if self.state == SessionState::Closed {
            return None;
        }
        self.state = SessionState::Closed;
        self.pending = None;
        Some(self.next_sequence())
    }
}

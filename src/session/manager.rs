use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::drain::{Admission, DrainingGate};
use crate::error::{P2pFlowError, Result};
use crate::flow::{FlowId, FlowLogic, ResponderRegistry};
use crate::message::{Envelope, MessageKind, PeerId, SessionKey};
use crate::transport::Transport;

use super::session::{Receive, Session, SessionState};
use super::orphans::Orphans;
use super::tombstones::Tombstones;
use super::FlowSession;

/// `handle_inbound` 的处理结果
pub enum Inbound {
    /// Initiate 已准入，需要调度新的响应方 flow
    Spawn {
        flow: FlowId,
        logic: Arc<dyn FlowLogic>,
        session: FlowSession,
    },
    /// Initiate 被排空闸门暂存
    Held,
    /// 已路由到现有会话
    Routed,
    /// 会话尚未建立，消息暂存待 Initiate 准入
    Buffered,
    Discarded,
}

impl Inbound {
    pub fn label(&self) -> &'static str {
        match self {
            Inbound::Spawn { .. } => "spawn",
            Inbound::Held => "held",
            Inbound::Routed => "routed",
            Inbound::Buffered => "buffered",
            Inbound::Discarded => "discarded",
        }
    }
}

struct SessionTable {
    live: HashMap<SessionKey, Session>,
    orphans: Orphans,
    tombstones: Tombstones,
}

impl SessionTable {
    fn seen(&self, key: &SessionKey) -> bool {
        self.live.contains_key(key) || self.tombstones.contains(key)
    }

    fn forget(&mut self, key: &SessionKey) {
        self.live.remove(key);
        self.orphans.take(key);
        self.tombstones.insert(key.clone());
    }

    fn owned_mut(&mut self, owner: FlowId, key: &SessionKey) -> Result<&mut Session> {
        let session = self
            .live
            .get_mut(key)
            .ok_or_else(|| P2pFlowError::UnknownSession(key.clone()))?;
        if session.owner() != owner {
            return Err(P2pFlowError::SessionNotOwned {
                session: key.clone(),
                flow: owner,
            });
        }
        Ok(session)
    }
}

/// 会话管理器
///
/// 负责创建会话、路由入站消息，并在 Initiate 准入后通过响应方注册表实例化对端 flow。
/// Initiate 的准入判断委托给 [`DrainingGate`]。
pub struct SessionManager {
    identity: PeerId,
    table: Mutex<SessionTable>,
    gate: Arc<DrainingGate>,
    responders: Arc<ResponderRegistry>,
    transport: Arc<dyn Transport>,
    next_session_id: AtomicU64,
}

impl SessionManager {
    pub fn new(
        identity: PeerId,
        gate: Arc<DrainingGate>,
        responders: Arc<ResponderRegistry>,
        transport: Arc<dyn Transport>,
        tombstone_capacity: usize,
    ) -> Self {
        Self {
            identity,
            table: Mutex::new(SessionTable {
                live: HashMap::new(),
                orphans: Orphans::new(tombstone_capacity),
                tombstones: Tombstones::new(tombstone_capacity),
            }),
            gate,
            responders,
            transport,
            next_session_id: AtomicU64::new(1),
        }
    }

    pub fn identity(&self) -> &PeerId {
        &self.identity
    }

    pub fn gate(&self) -> &Arc<DrainingGate> {
        &self.gate
    }

    pub fn session_state(&self, key: &SessionKey) -> Option<SessionState> {
        self.table.lock().live.get(key).map(Session::state)
    }

    pub fn live_sessions(&self) -> usize {
        self.table.lock().live.len()
    }

    /// 打开新会话：本地状态 Initiating，并向对端发送 Initiate
    pub fn create_session(
        &self,
        owner: FlowId,
        initiating_flow: &str,
        counterparty: PeerId,
    ) -> Result<FlowSession> {
        if counterparty == self.identity {
            return Err(P2pFlowError::Transport(format!(
                "cannot open a session with own identity `{counterparty}`"
            )));
        }
        let key = SessionKey::new(
            self.identity.clone(),
            self.next_session_id.fetch_add(1, Ordering::Relaxed),
        );
        self.table.lock().live.insert(
            key.clone(),
            Session::initiating(key.clone(), owner, counterparty.clone()),
        );

        let envelope = Envelope::initiate(
            self.identity.clone(),
            counterparty.clone(),
            key.clone(),
            initiating_flow,
        );
        if let Err(err) = self.transport.send(envelope) {
            self.table.lock().live.remove(&key);
            return Err(err);
        }
        info!(flow = %owner, session = %key, peer = %counterparty, "session initiated");
        Ok(FlowSession::new(key, counterparty))
    }

    pub fn send(&self, owner: FlowId, key: &SessionKey, payload: Value) -> Result<()> {
        let envelope = {
            let mut table = self.table.lock();
            let session = table.owned_mut(owner, key)?;
            if session.state() == SessionState::Closed {
                return Err(session.closed_error());
            }
            let sequence = session.next_sequence();
            Envelope::data(
                self.identity.clone(),
                session.counterparty().clone(),
                key.clone(),
                sequence,
                payload,
            )
        };
        self.transport.send(envelope)
    }

    pub fn receive(&self, owner: FlowId, key: &SessionKey) -> Result<Receive> {
        let mut table = self.table.lock();
        table.owned_mut(owner, key)?.poll_receive()
    }

    pub fn abandon_receive(&self, key: &SessionKey) {
        if let Some(session) = self.table.lock().live.get_mut(key) {
            session.abandon_receive();
        }
    }

    /// 关闭单个会话并通知对端
    pub fn close(&self, owner: FlowId, key: &SessionKey, error: Option<String>) -> Result<()> {
        let envelope = {
            let mut table = self.table.lock();
            let session = table.owned_mut(owner, key)?;
            let close = session.close_locally().map(|sequence| {
                Envelope::close(
                    self.identity.clone(),
                    session.counterparty().clone(),
                    key.clone(),
                    sequence,
                    error,
                )
            });
            table.forget(key);
            close
        };
        match envelope {
            Some(envelope) => self.transport.send(envelope),
            None => Ok(()),
        }
    }

    /// flow 结束时关闭其名下所有会话；返回发出的 Close 数量
    pub fn close_flow_sessions(&self, owner: FlowId, error: Option<String>) -> usize {
        let closes: Vec<Envelope> = {
            let mut table = self.table.lock();
            let keys: Vec<SessionKey> = table
                .live
                .values()
                .filter(|session| session.owner() == owner)
                .map(|session| session.key().clone())
                .collect();
            let mut closes = Vec::with_capacity(keys.len());
            for key in keys {
                if let Some(session) = table.live.get_mut(&key) {
                    if let Some(sequence) = session.close_locally() {
                        closes.push(Envelope::close(
                            self.identity.clone(),
                            session.counterparty().clone(),
                            key.clone(),
                            sequence,
                            error.clone(),
                        ));
                    }
                }
                table.forget(&key);
            }
            closes
        };

        let sent = closes.len();
        for envelope in closes {
            let session = envelope.session.clone();
            if let Err(err) = self.transport.send(envelope) {
                warn!(flow = %owner, session = %session, %err, "failed to send close");
            }
        }
        sent
    }

    /// 入站消息入口
    pub fn handle_inbound(&self, envelope: Envelope) -> Result<Inbound> {
        if envelope.recipient != self.identity {
            warn!(
                recipient = %envelope.recipient,
                node = %self.identity,
                "discarding message addressed to another node"
            );
            return Ok(Inbound::Discarded);
        }
        let initiating = match &envelope.kind {
            MessageKind::Initiate { flow } => Some(flow.clone()),
            _ => None,
        };
        match initiating {
            Some(flow) => self.handle_initiate(envelope, flow),
            None => Ok(self.route(envelope)),
        }
    }

    fn handle_initiate(&self, envelope: Envelope, flow: String) -> Result<Inbound> {
        if envelope.session.initiator != envelope.sender {
            warn!(
                session = %envelope.session,
                sender = %envelope.sender,
                "initiate sender does not match session initiator"
            );
            return Ok(Inbound::Discarded);
        }
        if self.table.lock().seen(&envelope.session) {
            debug!(session = %envelope.session, "duplicate initiate discarded");
            return Ok(Inbound::Discarded);
        }

        match self.gate.admit(envelope) {
            Admission::Admitted(envelope) => self.accept_initiation(envelope, flow),
            Admission::Held => Ok(Inbound::Held),
            Admission::Dropped(envelope) => {
                self.table.lock().forget(&envelope.session);
                Ok(Inbound::Discarded)
            }
            Admission::Rejected(envelope) => {
                self.table.lock().forget(&envelope.session);
                let reason = P2pFlowError::DrainingQueueOverflow {
                    capacity: self.gate.capacity().unwrap_or_default(),
                }
                .to_string();
                self.refuse(&envelope, reason);
                Ok(Inbound::Discarded)
            }
        }
    }

    fn accept_initiation(&self, envelope: Envelope, flow: String) -> Result<Inbound> {
        let key = envelope.session.clone();
        let owner = FlowId::next();
        {
            let mut table = self.table.lock();
            if table.seen(&key) {
                debug!(session = %key, "initiate already accepted");
                return Ok(Inbound::Discarded);
            }
            let mut session = Session::accepted(key.clone(), owner, envelope.sender.clone());
            for early in table.orphans.take(&key) {
                session.accept(early.sequence, early.kind);
            }
            table.live.insert(key.clone(), session);
        }

        let handle = FlowSession::new(key.clone(), envelope.sender.clone());
        match self.responders.build(&flow, handle.clone()) {
            Ok(logic) => {
                info!(flow = %owner, session = %key, initiator = %flow, "responder flow created");
                Ok(Inbound::Spawn {
                    flow: owner,
                    logic,
                    session: handle,
                })
            }
            Err(err) => {
                warn!(session = %key, initiator = %flow, %err, "cannot create responder flow");
                self.table.lock().forget(&key);
                self.refuse(&envelope, err.to_string());
                Ok(Inbound::Discarded)
            }
        }
    }

    /// 拒绝未建立的会话：以 Close 通知发起方
    fn refuse(&self, initiate: &Envelope, reason: String) {
        let close = Envelope::close(
            self.identity.clone(),
            initiate.sender.clone(),
            initiate.session.clone(),
            0,
            Some(reason),
        );
        if let Err(err) = self.transport.send(close) {
            warn!(session = %initiate.session, %err, "failed to refuse session");
        }
    }

    fn route(&self, envelope: Envelope) -> Inbound {
        let mut table = self.table.lock();
        let key = envelope.session.clone();
        if let Some(session) = table.live.get_mut(&key) {
            if session.counterparty() != &envelope.sender {
                warn!(session = %key, sender = %envelope.sender, "message from unexpected peer");
                return Inbound::Discarded;
            }
            let label = envelope.kind.label();
            if session.accept(envelope.sequence, envelope.kind) {
                debug!(session = %key, sequence = envelope.sequence, kind = label, "message routed");
                return Inbound::Routed;
            }
            debug!(session = %key, sequence = envelope.sequence, "duplicate message discarded");
            return Inbound::Discarded;
        }
        if table.tombstones.contains(&key) {
            debug!(session = %key, "message for closed session discarded");
            return Inbound::Discarded;
        }
        if key.initiator != self.identity && key.initiator == envelope.sender {
            let sequence = envelope.sequence;
            if table.orphans.buffer(envelope) {
                debug!(session = %key, sequence, "buffering message ahead of initiate");
            }
            return Inbound::Buffered;
        }
        debug!(session = %key, "message for unknown session discarded");
        Inbound::Discarded
    }
}
